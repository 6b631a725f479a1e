//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use attachment_templates::scoring::FieldSimilarities;
use attachment_templates::store::StoreResult;
use attachment_templates::{
    Capabilities, InMemoryTemplateStore, StoreError, Template, TemplateDraft, TemplateFilter,
    TemplateStore, VersionMode,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attachment_templates=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// How [`ScriptedStore`] answers the native bulk scoring calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Native {
    /// Advertise nothing; the engine must use the in-process path.
    Absent,
    /// Advertise and compute rows the way a datastore would.
    Working,
    /// Advertise but fail every call.
    Failing,
}

/// In-memory store that counts the reads the engine makes and plays the part
/// of a datastore with native scoring.
pub struct ScriptedStore {
    pub inner: InMemoryTemplateStore,
    pub native: Native,
    pub list_calls: AtomicUsize,
    pub native_calls: AtomicUsize,
    /// Promotions still to be rejected with a conflict.
    pub promote_conflicts: AtomicUsize,
    pub promote_calls: AtomicUsize,
    /// When set, every read fails as if the datastore were unreachable.
    pub unreachable: AtomicBool,
}

impl ScriptedStore {
    pub fn new(native: Native) -> Self {
        Self {
            inner: InMemoryTemplateStore::new(),
            native,
            list_calls: AtomicUsize::new(0),
            native_calls: AtomicUsize::new(0),
            promote_conflicts: AtomicUsize::new(0),
            promote_calls: AtomicUsize::new(0),
            unreachable: AtomicBool::new(false),
        }
    }

    pub async fn seeded(native: Native, drafts: Vec<TemplateDraft>) -> Arc<Self> {
        let store = Self::new(native);
        for draft in drafts {
            store
                .inner
                .insert_version(draft, VersionMode::NewLineage)
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn native_calls(&self) -> usize {
        self.native_calls.load(Ordering::SeqCst)
    }

    pub fn promote_calls(&self) -> usize {
        self.promote_calls.load(Ordering::SeqCst)
    }

    pub fn go_offline(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TemplateStore for ScriptedStore {
    async fn count_templates(&self) -> StoreResult<usize> {
        self.check_reachable()?;
        self.inner.count_templates().await
    }

    async fn get_template(&self, id: Uuid) -> StoreResult<Option<Template>> {
        self.inner.get_template(id).await
    }

    async fn list_templates(&self, filter: TemplateFilter) -> StoreResult<Vec<Template>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        self.inner.list_templates(filter).await
    }

    async fn list_children(&self, parent_id: Uuid) -> StoreResult<Vec<Template>> {
        self.inner.list_children(parent_id).await
    }

    async fn list_roots(&self) -> StoreResult<Vec<Template>> {
        self.inner.list_roots().await
    }

    async fn list_versions(&self, name: &str) -> StoreResult<Vec<Template>> {
        self.inner.list_versions(name).await
    }

    async fn latest_version(&self, name: &str) -> StoreResult<Option<Template>> {
        self.inner.latest_version(name).await
    }

    async fn insert_version(
        &self,
        draft: TemplateDraft,
        mode: VersionMode,
    ) -> StoreResult<Template> {
        self.inner.insert_version(draft, mode).await
    }

    async fn promote_to_latest(&self, id: Uuid) -> StoreResult<Template> {
        self.promote_calls.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .promote_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(StoreError::Conflict("lineage locked".into()));
        }
        self.inner.promote_to_latest(id).await
    }

    async fn update_semantic_model(
        &self,
        id: Uuid,
        semantic_model: Option<String>,
    ) -> StoreResult<Template> {
        self.inner.update_semantic_model(id, semantic_model).await
    }

    async fn update_name_pattern(
        &self,
        id: Uuid,
        name_pattern: Option<String>,
    ) -> StoreResult<Template> {
        self.inner.update_name_pattern(id, name_pattern).await
    }

    async fn capabilities(&self) -> Capabilities {
        match self.native {
            Native::Absent => Capabilities::in_process(),
            Native::Working | Native::Failing => Capabilities::native(),
        }
    }

    async fn field_similarities(
        &self,
        query: &str,
        filter: TemplateFilter,
    ) -> StoreResult<Vec<FieldSimilarities>> {
        self.native_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        if self.native != Native::Working {
            return Err(StoreError::Backend("similarity function missing".into()));
        }
        // A datastore returns rows in its own order and with its own rounding.
        let mut rows: Vec<FieldSimilarities> = self
            .inner
            .list_templates(filter)
            .await?
            .into_iter()
            .map(|t| {
                let mut row = FieldSimilarities::compute(t, query);
                row.name = (row.name as f32) as f64;
                row
            })
            .collect();
        rows.reverse();
        Ok(rows)
    }

    async fn name_relevance(
        &self,
        query: &str,
        filter: TemplateFilter,
    ) -> StoreResult<Vec<(Template, f64)>> {
        self.native_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        if self.native != Native::Working {
            return Err(StoreError::Backend("rank function missing".into()));
        }
        Ok(self
            .inner
            .list_templates(filter)
            .await?
            .into_iter()
            .rev()
            .map(|t| {
                let rank = attachment_templates::relevance_rank(&t.name, query);
                (t, rank)
            })
            .collect())
    }
}
