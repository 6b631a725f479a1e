//! Template persistence.
//!
//! [`TemplateStore`] is the only way the engine, version manager and
//! maintenance service touch template records. Stores that can compute the
//! similarity primitives natively advertise it through
//! [`TemplateStore::capabilities`] and override the bulk scoring methods;
//! everything else uses the defaults, which report `Unsupported`.

mod memory;
#[cfg(feature = "database")]
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::scoring::FieldSimilarities;
use crate::similarity::Capabilities;
use crate::types::{Template, TemplateDraft, TemplateFilter};

pub use memory::InMemoryTemplateStore;
#[cfg(feature = "database")]
pub use postgres::{DatabaseConfig, PgTemplateStore};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// How [`TemplateStore::insert_version`] places a draft in its lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionMode {
    /// Version 1 of a name that has no versions yet. Conflict otherwise.
    NewLineage,
    /// `max(version) + 1` of an existing lineage. `LineageNotFound` otherwise.
    NextVersion,
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn count_templates(&self) -> StoreResult<usize>;

    async fn get_template(&self, id: Uuid) -> StoreResult<Option<Template>>;

    /// All templates admitted by `filter`, ordered by sequence number then id.
    async fn list_templates(&self, filter: TemplateFilter) -> StoreResult<Vec<Template>>;

    /// Direct children of `parent_id`, ordered by sequence number then id.
    async fn list_children(&self, parent_id: Uuid) -> StoreResult<Vec<Template>>;

    /// Templates without a parent, or whose parent no longer exists.
    async fn list_roots(&self) -> StoreResult<Vec<Template>>;

    /// Every version of `name`, highest version first.
    async fn list_versions(&self, name: &str) -> StoreResult<Vec<Template>>;

    async fn latest_version(&self, name: &str) -> StoreResult<Option<Template>>;

    /// Create a version from `draft`. The new version becomes the lineage's
    /// latest; the previous latest is demoted in the same atomic step.
    async fn insert_version(&self, draft: TemplateDraft, mode: VersionMode)
        -> StoreResult<Template>;

    /// Mark `id` latest and demote every sibling in its lineage, atomically.
    async fn promote_to_latest(&self, id: Uuid) -> StoreResult<Template>;

    async fn update_semantic_model(
        &self,
        id: Uuid,
        semantic_model: Option<String>,
    ) -> StoreResult<Template>;

    async fn update_name_pattern(
        &self,
        id: Uuid,
        name_pattern: Option<String>,
    ) -> StoreResult<Template>;

    /// Probed once by the engine at construction.
    async fn capabilities(&self) -> Capabilities {
        Capabilities::in_process()
    }

    /// Per-field fuzzy similarities against `query` for every template
    /// admitted by `filter`, computed in one bulk datastore query.
    async fn field_similarities(
        &self,
        _query: &str,
        _filter: TemplateFilter,
    ) -> StoreResult<Vec<FieldSimilarities>> {
        Err(StoreError::Unsupported("native fuzzy similarity"))
    }

    /// Relevance rank of each template name for `query`, computed in one bulk
    /// datastore query.
    async fn name_relevance(
        &self,
        _query: &str,
        _filter: TemplateFilter,
    ) -> StoreResult<Vec<(Template, f64)>> {
        Err(StoreError::Unsupported("native relevance rank"))
    }
}
