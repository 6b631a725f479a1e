//! In-memory template store for embedded use and tests.
//!
//! All records sit behind one `RwLock`; every lineage mutation holds the write
//! guard for its whole read-modify-write, so readers never observe a lineage
//! with two latest versions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StoreResult, TemplateStore, VersionMode};
use crate::error::StoreError;
use crate::types::{Template, TemplateDraft, TemplateFilter};

#[derive(Debug, Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<Uuid, Template>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with existing records, taken as-is.
    pub fn with_templates(templates: impl IntoIterator<Item = Template>) -> Self {
        Self {
            templates: RwLock::new(templates.into_iter().map(|t| (t.id, t)).collect()),
        }
    }

    /// Snapshot of every record, for assertions.
    pub async fn snapshot(&self) -> Vec<Template> {
        let mut all: Vec<Template> = self.templates.read().await.values().cloned().collect();
        sort_by_sequence(&mut all);
        all
    }

    async fn update_with(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut Template),
    ) -> StoreResult<Template> {
        let mut templates = self.templates.write().await;
        let template = templates.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        apply(template);
        template.updated_at = Utc::now();
        Ok(template.clone())
    }
}

fn sort_by_sequence(templates: &mut [Template]) {
    templates.sort_by(|a, b| {
        a.sequence_number
            .cmp(&b.sequence_number)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn count_templates(&self) -> StoreResult<usize> {
        Ok(self.templates.read().await.len())
    }

    async fn get_template(&self, id: Uuid) -> StoreResult<Option<Template>> {
        Ok(self.templates.read().await.get(&id).cloned())
    }

    async fn list_templates(&self, filter: TemplateFilter) -> StoreResult<Vec<Template>> {
        let mut out: Vec<Template> = self
            .templates
            .read()
            .await
            .values()
            .filter(|t| filter.admits(t))
            .cloned()
            .collect();
        sort_by_sequence(&mut out);
        Ok(out)
    }

    async fn list_children(&self, parent_id: Uuid) -> StoreResult<Vec<Template>> {
        let mut out: Vec<Template> = self
            .templates
            .read()
            .await
            .values()
            .filter(|t| t.parent_id == Some(parent_id))
            .cloned()
            .collect();
        sort_by_sequence(&mut out);
        Ok(out)
    }

    async fn list_roots(&self) -> StoreResult<Vec<Template>> {
        let templates = self.templates.read().await;
        let mut out: Vec<Template> = templates
            .values()
            .filter(|t| match t.parent_id {
                None => true,
                Some(parent) => !templates.contains_key(&parent),
            })
            .cloned()
            .collect();
        sort_by_sequence(&mut out);
        Ok(out)
    }

    async fn list_versions(&self, name: &str) -> StoreResult<Vec<Template>> {
        let mut out: Vec<Template> = self
            .templates
            .read()
            .await
            .values()
            .filter(|t| t.name == name)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(out)
    }

    async fn latest_version(&self, name: &str) -> StoreResult<Option<Template>> {
        Ok(self
            .templates
            .read()
            .await
            .values()
            .find(|t| t.name == name && t.is_latest)
            .cloned())
    }

    async fn insert_version(
        &self,
        draft: TemplateDraft,
        mode: VersionMode,
    ) -> StoreResult<Template> {
        let mut templates = self.templates.write().await;
        let current_max = templates
            .values()
            .filter(|t| t.name == draft.name)
            .map(|t| t.version)
            .max();

        let version = match (mode, current_max) {
            (VersionMode::NewLineage, None) => 1,
            (VersionMode::NewLineage, Some(_)) => {
                return Err(StoreError::Conflict(format!(
                    "lineage '{}' already exists",
                    draft.name
                )))
            }
            (VersionMode::NextVersion, Some(max)) => max + 1,
            (VersionMode::NextVersion, None) => {
                return Err(StoreError::LineageNotFound(draft.name))
            }
        };

        let now = Utc::now();
        for sibling in templates.values_mut().filter(|t| t.name == draft.name) {
            if sibling.is_latest {
                sibling.is_latest = false;
                sibling.updated_at = now;
            }
        }

        let template = Template {
            id: Uuid::new_v4(),
            name: draft.name,
            version,
            is_latest: true,
            parent_id: draft.parent_id,
            semantic_model: draft.semantic_model,
            name_pattern: draft.name_pattern,
            rule_expression: draft.rule_expression,
            sequence_number: draft.sequence_number,
            is_static: draft.is_static,
            created_at: now,
            updated_at: now,
        };
        templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn promote_to_latest(&self, id: Uuid) -> StoreResult<Template> {
        let mut templates = self.templates.write().await;
        let name = templates
            .get(&id)
            .map(|t| t.name.clone())
            .ok_or(StoreError::NotFound(id))?;

        let now = Utc::now();
        for template in templates.values_mut().filter(|t| t.name == name) {
            let should_be_latest = template.id == id;
            if template.is_latest != should_be_latest {
                template.is_latest = should_be_latest;
                template.updated_at = now;
            }
        }
        templates.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn update_semantic_model(
        &self,
        id: Uuid,
        semantic_model: Option<String>,
    ) -> StoreResult<Template> {
        self.update_with(id, |t| t.semantic_model = semantic_model)
            .await
    }

    async fn update_name_pattern(
        &self,
        id: Uuid,
        name_pattern: Option<String>,
    ) -> StoreResult<Template> {
        self.update_with(id, |t| t.name_pattern = name_pattern).await
    }
}
