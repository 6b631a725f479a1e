//! Version lineage management.
//!
//! Every template is one version of a named lineage and exactly one version
//! per name is latest. Promotion and rollback are the same transition: the
//! target becomes latest and its siblings are demoted in one atomic store
//! operation. Conflicting concurrent promotions are retried with backoff rather
//! than dropped.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::MatchingConfig;
use crate::error::{Result, StoreError, TemplateError};
use crate::store::{StoreResult, TemplateStore, VersionMode};
use crate::types::{Template, TemplateChanges, TemplateDraft};

const RETRY_BASE_DELAY: Duration = Duration::from_millis(10);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(1);

pub struct VersionManager {
    store: Arc<dyn TemplateStore>,
    max_retries: u32,
}

impl VersionManager {
    pub fn new(store: Arc<dyn TemplateStore>, config: &MatchingConfig) -> Self {
        Self {
            store,
            max_retries: config.promotion_max_retries,
        }
    }

    pub async fn get_latest(&self, name: &str) -> Result<Option<Template>> {
        Ok(self.store.latest_version(name).await?)
    }

    /// All versions of `name`, highest first.
    pub async fn get_all_versions(&self, name: &str) -> Result<Vec<Template>> {
        Ok(self.store.list_versions(name).await?)
    }

    /// All versions sharing the name of `template_id`, highest first.
    pub async fn get_history(&self, template_id: Uuid) -> Result<Vec<Template>> {
        let template = self.require(template_id).await?;
        self.get_all_versions(&template.name).await
    }

    /// Make `template_id` the latest version of its lineage.
    ///
    /// Idempotent: promoting the current latest leaves the lineage unchanged.
    #[instrument(skip(self))]
    pub async fn set_as_latest(&self, template_id: Uuid) -> Result<Template> {
        let promoted = self
            .with_retry("promote", || self.store.promote_to_latest(template_id))
            .await
            .map_err(|e| not_found_or(e, template_id))?;
        info!(
            "Promoted {} v{} ({}) to latest",
            promoted.name, promoted.version, promoted.id
        );
        Ok(promoted)
    }

    /// Restore an older version as latest. Same transition as
    /// [`set_as_latest`](Self::set_as_latest).
    #[instrument(skip(self))]
    pub async fn rollback(&self, template_id: Uuid) -> Result<Template> {
        let target = self.require(template_id).await?;
        if let Some(current) = self.store.latest_version(&target.name).await? {
            info!(
                "Rolling back {} from v{} to v{}",
                target.name, current.version, target.version
            );
        }
        self.set_as_latest(template_id).await
    }

    /// Version 1 of a new lineage.
    #[instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create_lineage(&self, draft: TemplateDraft) -> Result<Template> {
        validate_name(&draft.name)?;
        self.store
            .insert_version(draft, VersionMode::NewLineage)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(msg) => TemplateError::Conflict(msg),
                other => other.into(),
            })
    }

    /// Next version of the lineage of `base_id`: the base's fields with
    /// `changes` applied, numbered `max(version) + 1`, made latest.
    #[instrument(skip(self, changes))]
    pub async fn create_next_version(
        &self,
        base_id: Uuid,
        changes: TemplateChanges,
    ) -> Result<Template> {
        let base = self.require(base_id).await?;
        let draft = changes.apply(TemplateDraft::from(&base));
        let created = self
            .with_retry("create version", || {
                self.store
                    .insert_version(draft.clone(), VersionMode::NextVersion)
            })
            .await?;
        info!(
            "Created {} v{} from v{}",
            created.name, created.version, base.version
        );
        Ok(created)
    }

    async fn require(&self, template_id: Uuid) -> Result<Template> {
        self.store
            .get_template(template_id)
            .await?
            .ok_or_else(|| TemplateError::NotFound(format!("template {}", template_id)))
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = StoreResult<T>>,
    {
        let mut tries = 0;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(StoreError::Conflict(msg)) if tries < self.max_retries => {
                    tries += 1;
                    warn!(
                        "{} conflicted (attempt {}/{}): {}",
                        operation, tries, self.max_retries, msg
                    );
                    tokio::time::sleep(retry_delay(tries)).await;
                }
                Err(StoreError::Conflict(msg)) => return Err(TemplateError::Conflict(msg)),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Exponential backoff for the `tries`-th retry, capped at [`RETRY_MAX_DELAY`].
fn retry_delay(tries: u32) -> Duration {
    let factor = 2u32.checked_pow(tries.saturating_sub(1)).unwrap_or(u32::MAX);
    RETRY_BASE_DELAY
        .checked_mul(factor)
        .unwrap_or(RETRY_MAX_DELAY)
        .min(RETRY_MAX_DELAY)
}

fn not_found_or(e: TemplateError, id: Uuid) -> TemplateError {
    match e {
        TemplateError::Store(StoreError::NotFound(_)) => {
            TemplateError::NotFound(format!("template {}", id))
        }
        other => other,
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(TemplateError::InvalidInput("template name is empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTemplateStore;

    async fn lineage(
        versions: usize,
    ) -> (Arc<InMemoryTemplateStore>, VersionManager, Vec<Template>) {
        let store = Arc::new(InMemoryTemplateStore::new());
        let manager = VersionManager::new(store.clone(), &MatchingConfig::default());
        let mut created = vec![manager
            .create_lineage(TemplateDraft::new("Contract").semantic_model("contract"))
            .await
            .unwrap()];
        for _ in 1..versions {
            let base = created[0].id;
            created.push(
                manager
                    .create_next_version(base, TemplateChanges::default())
                    .await
                    .unwrap(),
            );
        }
        (store, manager, created)
    }

    fn latest_versions(all: &[Template]) -> Vec<i32> {
        all.iter().filter(|t| t.is_latest).map(|t| t.version).collect()
    }

    #[tokio::test]
    async fn test_next_version_inherits_fields_and_becomes_latest() {
        let (_, manager, created) = lineage(3).await;
        assert_eq!(
            created.iter().map(|t| t.version).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(created[2].semantic_model.as_deref(), Some("contract"));
        let latest = manager.get_latest("Contract").await.unwrap().unwrap();
        assert_eq!(latest.version, 3);
    }

    #[tokio::test]
    async fn test_promote_older_version() {
        let (store, manager, created) = lineage(5).await;
        manager.set_as_latest(created[2].id).await.unwrap();

        let all = store.snapshot().await;
        assert_eq!(latest_versions(&all), vec![3]);
        let v5 = all.iter().find(|t| t.version == 5).unwrap();
        assert!(!v5.is_latest);
    }

    #[tokio::test]
    async fn test_set_as_latest_is_idempotent() {
        let (store, manager, created) = lineage(3).await;
        manager.set_as_latest(created[0].id).await.unwrap();
        let once: Vec<(Uuid, bool)> = store
            .snapshot()
            .await
            .into_iter()
            .map(|t| (t.id, t.is_latest))
            .collect();
        manager.set_as_latest(created[0].id).await.unwrap();
        let twice: Vec<(Uuid, bool)> = store
            .snapshot()
            .await
            .into_iter()
            .map(|t| (t.id, t.is_latest))
            .collect();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_rollback_and_history() {
        let (_, manager, created) = lineage(3).await;
        let rolled = manager.rollback(created[0].id).await.unwrap();
        assert!(rolled.is_latest);
        assert_eq!(rolled.version, 1);

        let history = manager.get_history(created[1].id).await.unwrap();
        assert_eq!(
            history.iter().map(|t| t.version).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
    }

    #[test]
    fn test_retry_delay_doubles_up_to_cap() {
        assert_eq!(retry_delay(1), Duration::from_millis(10));
        assert_eq!(retry_delay(2), Duration::from_millis(20));
        assert_eq!(retry_delay(7), Duration::from_millis(640));
        assert_eq!(retry_delay(8), RETRY_MAX_DELAY);
        assert_eq!(retry_delay(40), RETRY_MAX_DELAY);
        assert_eq!(retry_delay(u32::MAX), RETRY_MAX_DELAY);
    }

    #[tokio::test]
    async fn test_missing_template_is_not_found() {
        let (_, manager, _) = lineage(1).await;
        let id = Uuid::new_v4();
        assert!(matches!(
            manager.set_as_latest(id).await.unwrap_err(),
            TemplateError::NotFound(_)
        ));
        assert!(matches!(
            manager.get_history(id).await.unwrap_err(),
            TemplateError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_lineage_conflicts() {
        let (_, manager, _) = lineage(1).await;
        let err = manager
            .create_lineage(TemplateDraft::new("Contract"))
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::Conflict(_)));
        let err = manager.create_lineage(TemplateDraft::new(" ")).await.unwrap_err();
        assert!(matches!(err, TemplateError::InvalidInput(_)));
    }
}
