//! Postgres-backed template store.
//!
//! The fuzzy similarity and relevance rank primitives are SQL functions
//! installed by `migrations/001_template_catalog.sql`. Their presence is probed
//! at runtime, so a database without the functions still works through the
//! in-process fallback.
//!
//! Lineage mutations run in one transaction holding
//! `pg_advisory_xact_lock(hashtext(name))`; the partial unique index on
//! `(name) WHERE is_latest` backs the single-latest invariant.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{StoreResult, TemplateStore, VersionMode};
use crate::error::StoreError;
use crate::scoring::FieldSimilarities;
use crate::similarity::Capabilities;
use crate::types::{Template, TemplateDraft, TemplateFilter};

const MIGRATION: &str = include_str!("../../migrations/001_template_catalog.sql");

const COLUMNS: &str = "id, name, version, is_latest, parent_id, semantic_model, name_pattern, \
     rule_expression, sequence_number, is_static, created_at, updated_at";

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost:5432/attachments".to_string()),
            max_connections: std::env::var("DATABASE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

impl DatabaseConfig {
    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        info!("Connecting to database: {}", mask_database_url(&self.database_url));

        let mut pool_options = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.connection_timeout);
        if let Some(idle_timeout) = self.idle_timeout {
            pool_options = pool_options.idle_timeout(idle_timeout);
        }
        if let Some(max_lifetime) = self.max_lifetime {
            pool_options = pool_options.max_lifetime(max_lifetime);
        }

        pool_options.connect(&self.database_url).await.map_err(|e| {
            warn!("Failed to connect to database: {}", e);
            e
        })
    }
}

/// Hide the password part of a connection URL for logging.
fn mask_database_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut masked = parsed.clone();
        if parsed.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    } else {
        // Unparsable: keep only the ends
        match (url.get(..10), url.len().checked_sub(10).and_then(|i| url.get(i..))) {
            (Some(head), Some(tail)) if url.len() > 20 => format!("{}***{}", head, tail),
            _ => "***".to_string(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct SimilarityRow {
    #[sqlx(flatten)]
    template: Template,
    name_similarity: f64,
    semantic_similarity: f64,
    pattern_similarity: f64,
}

#[derive(sqlx::FromRow)]
struct RankRow {
    #[sqlx(flatten)]
    template: Template,
    rank: f64,
}

pub struct PgTemplateStore {
    pool: PgPool,
}

impl PgTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        Ok(Self::new(config.connect().await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema, table, indexes and scoring functions. Idempotent.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running template catalog migration");
        sqlx::raw_sql(MIGRATION).execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_where(
        &self,
        predicate: &str,
        filter: TemplateFilter,
    ) -> StoreResult<Vec<Template>> {
        let sql = format!(
            r#"SELECT {COLUMNS} FROM "attachment".templates
               WHERE {predicate} AND ($1 = FALSE OR is_latest)
               ORDER BY sequence_number, id"#
        );
        Ok(sqlx::query_as::<_, Template>(&sql)
            .bind(filter.latest_only)
            .fetch_all(&self.pool)
            .await?)
    }
}

/// Serialize lineage mutations for `name` until the transaction ends.
async fn lock_lineage(tx: &mut Transaction<'_, Postgres>, name: &str) -> StoreResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(name)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn conflict_or_database(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn count_templates(&self) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar(r#"SELECT count(*) FROM "attachment".templates"#)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn get_template(&self, id: Uuid) -> StoreResult<Option<Template>> {
        let sql = format!(r#"SELECT {COLUMNS} FROM "attachment".templates WHERE id = $1"#);
        Ok(sqlx::query_as::<_, Template>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_templates(&self, filter: TemplateFilter) -> StoreResult<Vec<Template>> {
        self.fetch_where("TRUE", filter).await
    }

    async fn list_children(&self, parent_id: Uuid) -> StoreResult<Vec<Template>> {
        let sql = format!(
            r#"SELECT {COLUMNS} FROM "attachment".templates
               WHERE parent_id = $1
               ORDER BY sequence_number, id"#
        );
        Ok(sqlx::query_as::<_, Template>(&sql)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_roots(&self) -> StoreResult<Vec<Template>> {
        self.fetch_where(
            r#"(parent_id IS NULL OR NOT EXISTS (
                   SELECT 1 FROM "attachment".templates p WHERE p.id = templates.parent_id))"#,
            TemplateFilter::all(),
        )
        .await
    }

    async fn list_versions(&self, name: &str) -> StoreResult<Vec<Template>> {
        let sql = format!(
            r#"SELECT {COLUMNS} FROM "attachment".templates
               WHERE name = $1
               ORDER BY version DESC"#
        );
        Ok(sqlx::query_as::<_, Template>(&sql)
            .bind(name)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn latest_version(&self, name: &str) -> StoreResult<Option<Template>> {
        let sql = format!(
            r#"SELECT {COLUMNS} FROM "attachment".templates
               WHERE name = $1 AND is_latest"#
        );
        Ok(sqlx::query_as::<_, Template>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_version(
        &self,
        draft: TemplateDraft,
        mode: VersionMode,
    ) -> StoreResult<Template> {
        let mut tx = self.pool.begin().await?;
        lock_lineage(&mut tx, &draft.name).await?;

        let current_max: Option<i32> =
            sqlx::query_scalar(r#"SELECT max(version) FROM "attachment".templates WHERE name = $1"#)
                .bind(&draft.name)
                .fetch_one(&mut *tx)
                .await?;

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

        sqlx::query(
            r#"UPDATE "attachment".templates
               SET is_latest = FALSE, updated_at = NOW()
               WHERE name = $1 AND is_latest"#,
        )
        .bind(&draft.name)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            r#"INSERT INTO "attachment".templates
                   (id, name, version, is_latest, parent_id, semantic_model, name_pattern,
                    rule_expression, sequence_number, is_static)
               VALUES ($1, $2, $3, TRUE, $4, $5, $6, $7, $8, $9)
               RETURNING {COLUMNS}"#
        );
        let template = sqlx::query_as::<_, Template>(&sql)
            .bind(Uuid::new_v4())
            .bind(&draft.name)
            .bind(version)
            .bind(draft.parent_id)
            .bind(&draft.semantic_model)
            .bind(&draft.name_pattern)
            .bind(&draft.rule_expression)
            .bind(draft.sequence_number)
            .bind(draft.is_static)
            .fetch_one(&mut *tx)
            .await
            .map_err(conflict_or_database)?;

        tx.commit().await.map_err(conflict_or_database)?;
        debug!("Inserted {} v{} ({})", template.name, template.version, template.id);
        Ok(template)
    }

    async fn promote_to_latest(&self, id: Uuid) -> StoreResult<Template> {
        let mut tx = self.pool.begin().await?;

        let name: String =
            sqlx::query_scalar(r#"SELECT name FROM "attachment".templates WHERE id = $1"#)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(StoreError::NotFound(id))?;
        lock_lineage(&mut tx, &name).await?;

        // Demote first: the partial unique index is checked row by row.
        sqlx::query(
            r#"UPDATE "attachment".templates
               SET is_latest = FALSE, updated_at = NOW()
               WHERE name = $1 AND id <> $2 AND is_latest"#,
        )
        .bind(&name)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            r#"UPDATE "attachment".templates
               SET is_latest = TRUE,
                   updated_at = CASE WHEN is_latest THEN updated_at ELSE NOW() END
               WHERE id = $1
               RETURNING {COLUMNS}"#
        );
        let template = sqlx::query_as::<_, Template>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conflict_or_database)?
            .ok_or(StoreError::NotFound(id))?;

        tx.commit().await.map_err(conflict_or_database)?;
        Ok(template)
    }

    async fn update_semantic_model(
        &self,
        id: Uuid,
        semantic_model: Option<String>,
    ) -> StoreResult<Template> {
        let sql = format!(
            r#"UPDATE "attachment".templates
               SET semantic_model = $2, updated_at = NOW()
               WHERE id = $1
               RETURNING {COLUMNS}"#
        );
        sqlx::query_as::<_, Template>(&sql)
            .bind(id)
            .bind(semantic_model)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_name_pattern(
        &self,
        id: Uuid,
        name_pattern: Option<String>,
    ) -> StoreResult<Template> {
        let sql = format!(
            r#"UPDATE "attachment".templates
               SET name_pattern = $2, updated_at = NOW()
               WHERE id = $1
               RETURNING {COLUMNS}"#
        );
        sqlx::query_as::<_, Template>(&sql)
            .bind(id)
            .bind(name_pattern)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn capabilities(&self) -> Capabilities {
        let probe: Result<(bool, bool), sqlx::Error> = sqlx::query_as(
            r#"SELECT
                   to_regprocedure('"attachment".fuzzy_similarity(text, text)') IS NOT NULL,
                   to_regprocedure('"attachment".relevance_rank(text, text)') IS NOT NULL"#,
        )
        .fetch_one(&self.pool)
        .await;

        match probe {
            Ok((native_fuzzy, native_rank)) => Capabilities {
                native_fuzzy,
                native_rank,
            },
            Err(e) => {
                warn!("Capability probe failed, using in-process scoring: {}", e);
                Capabilities::in_process()
            }
        }
    }

    async fn field_similarities(
        &self,
        query: &str,
        filter: TemplateFilter,
    ) -> StoreResult<Vec<FieldSimilarities>> {
        let sql = format!(
            r#"SELECT {COLUMNS},
                   "attachment".fuzzy_similarity(name, $1) AS name_similarity,
                   "attachment".fuzzy_similarity(semantic_model, $1) AS semantic_similarity,
                   "attachment".fuzzy_similarity(name_pattern, $1) AS pattern_similarity
               FROM "attachment".templates
               WHERE ($2 = FALSE OR is_latest)
               ORDER BY sequence_number, id"#
        );
        let rows = sqlx::query_as::<_, SimilarityRow>(&sql)
            .bind(query)
            .bind(filter.latest_only)
            .fetch_all(&self.pool)
            .await?;

        // Field emptiness is judged in process so both paths agree on which
        // weighted arms are active.
        Ok(rows
            .into_iter()
            .map(|row| {
                let semantic_model = row
                    .template
                    .semantic_model()
                    .map(|_| row.semantic_similarity);
                let name_pattern = row.template.name_pattern().map(|_| row.pattern_similarity);
                FieldSimilarities {
                    template: row.template,
                    name: row.name_similarity,
                    semantic_model,
                    name_pattern,
                }
            })
            .collect())
    }

    async fn name_relevance(
        &self,
        query: &str,
        filter: TemplateFilter,
    ) -> StoreResult<Vec<(Template, f64)>> {
        let sql = format!(
            r#"SELECT {COLUMNS},
                   "attachment".relevance_rank(name, $1) AS rank
               FROM "attachment".templates
               WHERE ($2 = FALSE OR is_latest)
               ORDER BY sequence_number, id"#
        );
        let rows = sqlx::query_as::<_, RankRow>(&sql)
            .bind(query)
            .bind(filter.latest_only)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| (row.template, row.rank)).collect())
    }
}
