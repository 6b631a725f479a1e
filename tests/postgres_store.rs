//! Integration tests for the Postgres template store
//!
//! These tests verify that:
//! 1. The migration installs the native scoring functions and the probe sees them
//! 2. Native scoring agrees with the in-process primitives
//! 3. Concurrent promotions never leave two latest rows in a lineage
//!
//! Requires: DATABASE_URL environment variable and `database` feature

#![cfg(feature = "database")]

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use attachment_templates::scoring::FieldSimilarities;
use attachment_templates::{
    fuzzy_similarity, relevance_rank, MatchingConfig, MatchingEngine, PgTemplateStore,
    TemplateDraft, TemplateFilter, TemplateStore, VersionManager, VersionMode,
};

async fn get_test_store() -> Arc<PgTemplateStore> {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to test database");
    let store = PgTemplateStore::new(pool);
    store.run_migrations().await.expect("Failed to migrate");
    Arc::new(store)
}

/// Lineage names unique to one test run.
fn unique(name: &str) -> String {
    format!("{} {}", name, &Uuid::new_v4().simple().to_string()[..8])
}

#[tokio::test]
async fn test_capabilities_detected_after_migration() {
    let store = get_test_store().await;
    let caps = store.capabilities().await;
    assert!(caps.native_fuzzy);
    assert!(caps.native_rank);
}

#[tokio::test]
async fn test_sql_functions_match_in_process_primitives() {
    let store = get_test_store().await;
    let pairs = [
        ("Invoice Template", "invoice"),
        ("Contract", "invoice"),
        ("alpha beta", "alpha gamma"),
        ("Supply Contract Archive", "supply agreement"),
        ("", "x"),
        ("Invoice", "INVOICE"),
    ];
    for (a, b) in pairs {
        let native: f64 = sqlx::query_scalar(r#"SELECT "attachment".fuzzy_similarity($1, $2)"#)
            .bind(a)
            .bind(b)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert!((native - fuzzy_similarity(a, b)).abs() < 1e-9, "{:?} vs {:?}", a, b);
    }

    for (doc, query) in [
        ("Invoice Template", "invoice"),
        ("Tax Invoice Register", "contract | invoice"),
        ("Site Photos", "invoice"),
    ] {
        let native: f64 = sqlx::query_scalar(r#"SELECT "attachment".relevance_rank($1, $2)"#)
            .bind(doc)
            .bind(query)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert!((native - relevance_rank(doc, query)).abs() < 1e-9, "{:?}", doc);
    }
}

#[tokio::test]
async fn test_field_similarities_match_in_process_rows() {
    let store = get_test_store().await;
    let name = unique("Invoice Template");
    let template = store
        .insert_version(
            TemplateDraft::new(&name).semantic_model("invoice,bill"),
            VersionMode::NewLineage,
        )
        .await
        .unwrap();

    let rows = store
        .field_similarities("invoice", TemplateFilter::latest())
        .await
        .unwrap();
    let row = rows
        .into_iter()
        .find(|r| r.template.id == template.id)
        .expect("inserted template is scored");
    let expected = FieldSimilarities::compute(template, "invoice");
    assert!((row.name - expected.name).abs() < 1e-9);
    assert_eq!(row.semantic_model.is_some(), expected.semantic_model.is_some());
    assert_eq!(row.name_pattern, None);
}

#[tokio::test]
async fn test_engine_uses_native_path() {
    let store = get_test_store().await;
    let name = unique("Quarterly Budget");
    store
        .insert_version(
            TemplateDraft::new(&name).semantic_model("budget,finance"),
            VersionMode::NewLineage,
        )
        .await
        .unwrap();

    let engine = MatchingEngine::new(store, MatchingConfig::default())
        .await
        .unwrap();
    assert!(engine.capabilities().native_fuzzy);
    let ranked = engine
        .intelligent_recommendations(&name, 0.3, 50, true)
        .await
        .unwrap();
    assert!(ranked.iter().any(|c| c.template.name == name));
}

#[tokio::test]
async fn test_concurrent_promotions_on_one_lineage() {
    let store = get_test_store().await;
    let name = unique("Contracts");
    let manager = Arc::new(VersionManager::new(store.clone(), &MatchingConfig::default()));
    let first = manager
        .create_lineage(TemplateDraft::new(&name))
        .await
        .unwrap();
    let mut ids = vec![first.id];
    for _ in 0..4 {
        ids.push(
            manager
                .create_next_version(first.id, Default::default())
                .await
                .unwrap()
                .id,
        );
    }

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let manager = manager.clone();
            let target = ids[i % ids.len()];
            tokio::spawn(async move { manager.set_as_latest(target).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let versions = manager.get_all_versions(&name).await.unwrap();
    assert_eq!(versions.len(), 5);
    assert_eq!(versions.iter().filter(|t| t.is_latest).count(), 1);
}

#[tokio::test]
async fn test_duplicate_lineage_is_conflict() {
    let store = get_test_store().await;
    let name = unique("Deeds");
    store
        .insert_version(TemplateDraft::new(&name), VersionMode::NewLineage)
        .await
        .unwrap();
    let err = store
        .insert_version(TemplateDraft::new(&name), VersionMode::NewLineage)
        .await
        .unwrap_err();
    assert!(matches!(err, attachment_templates::StoreError::Conflict(_)));
}
