//! Attachment Templates - template matching, recommendation and versioning
//!
//! A hierarchical catalog of classification templates structures document
//! attachments. This crate decides which templates apply to a query, a
//! business description or a runtime context, and manages the version
//! lineage of each template name.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────────────┐
//!   query / context  │        MatchingEngine        │  ranked MatchCandidates
//!  ─────────────────►│ semantic │ weighted │ rule   │─────────────────────►
//!                    │          │ business          │
//!                    └────┬─────────┬──────────┬────┘
//!                         │         │          │
//!          SemanticMatcher│  scoring/business  │RuleEvaluator
//!                         │         │          │
//!                    ┌────▼─────────▼──────────▼────┐
//!                    │        TemplateStore         │◄── VersionManager
//!                    │   in-memory │ Postgres        │◄── TemplateMaintenance
//!                    └──────────────────────────────┘
//! ```
//!
//! Similarity primitives run in the datastore when it advertises them and in
//! process otherwise; both paths feed the same fusion code.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use attachment_templates::{
//!     InMemoryTemplateStore, MatchingConfig, MatchingEngine, TemplateDraft, VersionManager,
//! };
//!
//! # async fn run() -> attachment_templates::Result<()> {
//! let store = Arc::new(InMemoryTemplateStore::new());
//! let versions = VersionManager::new(store.clone(), &MatchingConfig::default());
//! versions
//!     .create_lineage(TemplateDraft::new("Invoice Template").semantic_model("invoice,bill"))
//!     .await?;
//!
//! let engine = MatchingEngine::new(store, MatchingConfig::default()).await?;
//! let ranked = engine.intelligent_recommendations("invoice", 0.3, 10, true).await?;
//! assert_eq!(ranked[0].template.name, "Invoice Template");
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Template records and match results
pub mod types;

pub mod config;

// Text primitives
pub mod keywords;
pub mod similarity;

// Embedded rule language
pub mod rules;

// External service contracts
pub mod collaborators;

// Persistence
pub mod store;

// Matching strategies
pub mod business;
pub mod engine;
pub mod scoring;

// Template lifecycle
pub mod maintenance;
pub mod versioning;

pub use collaborators::{
    LocalTextAnalyzer, RuleEvaluator, SemanticMatcher, TextAnalysis, TextAnalyzer,
};
pub use config::{BusinessMatchConfig, MatchingConfig, ScoringWeights};
pub use engine::{
    BusinessRequest, MatchingEngine, RecommendationKind, RecommendationRequest, Recommendations,
    StrategyFailure, WeightedRequest,
};
pub use error::{Result, StoreError, TemplateError};
pub use keywords::{determine_name_pattern, extract_keywords};
pub use maintenance::TemplateMaintenance;
pub use rules::{EmbeddedRuleEvaluator, RuleContext, RuleExpr, RuleResult, RuleSet};
pub use similarity::{fuzzy_similarity, relevance_rank, Capabilities};
pub use store::{InMemoryTemplateStore, TemplateStore, VersionMode};
#[cfg(feature = "database")]
pub use store::{DatabaseConfig, PgTemplateStore};
pub use types::{
    MatchCandidate, MatchStrategy, Template, TemplateChanges, TemplateDraft, TemplateFilter,
};
pub use versioning::VersionManager;
