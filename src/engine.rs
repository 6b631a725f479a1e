//! Matching engine - scores and ranks templates with four independent
//! strategies.
//!
//! | Strategy          | Input                                  | Scoring                          |
//! |-------------------|----------------------------------------|----------------------------------|
//! | Semantic          | free-text query                        | external [`SemanticMatcher`]     |
//! | Pattern/Weighted  | query, threshold, top-n                | fused fuzzy similarity           |
//! | Business          | description, expected file types       | relevance rank with field boosts |
//! | Rule              | [`RuleContext`]                        | [`RuleEvaluator`], any-success   |
//!
//! The Pattern/Weighted and Business strategies use the store's native
//! primitives when the capability probe at construction reported them, and
//! fall back to the in-process primitives when the native path is absent or
//! fails. The two paths are never run together for one call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::business::{rank_business, BusinessQuery};
use crate::collaborators::{RuleEvaluator, SemanticMatcher};
use crate::config::MatchingConfig;
use crate::error::{Result, TemplateError};
use crate::rules::{EmbeddedRuleEvaluator, RuleContext, RuleSet};
use crate::scoring::{rank_weighted, FieldSimilarities};
use crate::similarity::{relevance_rank, Capabilities, PrimitiveSource};
use crate::store::TemplateStore;
use crate::types::{rank_order, MatchCandidate, MatchStrategy, Template, TemplateFilter};

pub struct MatchingEngine {
    store: Arc<dyn TemplateStore>,
    semantic: Option<Arc<dyn SemanticMatcher>>,
    rules: Arc<dyn RuleEvaluator>,
    config: MatchingConfig,
    capabilities: Capabilities,
}

impl MatchingEngine {
    /// Create an engine over `store`, probing its native capabilities once.
    ///
    /// Rule Match uses the [`EmbeddedRuleEvaluator`] until another evaluator
    /// is supplied. Semantic Match is unavailable until a matcher is supplied.
    pub async fn new(store: Arc<dyn TemplateStore>, config: MatchingConfig) -> Result<Self> {
        config.validate()?;
        let capabilities = store.capabilities().await;
        info!(
            "MatchingEngine initialised (native fuzzy: {}, native rank: {})",
            capabilities.native_fuzzy, capabilities.native_rank
        );
        Ok(Self {
            store,
            semantic: None,
            rules: Arc::new(EmbeddedRuleEvaluator),
            config,
            capabilities,
        })
    }

    pub fn with_semantic_matcher(mut self, matcher: Arc<dyn SemanticMatcher>) -> Self {
        self.semantic = Some(matcher);
        self
    }

    pub fn with_rule_evaluator(mut self, evaluator: Arc<dyn RuleEvaluator>) -> Self {
        self.rules = evaluator;
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Run a collaborator call under the configured timeout.
    async fn bounded<T>(
        &self,
        service: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = self.config.collaborator_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(TemplateError::Timeout {
                service,
                after_ms: limit.as_millis() as u64,
            }),
        }
    }

    /// Whether the store holds any template. A failing count is treated as
    /// "unknown" so the caller proceeds to the normal paths.
    async fn store_is_empty(&self) -> bool {
        match self.store.count_templates().await {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => {
                warn!("Template count failed, continuing: {}", e);
                false
            }
        }
    }

    // =========================================================================
    // Semantic Match
    // =========================================================================

    /// Pass the candidate set to the external semantic matcher and return its
    /// ranking unchanged. Scores are `1 / (rank + 1)`.
    #[instrument(skip(self), fields(query = %query))]
    pub async fn find_by_semantic_match(
        &self,
        query: &str,
        latest_only: bool,
    ) -> Result<Vec<MatchCandidate>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let matcher = self
            .semantic
            .as_ref()
            .ok_or_else(|| TemplateError::unavailable("semantic matcher", "not configured"))?;

        let candidates = self
            .store
            .list_templates(TemplateFilter { latest_only })
            .await
            .map_err(|e| TemplateError::unavailable("template store", e))?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let ranked = self
            .bounded(
                "semantic matcher",
                matcher.match_templates(query, &candidates),
            )
            .await
            .map_err(|e| match e {
                TemplateError::ServiceUnavailable { .. } | TemplateError::Timeout { .. } => e,
                other => TemplateError::unavailable("semantic matcher", other),
            })?;

        debug!("Semantic matcher returned {} templates", ranked.len());
        Ok(ranked
            .into_iter()
            .enumerate()
            .map(|(rank, template)| MatchCandidate {
                template,
                score: 1.0 / (rank as f64 + 1.0),
                strategy: MatchStrategy::Semantic,
            })
            .collect())
    }

    // =========================================================================
    // Pattern/Weighted Match
    // =========================================================================

    /// Rank templates by the fused fuzzy score of their name, semantic model,
    /// name pattern and rule presence.
    ///
    /// Errors only when neither the native path nor the in-process fallback
    /// could read the candidate set.
    #[instrument(skip(self), fields(query = %query))]
    pub async fn intelligent_recommendations(
        &self,
        query: &str,
        threshold: f64,
        top_n: usize,
        latest_only: bool,
    ) -> Result<Vec<MatchCandidate>> {
        let query = query.trim();
        if query.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }
        if self.store_is_empty().await {
            debug!("No templates stored, skipping weighted match");
            return Ok(Vec::new());
        }

        let filter = TemplateFilter { latest_only };
        let (rows, source) = match self.native_field_similarities(query, filter).await {
            Some(rows) => (rows, PrimitiveSource::Datastore),
            None => {
                let candidates = self
                    .store
                    .list_templates(filter)
                    .await
                    .map_err(|e| TemplateError::unavailable("template store", e))?;
                let rows = candidates
                    .into_iter()
                    .map(|t| FieldSimilarities::compute(t, query))
                    .collect();
                (rows, PrimitiveSource::InProcess)
            }
        };

        let ranked = rank_weighted(rows, query, threshold, top_n, &self.config.weights);
        debug!(
            "Weighted match produced {} candidates ({:?} primitives)",
            ranked.len(),
            source
        );
        Ok(ranked)
    }

    async fn native_field_similarities(
        &self,
        query: &str,
        filter: TemplateFilter,
    ) -> Option<Vec<FieldSimilarities>> {
        if !self.capabilities.native_fuzzy {
            return None;
        }
        match self.store.field_similarities(query, filter).await {
            Ok(rows) => Some(rows),
            Err(e) => {
                warn!("Native fuzzy scoring failed, falling back to in-process: {}", e);
                None
            }
        }
    }

    // =========================================================================
    // Business Match
    // =========================================================================

    /// Rank templates for a business description and the file types the
    /// caller expects to attach.
    #[instrument(skip(self, expected_file_types), fields(description = %description))]
    pub async fn recommend_by_business(
        &self,
        description: &str,
        expected_file_types: &[String],
        expected_levels: usize,
        latest_only: bool,
    ) -> Result<Vec<MatchCandidate>> {
        let query = BusinessQuery::from_description(description, &self.config.business);
        if query.is_empty() || expected_levels == 0 {
            return Ok(Vec::new());
        }
        if self.store_is_empty().await {
            return Ok(Vec::new());
        }

        let query_string = query.to_query_string();
        debug!(
            "Business query '{}' (vocabulary match: {})",
            query_string, query.from_vocabulary
        );

        let filter = TemplateFilter { latest_only };
        let rows = match self.native_name_relevance(&query_string, filter).await {
            Some(rows) => rows,
            None => self
                .store
                .list_templates(filter)
                .await
                .map_err(|e| TemplateError::unavailable("template store", e))?
                .into_iter()
                .map(|t| {
                    let rank = relevance_rank(&t.name, &query_string);
                    (t, rank)
                })
                .collect(),
        };

        Ok(rank_business(
            rows,
            expected_file_types,
            expected_levels,
            &self.config.business,
        ))
    }

    async fn native_name_relevance(
        &self,
        query: &str,
        filter: TemplateFilter,
    ) -> Option<Vec<(Template, f64)>> {
        if !self.capabilities.native_rank {
            return None;
        }
        match self.store.name_relevance(query, filter).await {
            Ok(rows) => Some(rows),
            Err(e) => {
                warn!("Native relevance rank failed, falling back to in-process: {}", e);
                None
            }
        }
    }

    // =========================================================================
    // Rule Match
    // =========================================================================

    /// Templates with at least one rule that succeeds against `context`.
    ///
    /// Malformed rule expressions and failed or timed-out evaluations exclude
    /// the template and are logged; they never fail the call. Score is the
    /// fraction of the template's rules that succeeded.
    #[instrument(skip(self, context))]
    pub async fn find_by_rule_match(
        &self,
        context: &RuleContext,
        latest_only: bool,
    ) -> Result<Vec<MatchCandidate>> {
        let candidates = self
            .store
            .list_templates(TemplateFilter { latest_only })
            .await?;

        let parsed: Vec<(Template, RuleSet)> = candidates
            .into_iter()
            .filter_map(|template| {
                let expression = template.rule_expression()?;
                match RuleSet::from_json(expression) {
                    Ok(rule_set) => Some((template, rule_set)),
                    Err(e) => {
                        let error = TemplateError::MalformedRule {
                            template_id: template.id,
                            reason: e.to_string(),
                        };
                        warn!("Excluding '{}': {}", template.name, error);
                        None
                    }
                }
            })
            .collect();

        let evaluations = parsed.into_iter().map(|(template, rule_set)| async move {
            let outcome = self
                .bounded(
                    "rule evaluator",
                    self.rules.execute_all_rules(&rule_set, context),
                )
                .await;
            (template, rule_set, outcome)
        });

        let mut matches: Vec<MatchCandidate> = join_all(evaluations)
            .await
            .into_iter()
            .filter_map(|(template, rule_set, outcome)| {
                let results = match outcome {
                    Ok(results) => results,
                    Err(e) => {
                        warn!(
                            "Excluding template {} ({}): rule set '{}' failed: {}",
                            template.id, template.name, rule_set.name, e
                        );
                        return None;
                    }
                };
                for failed in results.iter().filter_map(|r| r.error.as_ref().map(|e| (r, e))) {
                    warn!(
                        "Rule '{}' in '{}' on template {} errored: {}",
                        failed.0.rule_name, rule_set.name, template.id, failed.1
                    );
                }
                let succeeded = results.iter().filter(|r| r.is_success).count();
                (succeeded > 0).then(|| MatchCandidate {
                    score: succeeded as f64 / results.len() as f64,
                    template,
                    strategy: MatchStrategy::Rule,
                })
            })
            .collect();

        matches.sort_by(rank_order);
        Ok(matches)
    }

    // =========================================================================
    // Combined recommendation
    // =========================================================================

    /// Run every requested strategy concurrently under one deadline.
    ///
    /// Strategies that fail or miss the deadline are reported in
    /// [`Recommendations::incomplete`]; the others keep their results. If every
    /// requested strategy failed the call returns [`TemplateError::Cancelled`].
    #[instrument(skip(self, request))]
    pub async fn recommend(&self, request: &RecommendationRequest) -> Result<Recommendations> {
        let deadline = request
            .deadline
            .unwrap_or_else(|| self.config.collaborator_timeout());
        let latest_only = request.latest_only;

        let semantic = run_arm(
            deadline,
            request
                .semantic_query
                .as_deref()
                .map(|query| self.find_by_semantic_match(query, latest_only)),
        );
        let weighted = run_arm(
            deadline,
            request.weighted.as_ref().map(|w| {
                self.intelligent_recommendations(&w.query, w.threshold, w.top_n, latest_only)
            }),
        );
        let business = run_arm(
            deadline,
            request.business.as_ref().map(|b| {
                self.recommend_by_business(
                    &b.description,
                    &b.expected_file_types,
                    b.expected_levels,
                    latest_only,
                )
            }),
        );
        let rules = run_arm(
            deadline,
            request
                .rule_context
                .as_ref()
                .map(|ctx| self.find_by_rule_match(ctx, latest_only)),
        );

        let (semantic, weighted, business, rules) =
            tokio::join!(semantic, weighted, business, rules);

        let mut out = Recommendations::default();
        let mut requested = 0;
        for (kind, outcome) in [
            (RecommendationKind::Semantic, semantic),
            (RecommendationKind::Weighted, weighted),
            (RecommendationKind::Business, business),
            (RecommendationKind::Rule, rules),
        ] {
            match outcome {
                ArmOutcome::Skipped => {}
                ArmOutcome::Done(candidates) => {
                    requested += 1;
                    *out.slot(kind) = Some(candidates);
                }
                ArmOutcome::Failed(reason) => {
                    requested += 1;
                    warn!("{} recommendations incomplete: {}", kind.as_str(), reason);
                    out.incomplete.push(StrategyFailure { kind, reason });
                }
            }
        }

        if requested == 0 {
            return Err(TemplateError::InvalidInput(
                "no recommendation strategy requested".into(),
            ));
        }
        if out.incomplete.len() == requested {
            return Err(TemplateError::Cancelled(format!(
                "all {} requested strategies failed or timed out",
                requested
            )));
        }
        Ok(out)
    }
}

enum ArmOutcome {
    Skipped,
    Done(Vec<MatchCandidate>),
    Failed(String),
}

async fn run_arm<F>(deadline: Duration, arm: Option<F>) -> ArmOutcome
where
    F: Future<Output = Result<Vec<MatchCandidate>>>,
{
    let Some(arm) = arm else {
        return ArmOutcome::Skipped;
    };
    match tokio::time::timeout(deadline, arm).await {
        Ok(Ok(candidates)) => ArmOutcome::Done(candidates),
        Ok(Err(e)) => ArmOutcome::Failed(e.to_string()),
        Err(_) => ArmOutcome::Failed(format!("deadline of {}ms elapsed", deadline.as_millis())),
    }
}

/// Parameters of the Pattern/Weighted arm of a combined request.
#[derive(Debug, Clone)]
pub struct WeightedRequest {
    pub query: String,
    pub threshold: f64,
    pub top_n: usize,
}

/// Parameters of the Business arm of a combined request.
#[derive(Debug, Clone)]
pub struct BusinessRequest {
    pub description: String,
    pub expected_file_types: Vec<String>,
    pub expected_levels: usize,
}

/// A combined recommendation request. Each `Some` arm is run.
#[derive(Debug, Clone, Default)]
pub struct RecommendationRequest {
    pub semantic_query: Option<String>,
    pub weighted: Option<WeightedRequest>,
    pub business: Option<BusinessRequest>,
    pub rule_context: Option<RuleContext>,
    pub latest_only: bool,
    /// Defaults to the configured collaborator timeout.
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Semantic,
    Weighted,
    Business,
    Rule,
}

impl RecommendationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Weighted => "weighted",
            Self::Business => "business",
            Self::Rule => "rule",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyFailure {
    pub kind: RecommendationKind,
    pub reason: String,
}

/// Per-strategy results of [`MatchingEngine::recommend`]. `None` means the
/// strategy was not requested or did not complete.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Recommendations {
    pub semantic: Option<Vec<MatchCandidate>>,
    pub weighted: Option<Vec<MatchCandidate>>,
    pub business: Option<Vec<MatchCandidate>>,
    pub rules: Option<Vec<MatchCandidate>>,
    pub incomplete: Vec<StrategyFailure>,
}

impl Recommendations {
    fn slot(&mut self, kind: RecommendationKind) -> &mut Option<Vec<MatchCandidate>> {
        match kind {
            RecommendationKind::Semantic => &mut self.semantic,
            RecommendationKind::Weighted => &mut self.weighted,
            RecommendationKind::Business => &mut self.business,
            RecommendationKind::Rule => &mut self.rules,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryTemplateStore, VersionMode};
    use crate::types::TemplateDraft;

    async fn engine_with(drafts: Vec<TemplateDraft>) -> MatchingEngine {
        let store = Arc::new(InMemoryTemplateStore::new());
        for draft in drafts {
            store
                .insert_version(draft, VersionMode::NewLineage)
                .await
                .unwrap();
        }
        MatchingEngine::new(store, MatchingConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_invoice_query_prefers_semantic_field() {
        let engine = engine_with(vec![
            TemplateDraft::new("Invoice Template").semantic_model("invoice,bill"),
            TemplateDraft::new("Contract"),
        ])
        .await;
        let ranked = engine
            .intelligent_recommendations("invoice", 0.3, 10, false)
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].template.name, "Invoice Template");
        assert_eq!(ranked[0].strategy, MatchStrategy::SemanticField);
        assert!((ranked[0].score - 1.04).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_blank_query_is_empty() {
        let engine = engine_with(vec![TemplateDraft::new("Invoice")]).await;
        assert!(engine
            .intelligent_recommendations("   ", 0.0, 10, false)
            .await
            .unwrap()
            .is_empty());
        assert!(engine
            .find_by_semantic_match("", false)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_semantic_without_matcher_is_unavailable() {
        let engine = engine_with(vec![TemplateDraft::new("Invoice")]).await;
        let err = engine
            .find_by_semantic_match("invoice", false)
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::ServiceUnavailable { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_business_match_prefers_vocabulary() {
        let engine = engine_with(vec![
            TemplateDraft::new("Invoice").sequence(2),
            TemplateDraft::new("Contract").semantic_model("contract").sequence(1),
            TemplateDraft::new("Site Photos"),
        ])
        .await;
        let ranked = engine
            .recommend_by_business("Please attach the contract", &[], 5, false)
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].template.name, "Contract");
        assert!((ranked[0].score - 1.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_recommend_requires_a_strategy() {
        let engine = engine_with(vec![]).await;
        let err = engine
            .recommend(&RecommendationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::InvalidInput(_)));
    }
}
