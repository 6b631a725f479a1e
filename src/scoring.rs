//! Score fusion for the Pattern/Weighted Match.
//!
//! Both the datastore-accelerated path and the in-process fallback produce
//! [`FieldSimilarities`] rows; fusion, filtering and ordering happen here for
//! both, so the two paths can only differ in the primitive values.

use tracing::warn;

use crate::config::ScoringWeights;
use crate::similarity::fuzzy_similarity;
use crate::types::{rank_order, MatchCandidate, MatchStrategy, Template};

/// Fuzzy similarity of each matchable field of one template against a query.
///
/// `semantic_model` and `name_pattern` are `None` when the template's field is
/// empty, which disables the corresponding weighted arm.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSimilarities {
    pub template: Template,
    pub name: f64,
    pub semantic_model: Option<f64>,
    pub name_pattern: Option<f64>,
}

impl FieldSimilarities {
    /// In-process computation.
    pub fn compute(template: Template, query: &str) -> Self {
        let name = fuzzy_similarity(&template.name, query);
        let semantic_model = template
            .semantic_model()
            .map(|model| fuzzy_similarity(model, query));
        let name_pattern = template
            .name_pattern()
            .map(|pattern| fuzzy_similarity(pattern, query));
        Self {
            template,
            name,
            semantic_model,
            name_pattern,
        }
    }

    /// Maximum of the active weighted arms, with the arm that produced it.
    ///
    /// On equal scores the earlier arm wins: semantic field, name pattern,
    /// rule, base.
    pub fn fuse(&self, w: &ScoringWeights) -> (f64, MatchStrategy) {
        let mut arms: Vec<(f64, MatchStrategy)> = Vec::with_capacity(4);
        if let Some(sem) = self.semantic_model {
            arms.push((
                (w.semantic_name_share * self.name + w.semantic_model_share * sem)
                    * w.semantic_boost,
                MatchStrategy::SemanticField,
            ));
        }
        if let Some(pat) = self.name_pattern {
            arms.push((
                (w.pattern_name_share * self.name + w.pattern_field_share * pat) * w.pattern_boost,
                MatchStrategy::PatternField,
            ));
        }
        if self.template.rule_expression().is_some() {
            arms.push((self.name * w.rule_boost, MatchStrategy::RuleField));
        }
        arms.push((self.name * w.base_boost, MatchStrategy::BaseName));

        arms.into_iter()
            .reduce(|best, arm| if arm.0 > best.0 { arm } else { best })
            .unwrap_or((0.0, MatchStrategy::BaseName))
    }
}

/// Fuse, filter and order rows for one query.
///
/// A row is kept if the query is contained in the template's name, semantic
/// model or name pattern, or if its fused score is strictly greater than
/// `threshold`. Rows with a non-finite score are logged and skipped.
pub fn rank_weighted(
    rows: Vec<FieldSimilarities>,
    query: &str,
    threshold: f64,
    top_n: usize,
    weights: &ScoringWeights,
) -> Vec<MatchCandidate> {
    let query_lower = query.trim().to_lowercase();
    let mut ranked: Vec<MatchCandidate> = rows
        .into_iter()
        .filter_map(|row| {
            let (score, strategy) = row.fuse(weights);
            if !score.is_finite() {
                warn!(
                    "Skipping template {} ({}): non-finite score",
                    row.template.id, row.template.name
                );
                return None;
            }
            (row.template.mentions(&query_lower) || score > threshold).then(|| MatchCandidate {
                template: row.template,
                score,
                strategy,
            })
        })
        .collect();

    ranked.sort_by(rank_order);
    ranked.truncate(top_n);
    ranked
}
