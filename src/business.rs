//! Business Match: rank templates for a free-text business description.

use serde::Serialize;

use crate::config::BusinessMatchConfig;
use crate::keywords::tokens;
use crate::types::{rank_order, MatchCandidate, MatchStrategy, Template};

/// Relevance query derived from a business description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusinessQuery {
    pub keywords: Vec<String>,
    /// Whether the keywords came from the configured vocabulary rather than
    /// the raw-token fallback.
    pub from_vocabulary: bool,
}

impl BusinessQuery {
    /// Vocabulary terms found in the description, in vocabulary order. When
    /// none match, the first `fallback_token_count` tokens of at least
    /// `fallback_min_length` characters.
    pub fn from_description(description: &str, config: &BusinessMatchConfig) -> Self {
        let lowered = description.to_lowercase();
        let matched: Vec<String> = config
            .vocabulary
            .iter()
            .map(|term| term.trim().to_lowercase())
            .filter(|term| !term.is_empty() && lowered.contains(term.as_str()))
            .fold(Vec::new(), |mut acc, term| {
                if !acc.contains(&term) {
                    acc.push(term);
                }
                acc
            });
        if !matched.is_empty() {
            return Self {
                keywords: matched,
                from_vocabulary: true,
            };
        }

        let keywords = tokens(&lowered)
            .filter(|t| t.chars().count() >= config.fallback_min_length)
            .take(config.fallback_token_count)
            .map(String::from)
            .collect();
        Self {
            keywords,
            from_vocabulary: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Terms joined with `|`, the form both the datastore rank function and
    /// [`relevance_rank`](crate::similarity::relevance_rank) accept.
    pub fn to_query_string(&self) -> String {
        self.keywords.join(" | ")
    }
}

/// Maximum of the boosts applicable to the template, applied to its rank.
pub fn business_score(template: &Template, rank: f64, config: &BusinessMatchConfig) -> f64 {
    let mut boosts = Vec::with_capacity(2);
    if template.semantic_model().is_some() {
        boosts.push(config.semantic_boost);
    }
    if template.rule_expression().is_some() {
        boosts.push(config.rule_boost);
    }
    let boost = boosts.into_iter().reduce(f64::max).unwrap_or(config.base_boost);
    rank * boost
}

/// Filter and order `(template, name rank)` rows.
///
/// Kept when the rank exceeds the configured floor or the name contains one of
/// the expected file-type tags. Ordered by business score, then sequence
/// number, then id; at most `limit` results.
pub fn rank_business(
    rows: Vec<(Template, f64)>,
    expected_file_types: &[String],
    limit: usize,
    config: &BusinessMatchConfig,
) -> Vec<MatchCandidate> {
    let tags: Vec<String> = expected_file_types
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    let mut ranked: Vec<MatchCandidate> = rows
        .into_iter()
        .filter(|(_, rank)| rank.is_finite())
        .filter(|(template, rank)| {
            let name = template.name.to_lowercase();
            *rank > config.relevance_floor || tags.iter().any(|tag| name.contains(tag.as_str()))
        })
        .map(|(template, rank)| MatchCandidate {
            score: business_score(&template, rank, config),
            template,
            strategy: MatchStrategy::Business,
        })
        .collect();

    ranked.sort_by(rank_order);
    ranked.truncate(limit);
    ranked
}
