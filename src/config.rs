//! Matching configuration.
//!
//! Loaded once at startup from YAML or environment variables. Every scoring
//! constant the engine uses lives here so callers can probe boundaries without
//! recompiling.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TemplateError};
use crate::keywords::{DEFAULT_MAX_COUNT, DEFAULT_MIN_LENGTH};

/// Weights of the four arms of the Pattern/Weighted Match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Share of the name similarity in the semantic-field arm.
    pub semantic_name_share: f64,
    /// Share of the semantic-model similarity in the semantic-field arm.
    pub semantic_model_share: f64,
    pub semantic_boost: f64,
    pub pattern_name_share: f64,
    pub pattern_field_share: f64,
    pub pattern_boost: f64,
    pub rule_boost: f64,
    pub base_boost: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic_name_share: 0.4,
            semantic_model_share: 0.6,
            semantic_boost: 1.3,
            pattern_name_share: 0.5,
            pattern_field_share: 0.5,
            pattern_boost: 1.1,
            rule_boost: 1.0,
            base_boost: 0.8,
        }
    }
}

impl ScoringWeights {
    fn all(&self) -> [(&'static str, f64); 8] {
        [
            ("semantic_name_share", self.semantic_name_share),
            ("semantic_model_share", self.semantic_model_share),
            ("semantic_boost", self.semantic_boost),
            ("pattern_name_share", self.pattern_name_share),
            ("pattern_field_share", self.pattern_field_share),
            ("pattern_boost", self.pattern_boost),
            ("rule_boost", self.rule_boost),
            ("base_boost", self.base_boost),
        ]
    }
}

/// Business Match keyword vocabulary and boosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessMatchConfig {
    /// Domain terms looked for in a business description, in priority order.
    pub vocabulary: Vec<String>,
    /// Tokens taken from the description when no vocabulary term matches.
    pub fallback_token_count: usize,
    /// Minimum character length of a fallback token.
    pub fallback_min_length: usize,
    /// Relevance rank a candidate must exceed unless a file-type tag matches.
    pub relevance_floor: f64,
    pub semantic_boost: f64,
    pub rule_boost: f64,
    pub base_boost: f64,
}

const DEFAULT_VOCABULARY: &[&str] = &[
    "contract",
    "invoice",
    "receipt",
    "report",
    "drawing",
    "design",
    "specification",
    "budget",
    "procurement",
    "acceptance",
    "inspection",
    "meeting",
    "minutes",
    "approval",
    "certificate",
    "license",
    "payment",
    "settlement",
    "plan",
    "schedule",
];

impl Default for BusinessMatchConfig {
    fn default() -> Self {
        Self {
            vocabulary: DEFAULT_VOCABULARY.iter().map(|s| s.to_string()).collect(),
            fallback_token_count: 5,
            fallback_min_length: 2,
            relevance_floor: 0.01,
            semantic_boost: 1.2,
            rule_boost: 1.1,
            base_boost: 0.8,
        }
    }
}

/// Top-level matching configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub weights: ScoringWeights,
    pub business: BusinessMatchConfig,
    pub keyword_min_length: usize,
    pub keyword_max_count: usize,
    /// Upper bound for one call to an external collaborator.
    pub collaborator_timeout_ms: u64,
    /// Retries for a lineage promotion that hit a write conflict.
    pub promotion_max_retries: u32,
}

/// Upper bound for `promotion_max_retries`.
pub const MAX_PROMOTION_RETRIES: u32 = 10;

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            business: BusinessMatchConfig::default(),
            keyword_min_length: DEFAULT_MIN_LENGTH,
            keyword_max_count: DEFAULT_MAX_COUNT,
            collaborator_timeout_ms: 5_000,
            promotion_max_retries: 3,
        }
    }
}

impl MatchingConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| TemplateError::InvalidInput(format!("matching config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read matching config {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }

    /// Defaults overridden by `TEMPLATE_MATCH_*` environment variables.
    ///
    /// `TEMPLATE_MATCH_VOCABULARY` is a comma-separated list. Unparsable
    /// numeric values are ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        let w = &mut config.weights;
        env_f64("TEMPLATE_MATCH_SEMANTIC_BOOST", &mut w.semantic_boost);
        env_f64("TEMPLATE_MATCH_PATTERN_BOOST", &mut w.pattern_boost);
        env_f64("TEMPLATE_MATCH_RULE_BOOST", &mut w.rule_boost);
        env_f64("TEMPLATE_MATCH_BASE_BOOST", &mut w.base_boost);

        let b = &mut config.business;
        env_f64("TEMPLATE_MATCH_RELEVANCE_FLOOR", &mut b.relevance_floor);
        if let Ok(vocab) = std::env::var("TEMPLATE_MATCH_VOCABULARY") {
            b.vocabulary = vocab
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }

        env_parse(
            "TEMPLATE_MATCH_TIMEOUT_MS",
            &mut config.collaborator_timeout_ms,
        );
        env_parse(
            "TEMPLATE_MATCH_PROMOTION_RETRIES",
            &mut config.promotion_max_retries,
        );
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let business = [
            ("business.relevance_floor", self.business.relevance_floor),
            ("business.semantic_boost", self.business.semantic_boost),
            ("business.rule_boost", self.business.rule_boost),
            ("business.base_boost", self.business.base_boost),
        ];
        for (name, value) in self.weights.all().into_iter().chain(business) {
            if !value.is_finite() || value < 0.0 {
                return Err(TemplateError::InvalidInput(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.business.fallback_token_count == 0 {
            return Err(TemplateError::InvalidInput(
                "business.fallback_token_count must be at least 1".into(),
            ));
        }
        if self.collaborator_timeout_ms == 0 {
            return Err(TemplateError::InvalidInput(
                "collaborator_timeout_ms must be positive".into(),
            ));
        }
        if self.promotion_max_retries > MAX_PROMOTION_RETRIES {
            return Err(TemplateError::InvalidInput(format!(
                "promotion_max_retries must be at most {}, got {}",
                MAX_PROMOTION_RETRIES, self.promotion_max_retries
            )));
        }
        Ok(())
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }
}

fn env_f64(key: &str, target: &mut f64) {
    env_parse(key, target)
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Some(value) = std::env::var(key).ok().and_then(|s| s.parse().ok()) {
        *target = value;
    }
}
