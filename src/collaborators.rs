//! Contracts for the external services the engine consumes.
//!
//! Implementations live outside this crate (embedding services, rules engines,
//! OCR/AI text analysis). Calls are bounded by
//! [`MatchingConfig::collaborator_timeout`](crate::config::MatchingConfig::collaborator_timeout).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TemplateError;
use crate::keywords::extract_keywords;
use crate::rules::{RuleContext, RuleResult, RuleSet};
use crate::types::Template;

/// Ranks candidate templates for a free-text query (embedding/AI service).
///
/// The returned order is taken as-is; no score contract.
#[async_trait]
pub trait SemanticMatcher: Send + Sync {
    async fn match_templates(
        &self,
        query: &str,
        candidates: &[Template],
    ) -> Result<Vec<Template>, TemplateError>;
}

/// Evaluates every rule of a rule set against a runtime context.
#[async_trait]
pub trait RuleEvaluator: Send + Sync {
    async fn execute_all_rules(
        &self,
        rule_set: &RuleSet,
        context: &RuleContext,
    ) -> Result<Vec<RuleResult>, TemplateError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextAnalysis {
    pub summary: String,
    pub keywords: Vec<String>,
}

/// Summarises text and extracts keywords (OCR/AI provider).
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    async fn analyze_text(&self, text: &str) -> Result<TextAnalysis, TemplateError>;
}

/// Provider that needs no external service: first sentence as summary,
/// frequency-ranked keywords.
#[derive(Debug, Clone)]
pub struct LocalTextAnalyzer {
    pub min_length: usize,
    pub max_count: usize,
    pub max_summary_chars: usize,
}

impl Default for LocalTextAnalyzer {
    fn default() -> Self {
        Self {
            min_length: crate::keywords::DEFAULT_MIN_LENGTH,
            max_count: crate::keywords::DEFAULT_MAX_COUNT,
            max_summary_chars: 200,
        }
    }
}

#[async_trait]
impl TextAnalyzer for LocalTextAnalyzer {
    async fn analyze_text(&self, text: &str) -> Result<TextAnalysis, TemplateError> {
        let first_sentence = text
            .split_terminator(['.', '!', '?', '\n', '。', '！', '？'])
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or("");
        Ok(TextAnalysis {
            summary: first_sentence
                .chars()
                .take(self.max_summary_chars)
                .collect(),
            keywords: extract_keywords(text, self.min_length, self.max_count),
        })
    }
}
