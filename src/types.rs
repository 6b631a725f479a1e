//! Template records and the transient match annotations produced by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node in the template tree and one version in a named lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    /// Positive, strictly increasing within one `name`.
    pub version: i32,
    pub is_latest: bool,
    pub parent_id: Option<Uuid>,
    /// Comma-delimited keywords. The strongest matching signal.
    pub semantic_model: Option<String>,
    /// Naming template, e.g. `{Type}_{ProjectName}_{Date}`.
    pub name_pattern: Option<String>,
    /// JSON-serialized [`RuleSet`](crate::rules::RuleSet).
    pub rule_expression: Option<String>,
    pub sequence_number: i32,
    /// Children are auto-instantiated when the template is applied.
    pub is_static: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl Template {
    pub fn semantic_model(&self) -> Option<&str> {
        non_empty(&self.semantic_model)
    }

    pub fn name_pattern(&self) -> Option<&str> {
        non_empty(&self.name_pattern)
    }

    pub fn rule_expression(&self) -> Option<&str> {
        non_empty(&self.rule_expression)
    }

    /// Case-insensitive containment of an already lower-cased query in the
    /// name, semantic model or name pattern.
    pub fn mentions(&self, query_lower: &str) -> bool {
        [
            Some(self.name.as_str()),
            self.semantic_model(),
            self.name_pattern(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(query_lower))
    }

    /// Keywords of the semantic model, split on the delimiter, trimmed.
    pub fn semantic_keywords(&self) -> Vec<String> {
        self.semantic_model()
            .map(|model| {
                model
                    .split([',', ';', '，', '；'])
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Input for creating a template version. The store assigns `id`, `version`
/// and `is_latest`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateDraft {
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub semantic_model: Option<String>,
    pub name_pattern: Option<String>,
    pub rule_expression: Option<String>,
    pub sequence_number: i32,
    pub is_static: bool,
}

impl TemplateDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn semantic_model(mut self, model: impl Into<String>) -> Self {
        self.semantic_model = Some(model.into());
        self
    }

    pub fn name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }

    pub fn rule_expression(mut self, expression: impl Into<String>) -> Self {
        self.rule_expression = Some(expression.into());
        self
    }

    pub fn sequence(mut self, sequence_number: i32) -> Self {
        self.sequence_number = sequence_number;
        self
    }

    pub fn is_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }
}

impl From<&Template> for TemplateDraft {
    fn from(t: &Template) -> Self {
        Self {
            name: t.name.clone(),
            parent_id: t.parent_id,
            semantic_model: t.semantic_model.clone(),
            name_pattern: t.name_pattern.clone(),
            rule_expression: t.rule_expression.clone(),
            sequence_number: t.sequence_number,
            is_static: t.is_static,
        }
    }
}

/// Field changes carried into the next version of a lineage.
///
/// Outer `None` keeps the base version's value; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateChanges {
    pub parent_id: Option<Option<Uuid>>,
    pub semantic_model: Option<Option<String>>,
    pub name_pattern: Option<Option<String>>,
    pub rule_expression: Option<Option<String>>,
    pub sequence_number: Option<i32>,
    pub is_static: Option<bool>,
}

impl TemplateChanges {
    pub fn apply(self, mut draft: TemplateDraft) -> TemplateDraft {
        if let Some(parent_id) = self.parent_id {
            draft.parent_id = parent_id;
        }
        if let Some(model) = self.semantic_model {
            draft.semantic_model = model;
        }
        if let Some(pattern) = self.name_pattern {
            draft.name_pattern = pattern;
        }
        if let Some(expression) = self.rule_expression {
            draft.rule_expression = expression;
        }
        if let Some(seq) = self.sequence_number {
            draft.sequence_number = seq;
        }
        if let Some(is_static) = self.is_static {
            draft.is_static = is_static;
        }
        draft
    }
}

/// Candidate-set selection for listing and matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemplateFilter {
    pub latest_only: bool,
}

impl TemplateFilter {
    pub fn all() -> Self {
        Self { latest_only: false }
    }

    pub fn latest() -> Self {
        Self { latest_only: true }
    }

    pub fn admits(&self, template: &Template) -> bool {
        !self.latest_only || template.is_latest
    }
}

/// Which strategy (or which weighted arm of the Pattern/Weighted Match)
/// produced a candidate's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// External semantic matcher pass-through.
    Semantic,
    /// Weighted arm over name + semantic model.
    SemanticField,
    /// Weighted arm over name + name pattern.
    PatternField,
    /// Weighted arm for templates carrying a rule expression.
    RuleField,
    /// Name-only arm, always active.
    BaseName,
    Business,
    Rule,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::SemanticField => "semantic_field",
            Self::PatternField => "pattern_field",
            Self::RuleField => "rule_field",
            Self::BaseName => "base_name",
            Self::Business => "business",
            Self::Rule => "rule",
        }
    }
}

impl std::fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A template annotated with a score computed for one query.
///
/// Scores are comparable only within the query that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub template: Template,
    pub score: f64,
    pub strategy: MatchStrategy,
}

impl MatchCandidate {
    pub fn id(&self) -> Uuid {
        self.template.id
    }
}

/// Descending score, then ascending sequence number, then ascending id.
pub(crate) fn rank_order(a: &MatchCandidate, b: &MatchCandidate) -> std::cmp::Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.template.sequence_number.cmp(&b.template.sequence_number))
        .then_with(|| a.template.id.cmp(&b.template.id))
}
