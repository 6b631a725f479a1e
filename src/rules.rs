//! Rule expressions attached to templates.
//!
//! A template's `rule_expression` is a JSON-serialized [`RuleSet`]: a named
//! list of rules, each a tagged expression tree evaluated against a
//! [`RuleContext`] supplied at match time.
//!
//! ```json
//! {
//!   "name": "large-contracts",
//!   "rules": [{
//!     "name": "amount-over-1m",
//!     "condition": {
//!       "type": "all",
//!       "rules": [
//!         { "type": "compare", "field": "document.kind", "op": "eq", "value": "contract" },
//!         { "type": "compare", "field": "document.amount", "op": "gt", "value": 1000000 }
//!       ]
//!     }
//!   }]
//! }
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collaborators::RuleEvaluator;
use crate::error::TemplateError;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid rule set JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid rule set: {0}")]
    Invalid(String),

    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
}

/// A value in the runtime context or a rule literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<RuleValue>),
    Map(BTreeMap<String, RuleValue>),
}

impl RuleValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl From<bool> for RuleValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for RuleValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i64> for RuleValue {
    fn from(v: i64) -> Self {
        Self::Number(v as f64)
    }
}

impl From<i32> for RuleValue {
    fn from(v: i32) -> Self {
        Self::Number(v as f64)
    }
}

impl From<&str> for RuleValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for RuleValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<RuleValue>> From<Vec<T>> for RuleValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for RuleValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Null),
            Value::String(s) => Self::Text(s),
            Value::Array(items) => Self::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => Self::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

/// Named values a caller supplies for Rule Match. Keys may be looked up with
/// dotted paths into nested maps (`document.amount`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleContext {
    values: BTreeMap<String, RuleValue>,
}

impl RuleContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<RuleValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<RuleValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Build from a JSON object. Non-object input yields an empty context.
    pub fn from_json(value: serde_json::Value) -> Self {
        match RuleValue::from(value) {
            RuleValue::Map(values) => Self { values },
            _ => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Exact key first, then dotted navigation through nested maps.
    pub fn lookup(&self, path: &str) -> Option<&RuleValue> {
        if let Some(v) = self.values.get(path) {
            return Some(v);
        }
        let mut segments = path.split('.');
        let mut current = self.values.get(segments.next()?)?;
        for segment in segments {
            match current {
                RuleValue::Map(map) => current = map.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// Text contains text (case-insensitive) or list contains value.
    Contains,
    /// Context value is one of the listed values.
    In,
    StartsWith,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Contains => "contains",
            Self::In => "in",
            Self::StartsWith => "starts_with",
        }
    }
}

/// Rule expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleExpr {
    /// Compare the context value at `field` with a literal. A missing field
    /// never satisfies a comparison.
    Compare {
        field: String,
        op: CompareOp,
        value: RuleValue,
    },
    /// The context carries a non-null value at `field`.
    Exists { field: String },
    All { rules: Vec<RuleExpr> },
    Any { rules: Vec<RuleExpr> },
    Not { rule: Box<RuleExpr> },
    Literal { value: bool },
}

impl RuleExpr {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<RuleValue>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn evaluate(&self, ctx: &RuleContext) -> Result<bool, RuleError> {
        match self {
            Self::Compare { field, op, value } => match ctx.lookup(field) {
                None | Some(RuleValue::Null) => {
                    Ok(*op == CompareOp::Ne && *value != RuleValue::Null)
                }
                Some(actual) => compare(actual, *op, value),
            },
            Self::Exists { field } => {
                Ok(!matches!(ctx.lookup(field), None | Some(RuleValue::Null)))
            }
            Self::All { rules } => {
                for rule in rules {
                    if !rule.evaluate(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any { rules } => {
                for rule in rules {
                    if rule.evaluate(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not { rule } => Ok(!rule.evaluate(ctx)?),
            Self::Literal { value } => Ok(*value),
        }
    }
}

fn compare(actual: &RuleValue, op: CompareOp, expected: &RuleValue) -> Result<bool, RuleError> {
    use std::cmp::Ordering;
    use RuleValue::*;

    let mismatch = || RuleError::TypeMismatch {
        op: op.as_str(),
        left: actual.kind(),
        right: expected.kind(),
    };
    let ordering = || -> Result<Ordering, RuleError> {
        match (actual, expected) {
            (Number(a), Number(b)) => a.partial_cmp(b).ok_or_else(mismatch),
            (Text(a), Text(b)) => Ok(a.cmp(b)),
            _ => Err(mismatch()),
        }
    };

    match op {
        CompareOp::Eq => Ok(actual == expected),
        CompareOp::Ne => Ok(actual != expected),
        CompareOp::Gt => Ok(ordering()? == Ordering::Greater),
        CompareOp::Ge => Ok(ordering()? != Ordering::Less),
        CompareOp::Lt => Ok(ordering()? == Ordering::Less),
        CompareOp::Le => Ok(ordering()? != Ordering::Greater),
        CompareOp::Contains => match (actual, expected) {
            (Text(a), Text(b)) => Ok(a.to_lowercase().contains(&b.to_lowercase())),
            (List(items), v) => Ok(items.contains(v)),
            _ => Err(mismatch()),
        },
        CompareOp::In => match expected {
            List(items) => Ok(items.contains(actual)),
            _ => Err(mismatch()),
        },
        CompareOp::StartsWith => match (actual, expected) {
            (Text(a), Text(b)) => Ok(a.starts_with(b.as_str())),
            _ => Err(mismatch()),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub condition: RuleExpr,
}

/// A named set of rules; the unit stored in `Template::rule_expression`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_json(json: &str) -> Result<Self, RuleError> {
        let set: Self = serde_json::from_str(json)?;
        if set.name.trim().is_empty() {
            return Err(RuleError::Invalid("rule set name is empty".into()));
        }
        Ok(set)
    }

    pub fn to_json(&self) -> Result<String, RuleError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outcome of one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_name: String,
    pub is_success: bool,
    /// Set when the rule could not be evaluated (type mismatch).
    pub error: Option<String>,
}

/// In-process [`RuleEvaluator`] over the rule AST.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedRuleEvaluator;

impl EmbeddedRuleEvaluator {
    pub fn evaluate_set(rule_set: &RuleSet, context: &RuleContext) -> Vec<RuleResult> {
        rule_set
            .rules
            .iter()
            .map(|rule| match rule.condition.evaluate(context) {
                Ok(is_success) => RuleResult {
                    rule_name: rule.name.clone(),
                    is_success,
                    error: None,
                },
                Err(e) => RuleResult {
                    rule_name: rule.name.clone(),
                    is_success: false,
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }
}

#[async_trait]
impl RuleEvaluator for EmbeddedRuleEvaluator {
    async fn execute_all_rules(
        &self,
        rule_set: &RuleSet,
        context: &RuleContext,
    ) -> Result<Vec<RuleResult>, TemplateError> {
        Ok(Self::evaluate_set(rule_set, context))
    }
}
