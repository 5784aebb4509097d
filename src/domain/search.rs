// Copyright (c) 2025 - Cowboy AI, Inc.
//! Structured entity queries
//!
//! Criteria are a list of filter groups. Filters combine conjunctively
//! within a group and disjunctively across groups. Field paths address
//! either a top-level entity field (`name`, `guid`, `externalId`,
//! `type`, `version`) or a nested payload value via dotted `data.*`
//! keys. The operator set is closed.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::Entity;

/// Default page size for search results
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Closed set of filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Regex,
}

/// A single field filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    /// Field path, e.g. `name` or `data.address.region`
    pub field: String,

    /// Comparison operator
    pub op: FilterOp,

    /// Comparison operand; an array for `in`, a pattern string for
    /// `regex`
    pub value: Value,
}

impl FieldFilter {
    /// Construct a filter
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Evaluate this filter against one entity
    ///
    /// A missing field only satisfies `neq`; ill-typed comparisons
    /// (e.g. `gt` on a non-number) evaluate to false rather than erroring,
    /// so one bad filter cannot poison a whole result set.
    pub fn matches(&self, entity: &Entity) -> bool {
        let actual = resolve_path(entity, &self.field);
        match self.op {
            FilterOp::Eq => actual.as_ref() == Some(&self.value),
            FilterOp::Neq => actual.as_ref() != Some(&self.value),
            FilterOp::Gt => compare_numeric(actual.as_ref(), &self.value, |o| o > 0.0),
            FilterOp::Gte => compare_numeric(actual.as_ref(), &self.value, |o| o >= 0.0),
            FilterOp::Lt => compare_numeric(actual.as_ref(), &self.value, |o| o < 0.0),
            FilterOp::Lte => compare_numeric(actual.as_ref(), &self.value, |o| o <= 0.0),
            FilterOp::In => match (&actual, self.value.as_array()) {
                (Some(actual), Some(candidates)) => candidates.contains(actual),
                _ => false,
            },
            FilterOp::Regex => match (&actual, self.value.as_str()) {
                (Some(Value::String(actual)), Some(pattern)) => Regex::new(pattern)
                    .map(|re| re.is_match(actual))
                    .unwrap_or(false),
                _ => false,
            },
        }
    }
}

/// Query criteria: disjunction of conjunctive filter groups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Filter groups; an entity matches if every filter of at least one
    /// group matches. An empty list matches everything.
    pub groups: Vec<Vec<FieldFilter>>,

    /// Number of leading matches to skip
    #[serde(default)]
    pub offset: usize,

    /// Page size, defaults to [`DEFAULT_SEARCH_LIMIT`]
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchCriteria {
    /// Criteria with a single conjunctive group
    pub fn all_of(filters: Vec<FieldFilter>) -> Self {
        Self {
            groups: vec![filters],
            offset: 0,
            limit: None,
        }
    }

    /// Effective page size
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT)
    }

    /// Evaluate the criteria against one entity
    pub fn matches(&self, entity: &Entity) -> bool {
        if self.groups.is_empty() {
            return true;
        }
        self.groups
            .iter()
            .any(|group| group.iter().all(|filter| filter.matches(entity)))
    }
}

/// Resolve a dotted field path against an entity
///
/// Top-level names address entity fields; `data.*` descends into the
/// payload.
fn resolve_path(entity: &Entity, path: &str) -> Option<Value> {
    let mut parts = path.split('.');
    match parts.next()? {
        "guid" => Some(json!(entity.guid)),
        "externalId" => entity.external_id.as_ref().map(|id| json!(id)),
        "type" => serde_json::to_value(entity.kind).ok(),
        "name" => Some(json!(entity.name)),
        "version" => Some(json!(entity.version)),
        "deleted" => Some(json!(entity.deleted)),
        "data" => {
            let mut current = Value::Object(entity.data.clone());
            for part in parts {
                current = current.get(part)?.clone();
            }
            Some(current)
        }
        _ => None,
    }
}

fn compare_numeric(actual: Option<&Value>, expected: &Value, accept: fn(f64) -> bool) -> bool {
    match (actual.and_then(Value::as_f64), expected.as_f64()) {
        (Some(a), Some(b)) => accept(a - b),
        _ => false,
    }
}
