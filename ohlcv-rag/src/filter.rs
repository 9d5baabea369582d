//! Metadata filter expressions.
//!
//! Callers write filters in the generic JSON form used throughout the
//! system:
//!
//! ```json
//! { "ticker": "AAPL", "volatility": { "$gt": 0.2, "$lte": 0.5 } }
//! ```
//!
//! A literal means equality; an object maps operators (`$eq`, `$ne`,
//! `$gt`, `$gte`, `$lt`, `$lte`) to values. All conditions are AND-ed.
//! [`FilterExpression`] parses this into a flat list of
//! [`FieldCondition`]s that each backend translates into its own syntax,
//! or evaluates client-side through [`FilterExpression::matches`].

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::Metadata;
use crate::error::{RagError, Result};

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    /// `$eq`
    Eq,
    /// `$ne`
    Ne,
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
}

impl FilterOp {
    /// Parse an operator key such as `$gte`.
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "$eq" => Some(Self::Eq),
            "$ne" => Some(Self::Ne),
            "$gt" => Some(Self::Gt),
            "$gte" => Some(Self::Gte),
            "$lt" => Some(Self::Lt),
            "$lte" => Some(Self::Lte),
            _ => None,
        }
    }

    /// The operator key in the generic filter syntax.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
        }
    }

    /// Whether this operator is an ordering comparison.
    pub fn is_range(&self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar value a condition compares against.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// A string, including ISO-8601 dates.
    String(String),
    /// Any JSON number.
    Number(f64),
    /// A boolean.
    Bool(bool),
}

impl FilterValue {
    fn from_json(field: &str, value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Self::String(s.clone())),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number).ok_or_else(|| {
                RagError::FilterError(format!("field '{field}': number {n} is not representable"))
            }),
            other => Err(RagError::FilterError(format!(
                "field '{field}': unsupported filter value {other}"
            ))),
        }
    }

    /// Convert back to JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => {
                serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null)
            }
        }
    }

    fn compare(&self, actual: &Value) -> Option<Ordering> {
        match (actual, self) {
            (Value::Number(a), Self::Number(b)) => a.as_f64()?.partial_cmp(b),
            (Value::String(a), Self::String(b)) => Some(a.as_str().cmp(b.as_str())),
            (Value::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// One `field op value` predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    /// Metadata field name.
    pub field: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// Value to compare against.
    pub value: FilterValue,
}

impl FieldCondition {
    /// Evaluate against a metadata map. A missing field never matches.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        let Some(actual) = metadata.get(&self.field) else {
            return false;
        };
        let ordering = self.value.compare(actual);
        match self.op {
            FilterOp::Eq => ordering == Some(Ordering::Equal),
            FilterOp::Ne => ordering != Some(Ordering::Equal),
            // Booleans are not ordered for filtering purposes.
            _ if matches!(self.value, FilterValue::Bool(_)) => false,
            FilterOp::Gt => ordering == Some(Ordering::Greater),
            FilterOp::Gte => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            FilterOp::Lt => ordering == Some(Ordering::Less),
            FilterOp::Lte => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        }
    }
}

/// A conjunction of field conditions over indexed metadata.
///
/// Applies to metadata only, never to document text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct FilterExpression {
    conditions: Vec<FieldCondition>,
}

impl FilterExpression {
    /// An empty filter that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the generic JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::FilterError`] if the value is not an object,
    /// an operator is unknown, or a value is not a scalar.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            RagError::FilterError(format!("filter must be a JSON object, got {value}"))
        })?;

        let mut conditions = Vec::new();
        for (field, spec) in object {
            match spec {
                Value::Object(ops) => {
                    if ops.is_empty() {
                        return Err(RagError::FilterError(format!(
                            "field '{field}': operator map is empty"
                        )));
                    }
                    for (key, value) in ops {
                        let op = FilterOp::parse(key).ok_or_else(|| {
                            RagError::FilterError(format!(
                                "field '{field}': unknown operator '{key}'"
                            ))
                        })?;
                        conditions.push(FieldCondition {
                            field: field.clone(),
                            op,
                            value: FilterValue::from_json(field, value)?,
                        });
                    }
                }
                literal => conditions.push(FieldCondition {
                    field: field.clone(),
                    op: FilterOp::Eq,
                    value: FilterValue::from_json(field, literal)?,
                }),
            }
        }
        Ok(Self { conditions })
    }

    /// Add an equality condition.
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        self.and(field, FilterOp::Eq, value)
    }

    /// Add a condition.
    pub fn and(
        mut self,
        field: impl Into<String>,
        op: FilterOp,
        value: impl Into<Value>,
    ) -> Result<Self> {
        let field = field.into();
        let value = FilterValue::from_json(&field, &value.into())?;
        self.conditions.push(FieldCondition { field, op, value });
        Ok(self)
    }

    /// The parsed conditions, in field order.
    pub fn conditions(&self) -> &[FieldCondition] {
        &self.conditions
    }

    /// Whether the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate the filter client-side against a metadata map.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions.iter().all(|c| c.matches(metadata))
    }

    /// Split into the conditions `native` accepts and the rest.
    pub fn partition(
        &self,
        native: impl Fn(&FieldCondition) -> bool,
    ) -> (FilterExpression, FilterExpression) {
        let (accepted, residual): (Vec<_>, Vec<_>) =
            self.conditions.iter().cloned().partition(|c| native(c));
        (Self { conditions: accepted }, Self { conditions: residual })
    }

    /// Serialize back to the generic JSON form.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        for condition in &self.conditions {
            let entry =
                object.entry(condition.field.clone()).or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(ops) = entry {
                ops.insert(condition.op.as_str().to_string(), condition.value.to_json());
            }
        }
        Value::Object(object)
    }
}

impl TryFrom<Value> for FilterExpression {
    type Error = RagError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_json(&value)
    }
}

impl From<FilterExpression> for Value {
    fn from(filter: FilterExpression) -> Self {
        filter.to_json()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn meta(value: Value) -> Metadata {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn literal_means_equality() {
        let filter = FilterExpression::from_json(&json!({"ticker": "AAPL"})).unwrap();
        assert_eq!(filter.conditions().len(), 1);
        assert_eq!(filter.conditions()[0].op, FilterOp::Eq);
        assert!(filter.matches(&meta(json!({"ticker": "AAPL"}))));
        assert!(!filter.matches(&meta(json!({"ticker": "MSFT"}))));
        assert!(!filter.matches(&meta(json!({}))));
    }

    #[test]
    fn range_operators_compare_numbers() {
        let filter =
            FilterExpression::from_json(&json!({"volatility": {"$gt": 0.2, "$lte": 0.5}})).unwrap();
        assert!(filter.matches(&meta(json!({"volatility": 0.3}))));
        assert!(filter.matches(&meta(json!({"volatility": 0.5}))));
        assert!(!filter.matches(&meta(json!({"volatility": 0.2}))));
        assert!(!filter.matches(&meta(json!({"volatility": "high"}))));
    }

    #[test]
    fn integer_metadata_compares_with_float_bounds() {
        let filter = FilterExpression::from_json(&json!({"avg_volume": {"$gte": 1000}})).unwrap();
        assert!(filter.matches(&meta(json!({"avg_volume": 1500}))));
        assert!(!filter.matches(&meta(json!({"avg_volume": 999.5}))));
    }

    #[test]
    fn iso_dates_compare_lexicographically() {
        let filter =
            FilterExpression::from_json(&json!({"end_date": {"$gte": "2024-01-01"}})).unwrap();
        assert!(filter.matches(&meta(json!({"end_date": "2024-01-15"}))));
        assert!(!filter.matches(&meta(json!({"end_date": "2023-06-01"}))));
    }

    #[test]
    fn not_equal_matches_other_types_but_not_missing_fields() {
        let filter = FilterExpression::from_json(&json!({"trend": {"$ne": "down"}})).unwrap();
        assert!(filter.matches(&meta(json!({"trend": "up"}))));
        assert!(filter.matches(&meta(json!({"trend": 1}))));
        assert!(!filter.matches(&meta(json!({"trend": "down"}))));
        assert!(!filter.matches(&meta(json!({}))));
    }

    #[test]
    fn rejects_unknown_operator_and_nested_values() {
        assert!(FilterExpression::from_json(&json!({"x": {"$in": [1, 2]}})).is_err());
        assert!(FilterExpression::from_json(&json!({"x": [1, 2]})).is_err());
        assert!(FilterExpression::from_json(&json!({"x": {}})).is_err());
        assert!(FilterExpression::from_json(&json!("AAPL")).is_err());
    }

    #[test]
    fn partition_splits_by_predicate() {
        let filter = FilterExpression::from_json(
            &json!({"ticker": "AAPL", "end_date": {"$gt": "2024-01-01"}}),
        )
        .unwrap();
        let (native, residual) =
            filter.partition(|c| !(c.op.is_range() && matches!(c.value, FilterValue::String(_))));
        assert_eq!(native.conditions().len(), 1);
        assert_eq!(native.conditions()[0].field, "ticker");
        assert_eq!(residual.conditions()[0].field, "end_date");
    }

    #[test]
    fn serde_uses_generic_form() {
        let filter: FilterExpression =
            serde_json::from_value(json!({"ticker": "AAPL", "rsi_avg": {"$lt": 30}})).unwrap();
        let back = serde_json::to_value(&filter).unwrap();
        assert_eq!(back, json!({"rsi_avg": {"$lt": 30.0}, "ticker": {"$eq": "AAPL"}}));
    }
}
