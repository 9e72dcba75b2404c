//! Filter expressions.
//!
//! A filter is either a leaf comparison (`{field, operator, value}`) or a
//! logical composite (`{AND: [...]}`, `{OR: [...]}`, `{NOT: [...]}`,
//! `{IF_THEN: [antecedent, consequent]}`). Filters are evaluated in-process
//! against document properties, and can be rendered as a SQL WHERE fragment
//! for source-side pushdown.
//!
//! Leaf operators accept both symbolic (`==`, `!=`, `>`, ...) and dunder
//! spellings (`__eq__`, `__ne__`, `__gt__`, ...), the latter being the
//! common form in hand-written schemas.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SchemaError;

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Eq,
    Neq,
    Ge,
    Le,
    Gt,
    Lt,
    In,
}

impl ComparisonOperator {
    /// Parse either the symbolic or the dunder spelling.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        match s {
            "==" | "__eq__" => Ok(Self::Eq),
            "!=" | "__ne__" => Ok(Self::Neq),
            ">=" | "__ge__" => Ok(Self::Ge),
            "<=" | "__le__" => Ok(Self::Le),
            ">" | "__gt__" => Ok(Self::Gt),
            "<" | "__lt__" => Ok(Self::Lt),
            "IN" | "__contains__" => Ok(Self::In),
            other => Err(SchemaError::validation(format!(
                "unknown comparison operator: {other}"
            ))),
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::In => "IN",
        }
    }

    fn sql_symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            other => other.symbol(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOperator {
    And,
    Or,
    Not,
    IfThen,
}

impl LogicalOperator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AND" => Some(Self::And),
            "OR" => Some(Self::Or),
            "NOT" => Some(Self::Not),
            "IF_THEN" => Some(Self::IfThen),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
            Self::IfThen => "IF_THEN",
        }
    }
}

// ============================================================================
// Expression tree
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    Leaf {
        field: String,
        op: ComparisonOperator,
        /// Comparison constants. A single-element list for scalar operators,
        /// the full membership set for `IN`.
        value: Vec<Value>,
    },
    Composite {
        op: LogicalOperator,
        deps: Vec<FilterExpression>,
    },
}

impl FilterExpression {
    pub fn leaf(field: impl Into<String>, op: ComparisonOperator, value: Value) -> Self {
        FilterExpression::Leaf {
            field: field.into(),
            op,
            value: vec![value],
        }
    }

    /// Build from the generic YAML/JSON shape.
    pub fn from_value(v: &Value) -> Result<Self, SchemaError> {
        let map = v.as_object().ok_or_else(|| {
            SchemaError::validation(format!("filter expression must be a mapping, got: {v}"))
        })?;

        // Composite: a single logical-operator key holding the deps list.
        if map.len() == 1 {
            let (key, inner) = map
                .iter()
                .next()
                .ok_or_else(|| SchemaError::validation("empty filter expression"))?;
            if let Some(op) = LogicalOperator::parse(key) {
                let items = inner.as_array().ok_or_else(|| {
                    SchemaError::validation(format!("{key} expects a list of expressions"))
                })?;
                let deps = items
                    .iter()
                    .map(Self::from_value)
                    .collect::<Result<Vec<_>, _>>()?;
                let expr = FilterExpression::Composite { op, deps };
                expr.check_shape()?;
                return Ok(expr);
            }
        }

        // Leaf: field + operator (accepted keys: operator, cmp_operator, foo).
        let field = map
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::validation(format!("filter leaf needs a field: {v}")))?;
        let op_str = map
            .get("operator")
            .or_else(|| map.get("cmp_operator"))
            .or_else(|| map.get("foo"))
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::validation(format!("filter leaf needs an operator: {v}")))?;
        let op = ComparisonOperator::parse(op_str)?;
        let value = match map.get("value") {
            None | Some(Value::Null) => vec![Value::Null],
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
        };
        Ok(FilterExpression::Leaf {
            field: field.to_string(),
            op,
            value,
        })
    }

    fn check_shape(&self) -> Result<(), SchemaError> {
        if let FilterExpression::Composite { op, deps } = self {
            match op {
                LogicalOperator::Not if deps.len() != 1 => {
                    return Err(SchemaError::validation("NOT takes exactly one expression"));
                }
                LogicalOperator::IfThen if deps.len() != 2 => {
                    return Err(SchemaError::validation(
                        "IF_THEN takes exactly two expressions",
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluate against a document. A leaf whose field is absent from the
    /// document evaluates to false.
    pub fn evaluate(&self, doc: &serde_json::Map<String, Value>) -> bool {
        match self {
            FilterExpression::Leaf { field, op, value } => {
                let Some(actual) = doc.get(field) else {
                    return false;
                };
                Self::compare(actual, *op, value)
            }
            FilterExpression::Composite { op, deps } => match op {
                LogicalOperator::And => deps.iter().all(|d| d.evaluate(doc)),
                LogicalOperator::Or => deps.iter().any(|d| d.evaluate(doc)),
                LogicalOperator::Not => !deps[0].evaluate(doc),
                // vacuous truth when the antecedent does not hold
                LogicalOperator::IfThen => !deps[0].evaluate(doc) || deps[1].evaluate(doc),
            },
        }
    }

    fn compare(actual: &Value, op: ComparisonOperator, expected: &[Value]) -> bool {
        if op == ComparisonOperator::In {
            return expected.iter().any(|e| Self::values_eq(actual, e));
        }
        let first = match expected.first() {
            Some(v) => v,
            None => return false,
        };
        match op {
            ComparisonOperator::Eq => Self::values_eq(actual, first),
            ComparisonOperator::Neq => !Self::values_eq(actual, first),
            ComparisonOperator::Ge | ComparisonOperator::Le | ComparisonOperator::Gt
            | ComparisonOperator::Lt => match Self::values_cmp(actual, first) {
                Some(ord) => match op {
                    ComparisonOperator::Ge => ord.is_ge(),
                    ComparisonOperator::Le => ord.is_le(),
                    ComparisonOperator::Gt => ord.is_gt(),
                    ComparisonOperator::Lt => ord.is_lt(),
                    _ => unreachable!(),
                },
                None => false,
            },
            ComparisonOperator::In => unreachable!(),
        }
    }

    fn values_eq(a: &Value, b: &Value) -> bool {
        match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        }
    }

    fn values_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
        match (a, b) {
            (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    // ========================================================================
    // SQL rendering (pushdown)
    // ========================================================================

    /// Render as a SQL WHERE fragment: `"field" >= '2020-01-01T00:00:00'`.
    pub fn render_sql(&self) -> String {
        match self {
            FilterExpression::Leaf { field, op, value } => {
                if *op == ComparisonOperator::In {
                    let items = value
                        .iter()
                        .map(Self::sql_literal)
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("\"{field}\" IN ({items})")
                } else {
                    let lit = value.first().map(Self::sql_literal).unwrap_or_default();
                    format!("\"{field}\" {} {lit}", op.sql_symbol())
                }
            }
            FilterExpression::Composite { op, deps } => match op {
                LogicalOperator::Not => format!("NOT ({})", deps[0].render_sql()),
                LogicalOperator::IfThen => {
                    // A -> B  ==  NOT A OR B
                    format!(
                        "(NOT ({}) OR ({}))",
                        deps[0].render_sql(),
                        deps[1].render_sql()
                    )
                }
                LogicalOperator::And | LogicalOperator::Or => {
                    let joiner = format!(" {} ", op.as_str());
                    deps.iter()
                        .map(|d| d.render_sql())
                        .collect::<Vec<_>>()
                        .join(&joiner)
                }
            },
        }
    }

    fn sql_literal(v: &Value) -> String {
        match v {
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Null => "NULL".to_string(),
            other => other.to_string(),
        }
    }
}

// ============================================================================
// Serde: parse via the generic Value shape, emit the canonical shape
// ============================================================================

impl<'de> Deserialize<'de> for FilterExpression {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        FilterExpression::from_value(&v).map_err(de::Error::custom)
    }
}

impl Serialize for FilterExpression {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FilterExpression::Leaf { field, op, value } => {
                let mut m = serializer.serialize_map(Some(3))?;
                m.serialize_entry("field", field)?;
                m.serialize_entry("operator", op.symbol())?;
                if value.len() == 1 {
                    m.serialize_entry("value", &value[0])?;
                } else {
                    m.serialize_entry("value", value)?;
                }
                m.end()
            }
            FilterExpression::Composite { op, deps } => {
                let mut m = serializer.serialize_map(Some(1))?;
                m.serialize_entry(op.as_str(), deps)?;
                m.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn parse(yaml: &str) -> FilterExpression {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn leaf_eq_dunder() {
        let f = parse("{field: name, operator: __eq__, value: Open}");
        assert!(f.evaluate(&doc(json!({"name": "Open"}))));
        assert!(!f.evaluate(&doc(json!({"name": "Close"}))));
        assert!(!f.evaluate(&doc(json!({"other": 1}))));
    }

    #[test]
    fn leaf_gt_numeric() {
        let f = parse("{field: value, operator: __gt__, value: 0}");
        assert!(f.evaluate(&doc(json!({"value": 1}))));
        assert!(!f.evaluate(&doc(json!({"value": -1}))));
        assert!(f.evaluate(&doc(json!({"value": 0.5}))));
    }

    #[test]
    fn leaf_ne() {
        let f = parse("{field: name, operator: __ne__, value: Volume}");
        assert!(f.evaluate(&doc(json!({"name": "Open"}))));
        assert!(!f.evaluate(&doc(json!({"name": "Volume"}))));
    }

    #[test]
    fn composite_and() {
        let f = parse(
            r#"
AND:
- {field: name, operator: __eq__, value: Open}
- {field: value, operator: __gt__, value: 0}
"#,
        );
        assert!(f.evaluate(&doc(json!({"name": "Open", "value": 5.0}))));
        assert!(!f.evaluate(&doc(json!({"name": "Open", "value": -1.0}))));
    }

    #[test]
    fn composite_or_of_ands() {
        let f = parse(
            r#"
OR:
- AND:
  - {field: name, operator: __eq__, value: Open}
  - {field: value, operator: __gt__, value: 0}
- AND:
  - {field: name, operator: __eq__, value: Close}
  - {field: value, operator: __gt__, value: 0}
"#,
        );
        assert!(f.evaluate(&doc(json!({"name": "Open", "value": 5.0}))));
        assert!(f.evaluate(&doc(json!({"name": "Close", "value": 5.0}))));
        assert!(!f.evaluate(&doc(json!({"name": "Open", "value": -1.0}))));
        assert!(!f.evaluate(&doc(json!({"name": "Close", "value": -1.0}))));
    }

    #[test]
    fn if_then_vacuous_truth() {
        let f = parse(
            r#"
IF_THEN:
- {field: name, operator: __eq__, value: Open}
- {field: value, operator: __gt__, value: 0}
"#,
        );
        // antecedent holds, consequent fails
        assert!(!f.evaluate(&doc(json!({"name": "Open", "value": -1.0}))));
        // antecedent does not hold
        assert!(f.evaluate(&doc(json!({"name": "Close", "value": -1.0}))));
    }

    #[test]
    fn not_single_dep() {
        let f = parse(
            r#"
NOT:
- {field: name, operator: __eq__, value: Volume}
"#,
        );
        assert!(f.evaluate(&doc(json!({"name": "Open"}))));
        assert!(!f.evaluate(&doc(json!({"name": "Volume"}))));
    }

    #[test]
    fn not_rejects_multiple_deps() {
        let r: Result<FilterExpression, _> = serde_yaml::from_str(
            r#"
NOT:
- {field: a, operator: __eq__, value: 1}
- {field: b, operator: __eq__, value: 2}
"#,
        );
        assert!(r.is_err());
    }

    #[test]
    fn in_membership() {
        let f = parse("{field: kind, operator: IN, value: [a, b]}");
        assert!(f.evaluate(&doc(json!({"kind": "a"}))));
        assert!(!f.evaluate(&doc(json!({"kind": "c"}))));
    }

    #[test]
    fn sql_leaf() {
        let f = FilterExpression::leaf(
            "created_at",
            ComparisonOperator::Ge,
            json!("2020-01-01T00:00:00"),
        );
        assert_eq!(f.render_sql(), "\"created_at\" >= '2020-01-01T00:00:00'");
    }

    #[test]
    fn sql_composite_and() {
        let f = FilterExpression::Composite {
            op: LogicalOperator::And,
            deps: vec![
                FilterExpression::leaf("dt", ComparisonOperator::Ge, json!("2020-01-01")),
                FilterExpression::leaf("dt", ComparisonOperator::Lt, json!("2020-12-31")),
            ],
        };
        let out = f.render_sql();
        assert!(out.contains("\"dt\" >= '2020-01-01'"));
        assert!(out.contains("\"dt\" < '2020-12-31'"));
        assert!(out.contains(" AND "));
    }

    #[test]
    fn sql_eq_uses_single_equals() {
        let f = FilterExpression::leaf("name", ComparisonOperator::Eq, json!("Open"));
        assert_eq!(f.render_sql(), "\"name\" = 'Open'");
    }

    #[test]
    fn serde_round_trip() {
        let f = parse(
            r#"
OR:
- {field: name, operator: __eq__, value: Open}
- {field: value, operator: __gt__, value: 0}
"#,
        );
        let text = serde_yaml::to_string(&f).unwrap();
        let back: FilterExpression = serde_yaml::from_str(&text).unwrap();
        assert_eq!(f, back);
    }
}
