use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison used by condition steps and the `filter` transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Numeric when both sides read as numbers, otherwise compares renderings.
    Equals,
    /// Exact JSON equality.
    StrictEquals,
    NotEquals,
    Greater,
    Less,
    /// Substring, array membership or object key.
    Contains,
    /// Present and not null.
    Exists,
    /// Missing, null, false, zero, or an empty string, array or object.
    Empty,
    NotEmpty,
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn rendering(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loose_equals(actual: &Value, expected: &Value) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => rendering(actual) == rendering(expected),
    }
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => true,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Bool(true)) => false,
    }
}

/// Evaluates `actual <operator> expected`. A missing field compares as null.
pub fn evaluate(actual: Option<&Value>, operator: Operator, expected: &Value) -> bool {
    let value = actual.unwrap_or(&Value::Null);
    match operator {
        Operator::Equals => loose_equals(value, expected),
        Operator::StrictEquals => value == expected,
        Operator::NotEquals => !loose_equals(value, expected),
        Operator::Greater => matches!(
            (as_number(value), as_number(expected)),
            (Some(a), Some(b)) if a > b
        ),
        Operator::Less => matches!(
            (as_number(value), as_number(expected)),
            (Some(a), Some(b)) if a < b
        ),
        Operator::Contains => match value {
            Value::String(s) => s.contains(&rendering(expected)),
            Value::Array(items) => items.iter().any(|item| loose_equals(item, expected)),
            Value::Object(map) => map.contains_key(&rendering(expected)),
            _ => false,
        },
        Operator::Exists => !value.is_null(),
        Operator::Empty => is_empty(actual),
        Operator::NotEmpty => !is_empty(actual),
    }
}
