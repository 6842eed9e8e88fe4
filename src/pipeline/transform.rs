use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::condition::{Operator, evaluate};
use super::context::resolve_path;
use super::step::StepError;

/// One operation of a transform step. Operations run in order, each
/// receiving the previous one's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformOp {
    /// Builds `{output_key: value at path}` per element (or for an object).
    Map { fields: BTreeMap<String, String> },
    /// Keeps the array elements whose `field` satisfies the comparison.
    Filter {
        field: String,
        operator: Operator,
        #[serde(default)]
        value: Value,
    },
    /// Collects `field` from each element, skipping elements without it.
    Pluck { field: String },
    First,
    Last,
    Count,
    JsonEncode,
    JsonDecode,
}

impl TransformOp {
    pub fn name(&self) -> &'static str {
        match self {
            TransformOp::Map { .. } => "map",
            TransformOp::Filter { .. } => "filter",
            TransformOp::Pluck { .. } => "pluck",
            TransformOp::First => "first",
            TransformOp::Last => "last",
            TransformOp::Count => "count",
            TransformOp::JsonEncode => "json_encode",
            TransformOp::JsonDecode => "json_decode",
        }
    }
}

fn expect_array(op: &TransformOp, value: Value) -> Result<Vec<Value>, StepError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(StepError::Transform(format!(
            "{} expects an array, got {}",
            op.name(),
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn project(value: &Value, fields: &BTreeMap<String, String>) -> Value {
    let map: Map<String, Value> = fields
        .iter()
        .map(|(key, path)| {
            let picked = resolve_path(value, path).cloned().unwrap_or(Value::Null);
            (key.clone(), picked)
        })
        .collect();
    Value::Object(map)
}

fn apply_one(op: &TransformOp, input: Value) -> Result<Value, StepError> {
    match op {
        TransformOp::Map { fields } => match input {
            Value::Array(items) => Ok(Value::Array(
                items.iter().map(|item| project(item, fields)).collect(),
            )),
            Value::Object(_) => Ok(project(&input, fields)),
            other => Err(StepError::Transform(format!(
                "map expects an array or object, got {}",
                kind_of(&other)
            ))),
        },
        TransformOp::Filter {
            field,
            operator,
            value,
        } => {
            let items = expect_array(op, input)?;
            Ok(Value::Array(
                items
                    .into_iter()
                    .filter(|item| evaluate(resolve_path(item, field), *operator, value))
                    .collect(),
            ))
        }
        TransformOp::Pluck { field } => {
            let items = expect_array(op, input)?;
            Ok(Value::Array(
                items
                    .iter()
                    .filter_map(|item| resolve_path(item, field).cloned())
                    .collect(),
            ))
        }
        TransformOp::First => Ok(expect_array(op, input)?
            .into_iter()
            .next()
            .unwrap_or(Value::Null)),
        TransformOp::Last => Ok(expect_array(op, input)?.pop().unwrap_or(Value::Null)),
        TransformOp::Count => {
            let count = match &input {
                Value::Null => 0,
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                Value::String(s) => s.chars().count(),
                _ => 1,
            };
            Ok(Value::from(count))
        }
        TransformOp::JsonEncode => Ok(Value::String(input.to_string())),
        TransformOp::JsonDecode => match input {
            Value::String(raw) => serde_json::from_str(&raw)
                .map_err(|e| StepError::Transform(format!("json_decode: {e}"))),
            other => Err(StepError::Transform(format!(
                "json_decode expects a string, got {}",
                kind_of(&other)
            ))),
        },
    }
}

/// Runs `ops` over `input` in order.
pub fn apply(ops: &[TransformOp], input: Value) -> Result<Value, StepError> {
    ops.iter().try_fold(input, |value, op| apply_one(op, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn articles() -> Value {
        json!([
            {"title": "A", "score": 80, "meta": {"lang": "en"}},
            {"title": "B", "score": 35},
            {"title": "C", "score": 72, "meta": {"lang": "de"}}
        ])
    }

    #[test]
    fn filter_pluck_count() {
        let ops = vec![
            TransformOp::Filter {
                field: "score".into(),
                operator: Operator::Greater,
                value: json!(70),
            },
            TransformOp::Pluck {
                field: "title".into(),
            },
        ];
        assert_eq!(apply(&ops, articles()).unwrap(), json!(["A", "C"]));

        let mut counted = ops.clone();
        counted.push(TransformOp::Count);
        assert_eq!(apply(&counted, articles()).unwrap(), json!(2));
    }

    #[test]
    fn map_projects_nested_paths() {
        let fields = BTreeMap::from([
            ("name".to_string(), "title".to_string()),
            ("lang".to_string(), "meta.lang".to_string()),
        ]);
        let out = apply(&[TransformOp::Map { fields: fields.clone() }], articles()).unwrap();
        assert_eq!(
            out,
            json!([
                {"name": "A", "lang": "en"},
                {"name": "B", "lang": null},
                {"name": "C", "lang": "de"}
            ])
        );

        let single = apply(&[TransformOp::Map { fields }], json!({"title": "solo"})).unwrap();
        assert_eq!(single, json!({"name": "solo", "lang": null}));
    }

    #[test]
    fn pluck_skips_missing_fields() {
        let out = apply(
            &[TransformOp::Pluck {
                field: "meta.lang".into(),
            }],
            articles(),
        )
        .unwrap();
        assert_eq!(out, json!(["en", "de"]));
    }

    #[test]
    fn first_and_last() {
        assert_eq!(
            apply(&[TransformOp::First], articles()).unwrap()["title"],
            json!("A")
        );
        assert_eq!(
            apply(&[TransformOp::Last], articles()).unwrap()["title"],
            json!("C")
        );
        assert_eq!(apply(&[TransformOp::First], json!([])).unwrap(), Value::Null);
        assert!(apply(&[TransformOp::Last], json!("text")).is_err());
    }

    #[test]
    fn json_encode_decode() {
        let encoded = apply(&[TransformOp::JsonEncode], json!({"a": [1, 2]})).unwrap();
        assert_eq!(encoded, json!(r#"{"a":[1,2]}"#));
        let decoded = apply(&[TransformOp::JsonDecode], encoded).unwrap();
        assert_eq!(decoded, json!({"a": [1, 2]}));
        assert!(apply(&[TransformOp::JsonDecode], json!("{broken")).is_err());
        assert!(apply(&[TransformOp::JsonDecode], json!(3)).is_err());
    }

    #[test]
    fn count_shapes() {
        assert_eq!(apply(&[TransformOp::Count], Value::Null).unwrap(), json!(0));
        assert_eq!(apply(&[TransformOp::Count], json!({"a": 1, "b": 2})).unwrap(), json!(2));
        assert_eq!(apply(&[TransformOp::Count], json!("héllo")).unwrap(), json!(5));
        assert_eq!(apply(&[TransformOp::Count], json!(9)).unwrap(), json!(1));
    }

    #[test]
    fn no_ops_is_identity() {
        assert_eq!(apply(&[], articles()).unwrap(), articles());
    }

    #[test]
    fn deserializes_ops() {
        let ops: Vec<TransformOp> = serde_json::from_value(json!([
            {"op": "filter", "field": "score", "operator": "less", "value": 50},
            {"op": "map", "fields": {"t": "title"}},
            {"op": "json_encode"}
        ]))
        .unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[2].name(), "json_encode");
    }
}
