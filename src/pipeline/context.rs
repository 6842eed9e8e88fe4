//! Accumulated execution context and `{{path}}` interpolation.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use super::step::StepError;

pub const PAYLOAD: &str = "payload";
pub const PREVIOUS_RESULT: &str = "previous_result";

static TEMPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").unwrap_or_else(|e| panic!("invalid template pattern: {e}"))
});

/// Looks up a dot-separated path. Numeric segments index arrays; an empty
/// path is the root itself.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Renders a value for splicing into a string template.
fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The payload, the previous step's output and every named step output.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    root: Value,
}

impl ExecutionContext {
    pub fn new(payload: Value) -> Self {
        let mut map = Map::new();
        map.insert(PAYLOAD.to_string(), payload);
        map.insert(PREVIOUS_RESULT.to_string(), Value::Null);
        Self {
            root: Value::Object(map),
        }
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        resolve_path(&self.root, path)
    }

    pub fn payload(&self) -> &Value {
        self.get(PAYLOAD).unwrap_or(&Value::Null)
    }

    pub fn previous(&self) -> &Value {
        self.get(PREVIOUS_RESULT).unwrap_or(&Value::Null)
    }

    /// The previous step's output, or the payload when there is none.
    pub fn input(&self) -> &Value {
        match self.previous() {
            Value::Null => self.payload(),
            previous => previous,
        }
    }

    pub(crate) fn set_output(&mut self, step: &str, output: Value) {
        if let Value::Object(map) = &mut self.root {
            map.insert(step.to_string(), output.clone());
            map.insert(PREVIOUS_RESULT.to_string(), output);
        }
    }

    /// A failed non-critical step leaves no output behind.
    pub(crate) fn clear_output(&mut self, step: &str) {
        self.set_output(step, Value::Null);
    }

    /// Replaces every `{{path}}` in `template`. Unresolved paths render as
    /// an empty string, or fail when `strict`.
    pub fn interpolate(&self, template: &str, strict: bool) -> Result<String, StepError> {
        let mut missing = None;
        let rendered = TEMPLATE.replace_all(template, |caps: &Captures| {
            let path = &caps[1];
            match self.get(path) {
                Some(value) => render(value),
                None => {
                    missing.get_or_insert_with(|| path.to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(path) if strict => Err(StepError::Unresolved(path)),
            _ => Ok(rendered.into_owned()),
        }
    }

    /// Interpolates every string leaf of `value`. A string that is exactly
    /// one `{{path}}` is replaced by the resolved value itself, keeping its
    /// JSON type.
    pub fn interpolate_value(&self, value: &Value, strict: bool) -> Result<Value, StepError> {
        match value {
            Value::String(s) => {
                if let Some(caps) = TEMPLATE.captures(s)
                    && caps.get(0).is_some_and(|m| m.len() == s.len())
                {
                    let path = &caps[1];
                    return match self.get(path) {
                        Some(resolved) => Ok(resolved.clone()),
                        None if strict => Err(StepError::Unresolved(path.to_string())),
                        None => Ok(Value::String(String::new())),
                    };
                }
                Ok(Value::String(self.interpolate(s, strict)?))
            }
            Value::Array(items) => items
                .iter()
                .map(|v| self.interpolate_value(v, strict))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.interpolate_value(v, strict)?)))
                .collect::<Result<Map<_, _>, StepError>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }
}
