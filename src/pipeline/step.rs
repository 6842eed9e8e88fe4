use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::condition::Operator;
use super::context::{PAYLOAD, PREVIOUS_RESULT};
use super::transform::TransformOp;
use crate::error::{CuratorError, Result};

/// An ordered, acyclic list of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<PipelineStep>,
}

/// One typed unit of work. Critical by default: a failure aborts the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Also the context key the step's output is stored under.
    pub name: String,
    #[serde(default = "default_critical")]
    pub critical: bool,
    /// Overrides the engine-wide attempt count.
    #[serde(default)]
    pub attempts: Option<u32>,
    #[serde(flatten)]
    pub kind: StepKind,
}

fn default_critical() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// What a step does. Serialized with a `type` tag next to the common fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Calls a registered handler with the accumulated context.
    Callback { handler: String },
    /// Sends a request. `url`, header values and string leaves of `body`
    /// accept `{{path}}` templates.
    Http {
        #[serde(default)]
        method: HttpMethod,
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        body: Option<Value>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    /// Runs `ops` over `source` (a context path), or over the previous
    /// output, or over the payload when there is none.
    Transform {
        #[serde(default)]
        source: Option<String>,
        ops: Vec<TransformOp>,
    },
    /// Compares a context field; outputs a boolean.
    Condition {
        field: String,
        operator: Operator,
        #[serde(default)]
        expected: Value,
    },
    /// Sleeps, bounded by the execution's remaining time.
    Delay { millis: u64 },
}

impl StepKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            StepKind::Callback { .. } => "callback",
            StepKind::Http { .. } => "http",
            StepKind::Transform { .. } => "transform",
            StepKind::Condition { .. } => "condition",
            StepKind::Delay { .. } => "delay",
        }
    }
}

impl PipelineStep {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            critical: true,
            attempts: None,
            kind,
        }
    }

    pub fn callback(name: impl Into<String>, handler: impl Into<String>) -> Self {
        Self::new(
            name,
            StepKind::Callback {
                handler: handler.into(),
            },
        )
    }

    pub fn http(name: impl Into<String>, method: HttpMethod, url: impl Into<String>) -> Self {
        Self::new(
            name,
            StepKind::Http {
                method,
                url: url.into(),
                headers: BTreeMap::new(),
                body: None,
                timeout_secs: None,
            },
        )
    }

    pub fn transform(name: impl Into<String>, ops: Vec<TransformOp>) -> Self {
        Self::new(name, StepKind::Transform { source: None, ops })
    }

    pub fn condition(
        name: impl Into<String>,
        field: impl Into<String>,
        operator: Operator,
        expected: Value,
    ) -> Self {
        Self::new(
            name,
            StepKind::Condition {
                field: field.into(),
                operator,
                expected,
            },
        )
    }

    pub fn delay(name: impl Into<String>, millis: u64) -> Self {
        Self::new(name, StepKind::Delay { millis })
    }

    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Sets the request body of an http step; ignored for other kinds.
    pub fn with_body(mut self, value: Value) -> Self {
        if let StepKind::Http { body, .. } = &mut self.kind {
            *body = Some(value);
        }
        self
    }

    /// Sets the source path of a transform step; ignored for other kinds.
    pub fn with_source(mut self, path: impl Into<String>) -> Self {
        if let StepKind::Transform { source, .. } = &mut self.kind {
            *source = Some(path.into());
        }
        self
    }
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: PipelineStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Step names must be unique, non-empty and must not shadow the
    /// reserved context keys.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(CuratorError::Validation(format!("pipeline {} has no steps", self.name)));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(CuratorError::Validation("step names must not be empty".into()));
            }
            if step.name == PAYLOAD || step.name == PREVIOUS_RESULT {
                return Err(CuratorError::Validation(format!(
                    "step name {} is reserved",
                    step.name
                )));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(CuratorError::Validation(format!(
                    "duplicate step name {}",
                    step.name
                )));
            }
            if step.attempts == Some(0) {
                return Err(CuratorError::Validation(format!(
                    "step {} must allow at least one attempt",
                    step.name
                )));
            }
        }
        Ok(())
    }

    /// Loads a pipeline definition from a `.json` or `.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let pipeline: Pipeline = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&contents)?,
            _ => serde_json::from_str(&contents)?,
        };
        pipeline.validate()?;
        Ok(pipeline)
    }
}

/// Why a single step attempt failed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("no handler registered under {0:?}")]
    UnknownHandler(String),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("request returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("unresolved template path {0:?}")]
    Unresolved(String),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("execution time budget exhausted")]
    BudgetExhausted,
}

impl StepError {
    /// Deterministic failures gain nothing from another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StepError::Handler(_) | StepError::Http(_) | StepError::HttpStatus { .. }
        )
    }
}
