//! Execution records, retry policy and cancellation for pipeline runs.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::context::{ExecutionContext, resolve_path};
use super::step::Pipeline;
use crate::config::PipelineConfig;
use crate::error::{CuratorError, Result};

/// Where a run is in its life. Everything after `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Accepted for background execution, not yet picked up.
    Scheduled,
    Running,
    /// Every step ran; non-critical failures may still be recorded.
    Completed,
    /// A critical step failed after its retries.
    Failed,
    /// The time budget ran out.
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Scheduled | ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Scheduled => "scheduled",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Per-step exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per step, including the first.
    pub attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            attempts: config.step_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
        }
    }

    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Cooperative cancellation flag shared between a run and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one step, recorded whether it succeeded or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    // Position in the pipeline, zero based.
    pub index: usize,
    pub name: String,
    pub succeeded: bool,
    // Step output; null when the step failed.
    pub output: Value,
    // Attempts spent, first try included.
    pub attempts: u32,
    pub duration_ms: u64,
}

/// A step that gave up after its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub index: usize,
    pub name: String,
    /// A critical failure ends the run as `Failed`; otherwise the run goes on.
    pub critical: bool,
    pub attempts: u32,
    // Last error reported by the handler.
    pub message: String,
}

/// State and outcome of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub id: Uuid,
    /// Name of the pipeline that ran.
    pub pipeline: String,
    pub status: ExecutionStatus,
    /// Index of the step most recently started.
    pub current_step: usize,
    // Number of steps in the definition.
    pub total_steps: usize,
    /// Steps processed so far, including failed non-critical ones.
    pub completed_steps: usize,
    /// Final context: payload, previous_result and every step output.
    pub context: Value,
    /// Initial payload, kept so a queued run can be rebuilt from the store.
    #[serde(default)]
    pub payload: Value,
    /// Step definitions the run executes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Pipeline>,
    // One entry per step that ran, in order.
    pub step_results: Vec<StepResult>,
    pub errors: Vec<StepFailure>,
    /// Index of the critical step that aborted the run.
    pub failed_step: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineExecution {
    pub fn new(pipeline: impl Into<String>, total_steps: usize, status: ExecutionStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            status,
            current_step: 0,
            total_steps,
            completed_steps: 0,
            context: Value::Null,
            payload: Value::Null,
            definition: None,
            step_results: Vec::new(),
            errors: Vec::new(),
            failed_step: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// A queued run carrying everything a worker needs: the step
    /// definitions and the payload, also seeded into `context`.
    pub fn scheduled(pipeline: &Pipeline, payload: Value) -> Self {
        let mut execution = Self::new(
            pipeline.name.clone(),
            pipeline.steps.len(),
            ExecutionStatus::Scheduled,
        );
        execution.context = ExecutionContext::new(payload.clone()).into_value();
        execution.payload = payload;
        execution.definition = Some(pipeline.clone());
        execution
    }

    pub fn success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Output of a named step, or any other context path.
    pub fn output(&self, path: &str) -> Option<&Value> {
        resolve_path(&self.context, path)
    }

    /// Output of the last step that ran.
    pub fn result(&self) -> &Value {
        self.output(super::context::PREVIOUS_RESULT).unwrap_or(&Value::Null)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    /// Converts an unsuccessful run into the matching error.
    pub fn into_result(self) -> Result<Self> {
        match self.status {
            ExecutionStatus::Completed => Ok(self),
            ExecutionStatus::Timeout => Err(CuratorError::ExecutionTimeout {
                completed_steps: self.completed_steps,
                total_steps: self.total_steps,
            }),
            ExecutionStatus::Failed => {
                let step = self.failed_step.unwrap_or(self.current_step);
                let message = self
                    .errors
                    .iter()
                    .find(|e| e.index == step)
                    .map(|e| format!("{}: {}", e.name, e.message))
                    .unwrap_or_default();
                Err(CuratorError::CriticalStepFailure { step, message })
            }
            status => Err(CuratorError::Validation(format!(
                "execution {} is {status}",
                self.id
            ))),
        }
    }
}
