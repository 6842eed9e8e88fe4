//! Scheduler contract shared by the in-process pipeline runner and any
//! external workflow host a deployment delegates execution to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::pipeline::ExecutionStatus;

/// How [`RemoteScheduler::trigger`] should run the pipeline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TriggerOptions {
    /// Return immediately with `Scheduled` and run in the background.
    #[serde(default, rename = "async")]
    pub run_async: bool,
}

impl TriggerOptions {
    pub fn sync() -> Self {
        Self { run_async: false }
    }

    pub fn background() -> Self {
        Self { run_async: true }
    }
}

/// Returned by a trigger: the execution id and where it stands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerReceipt {
    pub execution_id: Uuid,
    /// Terminal status for sync runs, `Scheduled` for background ones.
    pub status: ExecutionStatus,
}

/// Point-in-time view of an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: ExecutionStatus,
    /// Steps completed so far.
    pub current_step: usize,
    pub total_steps: usize,
}

impl StatusReport {
    /// Completed fraction in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            1.0
        } else {
            self.current_step as f64 / self.total_steps as f64
        }
    }
}

/// Starts, observes and cancels pipeline executions.
#[async_trait]
pub trait RemoteScheduler: Send + Sync {
    /// Starts a run with `payload` as its initial context.
    async fn trigger(&self, payload: Value, options: TriggerOptions) -> Result<TriggerReceipt>;

    /// Fails with `NotFound` for an unknown id.
    async fn get_status(&self, execution_id: Uuid) -> Result<StatusReport>;

    /// Returns `false` when the execution is unknown or already terminal.
    async fn cancel(&self, execution_id: Uuid) -> Result<bool>;
}
