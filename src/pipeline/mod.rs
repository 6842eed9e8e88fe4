//! Declarative multi-step pipelines: typed steps, per-step retry with
//! backoff, a whole-run time budget and an in-process scheduler.

mod condition;
mod context;
mod engine;
mod execution;
mod handler;
mod scheduler;
mod step;
mod transform;

pub use condition::{Operator, evaluate};
pub use context::{ExecutionContext, PAYLOAD, PREVIOUS_RESULT, resolve_path};
pub use engine::{PipelineEngine, ProgressFn};
pub use execution::{
    CancelToken, ExecutionStatus, PipelineExecution, RetryPolicy, StepFailure, StepResult,
};
pub use handler::{FnHandler, HandlerRegistry, StepHandler};
pub use scheduler::PipelineRunner;
pub use step::{HttpMethod, Pipeline, PipelineStep, StepError, StepKind};
pub use transform::TransformOp;
