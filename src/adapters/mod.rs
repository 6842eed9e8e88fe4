//! Contracts for the collaborators the core consumes but does not implement.

pub mod generation;
pub mod scheduler;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use generation::{Generation, GenerationAdapter, GenerationOptions, Usage};
pub use scheduler::{RemoteScheduler, StatusReport, TriggerOptions, TriggerReceipt};

/// Mutating operations guarded by the host's capability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Ingest,
    Score,
    Approve,
    Publish,
    Resubmit,
    Trigger,
    Cancel,
    Reprocess,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Ingest => "ingest",
            Action::Score => "score",
            Action::Approve => "approve",
            Action::Publish => "publish",
            Action::Resubmit => "resubmit",
            Action::Trigger => "trigger",
            Action::Cancel => "cancel",
            Action::Reprocess => "reprocess",
        };
        f.write_str(name)
    }
}

/// Boolean gate supplied by the host application.
pub trait CapabilityCheck: Send + Sync {
    fn allows(&self, actor: &str, action: Action) -> bool;
}

/// Permits everything. Used by the CLI and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl CapabilityCheck for AllowAll {
    fn allows(&self, _actor: &str, _action: Action) -> bool {
        true
    }
}

impl<F> CapabilityCheck for F
where
    F: Fn(&str, Action) -> bool + Send + Sync,
{
    fn allows(&self, actor: &str, action: Action) -> bool {
        self(actor, action)
    }
}

/// Runs `check` and turns a refusal into `PermissionDenied`.
pub fn ensure_allowed(
    check: &dyn CapabilityCheck,
    actor: &str,
    action: Action,
) -> crate::error::Result<()> {
    if check.allows(actor, action) {
        Ok(())
    } else {
        tracing::warn!(actor, %action, "capability check refused");
        Err(crate::error::CuratorError::PermissionDenied {
            actor: actor.to_string(),
            action,
        })
    }
}
