mod manager;
mod record;
mod state;

pub use manager::{Lifecycle, LogPublisher, Publisher};
pub use record::{AuditRecord, CandidateRecord, TransitionRecord};
pub use state::{LifecycleEvent, Stage, StateMachine, Transition, Verdict};
