use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CuratorError, Result};

/// Outcome of scoring a candidate against the accept threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Accepted,
    Rejected,
}

/// Lifecycle stages of a candidate.
///
/// CANDIDATE → ARCHIVED(ACCEPTED | REJECTED) → APPROVED → PUBLISHED.
/// Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Candidate,
    Archived(Verdict),
    Approved,
    Published,
}

impl Stage {
    /// Rejected archives and published content accept no further events.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Archived(Verdict::Rejected) | Stage::Published)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Accepted => write!(f, "ACCEPTED"),
            Verdict::Rejected => write!(f, "REJECTED"),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Candidate => write!(f, "CANDIDATE"),
            Stage::Archived(verdict) => write!(f, "ARCHIVED({verdict})"),
            Stage::Approved => write!(f, "APPROVED"),
            Stage::Published => write!(f, "PUBLISHED"),
        }
    }
}

/// Something that happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Scored { accepted: bool },
    Approved,
    Published,
}

impl LifecycleEvent {
    pub fn action(self) -> &'static str {
        match self {
            LifecycleEvent::Scored { .. } => "archive",
            LifecycleEvent::Approved => "approve",
            LifecycleEvent::Published => "publish",
        }
    }
}

/// The result of evaluating an event against the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to the given stage.
    Advance(Stage),
    /// The event was already applied; nothing to do.
    Unchanged,
}

/// Pure transition table for candidate records.
pub struct StateMachine;

impl StateMachine {
    /// Computes the transition for `event` in `current`.
    ///
    /// - A candidate is archived by scoring, accepted or rejected.
    /// - Accepted archives can be approved; approved records can be published.
    /// - Replaying an event that already took effect is `Unchanged`, which
    ///   makes at-least-once callers safe.
    /// - Anything else, including every backwards move, is an error.
    pub fn next(current: Stage, event: LifecycleEvent) -> Result<Transition> {
        let transition = match (current, event) {
            (Stage::Candidate, LifecycleEvent::Scored { accepted }) => {
                let verdict = if accepted {
                    Verdict::Accepted
                } else {
                    Verdict::Rejected
                };
                Transition::Advance(Stage::Archived(verdict))
            }
            (_, LifecycleEvent::Scored { .. }) => Transition::Unchanged,

            (Stage::Archived(Verdict::Accepted), LifecycleEvent::Approved) => {
                Transition::Advance(Stage::Approved)
            }
            (Stage::Approved | Stage::Published, LifecycleEvent::Approved) => Transition::Unchanged,

            (Stage::Approved, LifecycleEvent::Published) => Transition::Advance(Stage::Published),
            (Stage::Published, LifecycleEvent::Published) => Transition::Unchanged,

            (from, event) => {
                return Err(CuratorError::InvalidTransition {
                    from,
                    action: event.action(),
                });
            }
        };
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_all_stages() {
        let t = StateMachine::next(Stage::Candidate, LifecycleEvent::Scored { accepted: true }).unwrap();
        assert_eq!(t, Transition::Advance(Stage::Archived(Verdict::Accepted)));

        let t = StateMachine::next(Stage::Archived(Verdict::Accepted), LifecycleEvent::Approved).unwrap();
        assert_eq!(t, Transition::Advance(Stage::Approved));

        let t = StateMachine::next(Stage::Approved, LifecycleEvent::Published).unwrap();
        assert_eq!(t, Transition::Advance(Stage::Published));
    }

    #[test]
    fn low_score_archives_as_rejected() {
        let t = StateMachine::next(Stage::Candidate, LifecycleEvent::Scored { accepted: false }).unwrap();
        assert_eq!(t, Transition::Advance(Stage::Archived(Verdict::Rejected)));
    }

    #[test]
    fn rejected_is_terminal() {
        let rejected = Stage::Archived(Verdict::Rejected);
        assert!(rejected.is_terminal());
        assert!(StateMachine::next(rejected, LifecycleEvent::Approved).is_err());
        assert!(StateMachine::next(rejected, LifecycleEvent::Published).is_err());
    }

    #[test]
    fn replays_are_unchanged() {
        assert_eq!(
            StateMachine::next(Stage::Approved, LifecycleEvent::Approved).unwrap(),
            Transition::Unchanged
        );
        assert_eq!(
            StateMachine::next(Stage::Published, LifecycleEvent::Published).unwrap(),
            Transition::Unchanged
        );
        assert_eq!(
            StateMachine::next(Stage::Published, LifecycleEvent::Scored { accepted: false }).unwrap(),
            Transition::Unchanged
        );
    }

    #[test]
    fn skipping_stages_is_rejected() {
        assert!(StateMachine::next(Stage::Candidate, LifecycleEvent::Approved).is_err());
        assert!(StateMachine::next(Stage::Candidate, LifecycleEvent::Published).is_err());
        let err = StateMachine::next(Stage::Archived(Verdict::Accepted), LifecycleEvent::Published)
            .unwrap_err();
        assert!(matches!(
            err,
            CuratorError::InvalidTransition {
                action: "publish",
                ..
            }
        ));
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::Candidate.to_string(), "CANDIDATE");
        assert_eq!(Stage::Archived(Verdict::Accepted).to_string(), "ARCHIVED(ACCEPTED)");
        assert_eq!(Stage::Approved.to_string(), "APPROVED");
        assert_eq!(Stage::Published.to_string(), "PUBLISHED");
    }
}
