//! Attempt state machine for one task's generate → validate → retry loop.
//!
//! ```text
//! Init → Generating → Extracting → SyntaxCheck → SemanticCheck → Accepted
//!            ↑   │                      │              │
//!            └───┴──── (attempts left) ─┴──────────────┘
//!                      (budget spent) → Exhausted
//! ```
//!
//! The machine is pure: the orchestrator feeds it events and performs the
//! side effects each state calls for.

use std::fmt;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};

use crate::core::task::TaskId;
use crate::core::verdict::Verdict;

/// Extracted source for one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub task_id: TaskId,
    /// 1-based attempt index.
    pub attempt: u32,
    pub source: String,
}

/// What happened to one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    /// The generation service failed; no candidate was produced.
    ServiceFailed(String),
    Judged(Verdict),
}

impl AttemptResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AttemptResult::Judged(verdict) if verdict.is_accepted())
    }

    /// Run-log status for this result.
    pub fn status(&self) -> &'static str {
        match self {
            AttemptResult::ServiceFailed(_) => "exception",
            AttemptResult::Judged(verdict) => verdict.status(),
        }
    }
}

/// Rendered as refinement feedback.
impl fmt::Display for AttemptResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptResult::ServiceFailed(message) => write!(f, "Exception: {message}"),
            AttemptResult::Judged(verdict) => write!(f, "{verdict}"),
        }
    }
}

/// Corrective context handed to the prompt composer on a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refinement {
    /// Most recent candidate produced for the task.
    pub candidate: Candidate,
    /// Outcome of the most recent attempt (which may postdate the candidate
    /// when the service failed in between).
    pub feedback: AttemptResult,
}

/// Append-only record of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub task_id: TaskId,
    pub attempt: u32,
    pub candidate: Option<Candidate>,
    pub result: AttemptResult,
    pub timestamp: DateTime<Utc>,
}

/// Phase of the attempt loop for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Init,
    Generating { attempt: u32 },
    Extracting { attempt: u32 },
    SyntaxCheck { attempt: u32 },
    SemanticCheck { attempt: u32 },
    Accepted { attempt: u32 },
    Exhausted { attempts: u32 },
}

/// Input driving the attempt state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptEvent {
    Begin,
    Generated,
    ServiceFailed,
    Extracted,
    SyntaxPassed,
    /// The current attempt received a non-accepted verdict.
    Rejected,
    Accepted,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::Accepted { .. } | AttemptState::Exhausted { .. }
        )
    }

    /// Apply `event` under a budget of `max_attempts` attempts.
    pub fn next(self, event: AttemptEvent, max_attempts: u32) -> Result<AttemptState> {
        use AttemptEvent as E;
        use AttemptState as S;

        if max_attempts == 0 {
            bail!("attempt budget must be at least 1");
        }
        let next = match (self, event) {
            (S::Init, E::Begin) => S::Generating { attempt: 1 },
            (S::Generating { attempt }, E::Generated) => S::Extracting { attempt },
            (S::Generating { attempt }, E::ServiceFailed) => retry_or_exhaust(attempt, max_attempts),
            (S::Extracting { attempt }, E::Extracted) => S::SyntaxCheck { attempt },
            (S::SyntaxCheck { attempt }, E::SyntaxPassed) => S::SemanticCheck { attempt },
            (S::SyntaxCheck { attempt } | S::SemanticCheck { attempt }, E::Rejected) => {
                retry_or_exhaust(attempt, max_attempts)
            }
            (S::SemanticCheck { attempt }, E::Accepted) => S::Accepted { attempt },
            (state, event) => bail!("invalid attempt transition: {state:?} on {event:?}"),
        };
        Ok(next)
    }
}

fn retry_or_exhaust(attempt: u32, max_attempts: u32) -> AttemptState {
    if attempt < max_attempts {
        AttemptState::Generating {
            attempt: attempt + 1,
        }
    } else {
        AttemptState::Exhausted { attempts: attempt }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_rejections(max_attempts: u32) -> (AttemptState, u32) {
        let mut state = AttemptState::Init
            .next(AttemptEvent::Begin, max_attempts)
            .expect("begin");
        let mut generations = 0;
        while !state.is_terminal() {
            generations += 1;
            state = state
                .next(AttemptEvent::Generated, max_attempts)
                .and_then(|s| s.next(AttemptEvent::Extracted, max_attempts))
                .and_then(|s| s.next(AttemptEvent::SyntaxPassed, max_attempts))
                .and_then(|s| s.next(AttemptEvent::Rejected, max_attempts))
                .expect("transition");
        }
        (state, generations)
    }

    #[test]
    fn accepted_on_first_attempt() {
        let mut state = AttemptState::Init;
        for event in [
            AttemptEvent::Begin,
            AttemptEvent::Generated,
            AttemptEvent::Extracted,
            AttemptEvent::SyntaxPassed,
            AttemptEvent::Accepted,
        ] {
            state = state.next(event, 3).expect("transition");
        }
        assert_eq!(state, AttemptState::Accepted { attempt: 1 });
        assert!(state.is_terminal());
    }

    #[test]
    fn rejections_exhaust_after_budget() {
        for max_attempts in 1..=4 {
            let (state, generations) = run_rejections(max_attempts);
            assert_eq!(state, AttemptState::Exhausted { attempts: max_attempts });
            assert_eq!(generations, max_attempts);
        }
    }

    #[test]
    fn syntax_rejection_skips_semantic_check() {
        let state = AttemptState::SyntaxCheck { attempt: 1 };
        assert_eq!(
            state.next(AttemptEvent::Rejected, 2).expect("reject"),
            AttemptState::Generating { attempt: 2 }
        );
    }

    #[test]
    fn service_failure_bypasses_validation() {
        let state = AttemptState::Generating { attempt: 2 };
        assert_eq!(
            state.next(AttemptEvent::ServiceFailed, 2).expect("fail"),
            AttemptState::Exhausted { attempts: 2 }
        );
        assert_eq!(
            AttemptState::Generating { attempt: 1 }
                .next(AttemptEvent::ServiceFailed, 2)
                .expect("fail"),
            AttemptState::Generating { attempt: 2 }
        );
    }

    #[test]
    fn invalid_transitions_are_errors() {
        assert!(AttemptState::Init.next(AttemptEvent::Accepted, 1).is_err());
        assert!(
            AttemptState::SyntaxCheck { attempt: 1 }
                .next(AttemptEvent::Accepted, 1)
                .is_err()
        );
        assert!(
            AttemptState::Accepted { attempt: 1 }
                .next(AttemptEvent::Begin, 1)
                .is_err()
        );
        assert!(AttemptState::Init.next(AttemptEvent::Begin, 0).is_err());
    }

    #[test]
    fn feedback_renders_service_failures() {
        let result = AttemptResult::ServiceFailed("connection reset".to_string());
        assert_eq!(result.to_string(), "Exception: connection reset");
        assert_eq!(result.status(), "exception");
        assert!(!result.is_accepted());
    }
}
