//! Pipeline job state machine
//!
//! Both pipelines (transcription and cleanup) share one row lifecycle:
//! `pending → processing → completed | failed`. Transitions are monotonic;
//! a retry creates a new row rather than rewinding an old one.
//!
//! [`JobStateMachine::edge`] is the one transition table. The stores consume
//! it directly: the Postgres adapters bind its from/to states into their
//! compare-and-set UPDATEs, and the in-memory stores apply
//! [`JobStateMachine::transition`] under their write lock.

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Status of a transcription or cleanup row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::InvalidInput {
                message: format!("unknown job status: {other}"),
            }),
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Job transition events
#[derive(Debug, Clone, Copy)]
pub enum JobTransition {
    Claim,
    Complete,
    Fail,
}

/// Shared state machine for pipeline rows
pub struct JobStateMachine;

impl JobStateMachine {
    /// The transition table: the only state `event` may fire from, and the
    /// state it produces.
    pub fn edge(event: JobTransition) -> (JobStatus, JobStatus) {
        match event {
            // PENDING -> PROCESSING when a worker claims the row
            JobTransition::Claim => (JobStatus::Pending, JobStatus::Processing),

            // PROCESSING -> COMPLETED on successful persist
            JobTransition::Complete => (JobStatus::Processing, JobStatus::Completed),

            // PROCESSING -> FAILED on permanent error or exhausted retries
            JobTransition::Fail => (JobStatus::Processing, JobStatus::Failed),
        }
    }

    /// Validate and compute the next state for a job transition
    pub fn transition(current: JobStatus, event: JobTransition) -> Result<JobStatus, DomainError> {
        let (from, to) = Self::edge(event);
        if current == from {
            Ok(to)
        } else {
            Err(DomainError::InvalidTransition {
                current_state: format!("{current:?}"),
                attempted_transition: format!("{event:?}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let s = JobStateMachine::transition(JobStatus::Pending, JobTransition::Claim).unwrap();
        assert_eq!(s, JobStatus::Processing);
        let s = JobStateMachine::transition(s, JobTransition::Complete).unwrap();
        assert_eq!(s, JobStatus::Completed);
    }

    #[test]
    fn failure_path_transitions() {
        let s = JobStateMachine::transition(JobStatus::Pending, JobTransition::Claim).unwrap();
        let s = JobStateMachine::transition(s, JobTransition::Fail).unwrap();
        assert_eq!(s, JobStatus::Failed);
    }

    #[test]
    fn terminal_states_reject_all_transitions() {
        for terminal in [JobStatus::Completed, JobStatus::Failed] {
            for event in [JobTransition::Claim, JobTransition::Complete, JobTransition::Fail] {
                assert!(JobStateMachine::transition(terminal, event).is_err());
            }
        }
    }

    #[test]
    fn pending_cannot_skip_processing() {
        assert!(JobStateMachine::transition(JobStatus::Pending, JobTransition::Complete).is_err());
        assert!(JobStateMachine::transition(JobStatus::Pending, JobTransition::Fail).is_err());
    }

    #[test]
    fn edge_and_transition_agree() {
        for event in [JobTransition::Claim, JobTransition::Complete, JobTransition::Fail] {
            let (from, to) = JobStateMachine::edge(event);
            assert_eq!(JobStateMachine::transition(from, event).unwrap(), to);
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(JobStatus::parse("cancelled").is_err());
    }
}
