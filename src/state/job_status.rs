/// Job status definitions for tracking crawl job progress
///
/// A job moves `queued -> running -> {completed | failed | canceled}` and a
/// terminal status never changes again.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current status of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    // ===== Active States =====
    /// Job was accepted but its seed has not been dispatched
    Queued,

    /// At least one task has been dispatched
    Running,

    // ===== Terminal States =====
    /// The frontier drained with no pending tasks
    Completed,

    /// Runtime cap exceeded or an orchestrator defect
    Failed,

    /// Canceled externally
    Canceled,
}

impl JobStatus {
    /// Returns true if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Returns true if tasks for this job may still run
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Queued, Self::Running) => true,
            (Self::Queued | Self::Running, Self::Canceled) => true,
            (Self::Queued | Self::Running, Self::Failed) => true,
            (Self::Running, Self::Completed) => true,
            _ => false,
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Returns all possible job statuses
    pub fn all_statuses() -> Vec<Self> {
        vec![
            Self::Queued,
            Self::Running,
            Self::Completed,
            Self::Failed,
            Self::Canceled,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());

        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_legal_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Canceled));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Canceled));
    }

    #[test]
    fn test_terminal_statuses_never_transition() {
        for from in [JobStatus::Completed, JobStatus::Failed, JobStatus::Canceled] {
            for to in JobStatus::all_statuses() {
                assert!(
                    !from.can_transition_to(to),
                    "{:?} -> {:?} should be illegal",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_queued_cannot_complete_directly() {
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn test_roundtrip_db_string() {
        for status in JobStatus::all_statuses() {
            let db_str = status.to_db_string();
            let parsed = JobStatus::from_db_string(db_str);
            assert_eq!(Some(status), parsed, "Failed roundtrip for {:?}", status);
        }
        assert_eq!(JobStatus::from_db_string("invalid"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", JobStatus::Canceled), "canceled");
    }
}
