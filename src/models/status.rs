use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider-issued identifier of one submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
        }
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.job_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
    Unknown,
}

/// Canonical view of one status response.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Queued {
        percent: Option<u8>,
        detail: String,
    },
    Processing {
        percent: Option<u8>,
        detail: String,
    },
    /// Carries the raw response so the artifacts can be located in it.
    Completed { payload: serde_json::Value },
    Failed { message: String },
    Unknown { raw_status: Option<String> },
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        match self {
            JobStatus::Queued { .. } => JobState::Queued,
            JobStatus::Processing { .. } => JobState::Processing,
            JobStatus::Completed { .. } => JobState::Completed,
            JobStatus::Failed { .. } => JobState::Failed,
            JobStatus::Unknown { .. } => JobState::Unknown,
        }
    }

    pub fn percent(&self) -> Option<u8> {
        match self {
            JobStatus::Queued { percent, .. } | JobStatus::Processing { percent, .. } => *percent,
            JobStatus::Completed { .. } => Some(100),
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            JobStatus::Queued { detail, .. } | JobStatus::Processing { detail, .. } => {
                Some(detail.as_str())
            }
            JobStatus::Failed { message } => Some(message.as_str()),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors_follow_the_variant() {
        let processing = JobStatus::Processing {
            percent: Some(40),
            detail: "working".into(),
        };
        assert_eq!(processing.state(), JobState::Processing);
        assert_eq!(processing.percent(), Some(40));
        assert_eq!(processing.detail(), Some("working"));
        assert!(!processing.is_terminal());

        let done = JobStatus::Completed { payload: json!({}) };
        assert!(done.is_terminal());
        assert_eq!(done.percent(), Some(100));

        let unknown = JobStatus::Unknown { raw_status: None };
        assert_eq!(unknown.detail(), None);
    }
}
