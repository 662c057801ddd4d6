use crate::error::MuseError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub url: String,
}

impl ResultArtifact {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Progress reported to the caller while a job is still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub tick: u32,
    pub percent: u8,
    pub detail: String,
}

/// Terminal result of one submit-and-poll sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Success(Vec<ResultArtifact>),
    Failure(MuseError),
    TimedOut,
    Cancelled,
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Success(_))
    }

    pub fn artifacts(&self) -> &[ResultArtifact] {
        match self {
            PollOutcome::Success(artifacts) => artifacts,
            _ => &[],
        }
    }

    pub fn urls(&self) -> Vec<&str> {
        self.artifacts().iter().map(|a| a.url.as_str()).collect()
    }

    /// Human-readable reason for anything other than success.
    pub fn reason(&self) -> Option<String> {
        match self {
            PollOutcome::Success(_) => None,
            PollOutcome::Failure(err) => Some(err.to_string()),
            PollOutcome::TimedOut => Some("job did not finish within the polling budget".into()),
            PollOutcome::Cancelled => Some("polling was cancelled".into()),
        }
    }
}
