use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MuseError {
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Submission error: {0}")]
    Submission(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("unrecognized response shape")]
    UnrecognizedSchema,
    /// The provider reported the job itself as failed. Displays the
    /// provider's message untouched.
    #[error("{0}")]
    RemoteJobFailure(String),
    #[error("completed but no artifacts found")]
    Extraction,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MuseError {
    /// Only transport failures are worth another attempt within a poll sequence.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MuseError::Transport(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MuseError::Auth(_) => "auth",
            MuseError::Submission(_) => "submission",
            MuseError::Transport(_) => "transport",
            MuseError::UnrecognizedSchema => "unrecognized_schema",
            MuseError::RemoteJobFailure(_) => "remote_job_failure",
            MuseError::Extraction => "extraction",
            MuseError::InvalidRequest(_) => "invalid_request",
            MuseError::Config(_) => "config",
        }
    }
}

impl From<reqwest::Error> for MuseError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            MuseError::Transport(format!("request timed out: {}", e))
        } else {
            MuseError::Transport(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, MuseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_failure_message_is_verbatim() {
        let err = MuseError::RemoteJobFailure("显存不足".to_string());
        assert_eq!(err.to_string(), "显存不足");
    }

    #[test]
    fn only_transport_is_retryable() {
        assert!(MuseError::Transport("reset".into()).is_retryable());
        assert!(!MuseError::Auth("no cookie".into()).is_retryable());
        assert!(!MuseError::UnrecognizedSchema.is_retryable());
        assert_eq!(
            MuseError::Extraction.to_string(),
            "completed but no artifacts found"
        );
    }
}
