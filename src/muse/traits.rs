use crate::{
    error::Result,
    models::{GenerationRequest, JobHandle},
};
use async_trait::async_trait;

/// The two remote calls a poll sequence needs. [`JobClient`] talks to the
/// muse HTTP API; tests drive the poller with scripted implementations.
///
/// [`JobClient`]: super::JobClient
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn submit(&self, request: &GenerationRequest) -> Result<JobHandle>;

    /// Returns the raw status payload. Network failures, timeouts and
    /// non-2xx responses surface as `MuseError::Transport`.
    async fn poll_once(&self, handle: &JobHandle) -> Result<serde_json::Value>;
}
