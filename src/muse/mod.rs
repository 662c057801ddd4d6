pub mod extractor;
pub mod job_client;
pub mod normalizer;
pub mod poller;
pub mod traits;

use crate::{
    config::{MuseConfig, PollerConfig},
    error::Result,
    models::{GenerationRequest, JobHandle, JobStatus, ModelArgs, PollOutcome},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use extractor::extract_artifacts;
pub use job_client::JobClient;
pub use normalizer::normalize_status;
pub use poller::{JobPoller, PollPhase, PollSequence, ProgressFn, TickDecision};
pub use traits::JobApi;

/// Entry point for the surrounding application. Cheap to clone; clones
/// share the HTTP connection pool and the read-only configuration.
#[derive(Clone)]
pub struct MuseClient {
    config: Arc<MuseConfig>,
    api: Arc<dyn JobApi>,
    poller: JobPoller,
}

impl MuseClient {
    pub fn new(config: MuseConfig, poller_config: PollerConfig) -> Result<Self> {
        poller_config.validate(config.status_timeout)?;
        let config = Arc::new(config);
        let api: Arc<dyn JobApi> = Arc::new(JobClient::new(config.clone())?);
        Self::with_api(config, api, poller_config)
    }

    pub fn from_env() -> Result<Self> {
        Self::new(MuseConfig::from_env(), PollerConfig::from_env())
    }

    /// Builds a client around any [`JobApi`] implementation.
    pub fn with_api(
        config: Arc<MuseConfig>,
        api: Arc<dyn JobApi>,
        poller_config: PollerConfig,
    ) -> Result<Self> {
        let poller = JobPoller::new(api.clone(), poller_config)?;
        Ok(Self {
            config,
            api,
            poller,
        })
    }

    pub fn config(&self) -> &MuseConfig {
        &self.config
    }

    pub fn poller(&self) -> &JobPoller {
        &self.poller
    }

    /// Request at the configured default size.
    pub fn request(&self, prompt: impl Into<String>) -> Result<GenerationRequest> {
        GenerationRequest::new(prompt, self.config.default_width, self.config.default_height)
    }

    pub fn request_with_args(
        &self,
        prompt: impl Into<String>,
        model_args: ModelArgs,
    ) -> Result<GenerationRequest> {
        GenerationRequest::with_model_args(
            prompt,
            self.config.default_width,
            self.config.default_height,
            model_args,
        )
    }

    pub async fn submit_and_track(
        &self,
        request: &GenerationRequest,
        on_progress: Option<&ProgressFn<'_>>,
        cancel: Option<&CancellationToken>,
    ) -> PollOutcome {
        let _timer = crate::logger::timer(&format!("generation {}", request.prompt_preview()));
        self.poller.run(request, on_progress, cancel).await
    }

    /// Submits without polling, for callers that poll on their own cadence
    /// through [`MuseClient::check_status`].
    pub async fn submit(&self, request: &GenerationRequest) -> Result<JobHandle> {
        self.api.submit(request).await
    }

    /// One status call, normalized.
    pub async fn check_status(&self, job_id: &str) -> Result<JobStatus> {
        let payload = self.api.poll_once(&JobHandle::new(job_id)).await?;
        Ok(normalize_status(&payload))
    }
}
