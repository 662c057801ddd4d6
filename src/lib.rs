//! Client for the ModelScope muse text-to-image service.
//!
//! A job is submitted once and then polled until it completes, fails,
//! runs out of ticks or is cancelled. Status responses arrive in several
//! envelope shapes; [`muse::normalize_status`] folds them into a
//! [`JobStatus`] and [`muse::extract_artifacts`] digs the image URLs out
//! of a completed payload.

pub mod config;
pub mod error;
pub mod logger;
pub mod models;
pub mod muse;

pub use config::{MuseConfig, PollerConfig};
pub use error::{MuseError, Result};
pub use models::{
    GenerationRequest, JobHandle, JobState, JobStatus, LoraArg, ModelArgs, PollOutcome,
    ProgressUpdate, ResultArtifact,
};
pub use muse::{JobApi, JobClient, JobPoller, MuseClient};
pub use tokio_util::sync::CancellationToken;
