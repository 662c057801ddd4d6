//! Submit-then-poll driver.
//!
//! [`PollSequence`] holds every decision of a poll sequence and does no
//! I/O; [`JobPoller`] is the async driver that sleeps between ticks,
//! watches the cancellation token and calls the [`JobApi`].

use super::{extractor::extract_artifacts, normalizer::normalize_status, traits::JobApi};
use crate::{
    config::PollerConfig,
    error::{MuseError, Result},
    models::{GenerationRequest, JobHandle, JobStatus, PollOutcome, ProgressUpdate},
};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Progress side-channel supplied by the caller. May borrow caller state.
pub type ProgressFn<'a> = dyn Fn(&ProgressUpdate) + Send + Sync + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Submitting,
    Polling,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickDecision {
    Continue(Option<ProgressUpdate>),
    Finish(PollOutcome),
}

#[derive(Debug, Clone)]
pub struct PollSequence {
    config: PollerConfig,
    phase: PollPhase,
    ticks: u32,
    consecutive_unknown: u32,
    consecutive_transport_failures: u32,
}

impl PollSequence {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            phase: PollPhase::Submitting,
            ticks: 0,
            consecutive_unknown: 0,
            consecutive_transport_failures: 0,
        }
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.phase, PollPhase::Submitting | PollPhase::Polling)
    }

    pub fn submitted(&mut self) {
        if self.phase == PollPhase::Submitting {
            self.phase = PollPhase::Polling;
        }
    }

    pub fn submit_failed(&mut self, error: MuseError) -> PollOutcome {
        self.finish(PollOutcome::Failure(error))
    }

    pub fn has_ticks_left(&self) -> bool {
        self.phase == PollPhase::Polling && self.ticks < self.config.max_ticks
    }

    /// Counts a new tick and returns its 1-based number.
    pub fn begin_tick(&mut self) -> u32 {
        self.ticks += 1;
        self.ticks
    }

    /// Folds the result of one status call into the sequence.
    pub fn observe(&mut self, polled: Result<Value>) -> TickDecision {
        let payload = match polled {
            Ok(payload) => {
                self.consecutive_transport_failures = 0;
                payload
            }
            Err(error) if error.is_retryable() => {
                self.consecutive_transport_failures += 1;
                if self.consecutive_transport_failures > self.config.max_transport_retries {
                    log::error!(
                        "Giving up after {} consecutive transport failures: {}",
                        self.consecutive_transport_failures,
                        error
                    );
                    return TickDecision::Finish(self.finish(PollOutcome::Failure(error)));
                }
                log::warn!(
                    "Status call failed (attempt {}/{}), retrying: {}",
                    self.consecutive_transport_failures,
                    self.config.max_transport_retries,
                    error
                );
                return TickDecision::Continue(None);
            }
            Err(error) => return TickDecision::Finish(self.finish(PollOutcome::Failure(error))),
        };

        match normalize_status(&payload) {
            JobStatus::Completed { payload } => {
                self.consecutive_unknown = 0;
                let outcome = match extract_artifacts(&payload) {
                    Ok(artifacts) => PollOutcome::Success(artifacts),
                    Err(error) => PollOutcome::Failure(error),
                };
                TickDecision::Finish(self.finish(outcome))
            }
            JobStatus::Failed { message } => TickDecision::Finish(
                self.finish(PollOutcome::Failure(MuseError::RemoteJobFailure(message))),
            ),
            JobStatus::Queued { percent, detail } | JobStatus::Processing { percent, detail } => {
                self.consecutive_unknown = 0;
                TickDecision::Continue(Some(ProgressUpdate {
                    tick: self.ticks,
                    percent: percent.unwrap_or(0),
                    detail,
                }))
            }
            JobStatus::Unknown { raw_status } => {
                self.consecutive_unknown += 1;
                if self.consecutive_unknown >= self.config.unknown_budget {
                    log::error!(
                        "{} consecutive unrecognized status responses, giving up",
                        self.consecutive_unknown
                    );
                    return TickDecision::Finish(
                        self.finish(PollOutcome::Failure(MuseError::UnrecognizedSchema)),
                    );
                }
                log::warn!(
                    "Unrecognized status response (status {:?}), {}/{} tolerated",
                    raw_status,
                    self.consecutive_unknown,
                    self.config.unknown_budget
                );
                TickDecision::Continue(None)
            }
        }
    }

    pub fn time_out(&mut self) -> PollOutcome {
        self.finish(PollOutcome::TimedOut)
    }

    pub fn cancel(&mut self) -> PollOutcome {
        self.finish(PollOutcome::Cancelled)
    }

    fn finish(&mut self, outcome: PollOutcome) -> PollOutcome {
        self.phase = match &outcome {
            PollOutcome::Success(_) => PollPhase::Completed,
            PollOutcome::Failure(_) => PollPhase::Failed,
            PollOutcome::TimedOut => PollPhase::TimedOut,
            PollOutcome::Cancelled => PollPhase::Cancelled,
        };
        outcome
    }
}

#[derive(Clone)]
pub struct JobPoller {
    api: Arc<dyn JobApi>,
    config: PollerConfig,
}

impl JobPoller {
    /// Fails with [`MuseError::Config`] when the tick or unknown budget
    /// is zero.
    pub fn new(api: Arc<dyn JobApi>, config: PollerConfig) -> Result<Self> {
        config.validate_budgets()?;
        Ok(Self { api, config })
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Submits `request` and polls until a terminal outcome. Never
    /// returns an error: every failure is folded into the outcome.
    pub async fn run(
        &self,
        request: &GenerationRequest,
        on_progress: Option<&ProgressFn<'_>>,
        cancel: Option<&CancellationToken>,
    ) -> PollOutcome {
        let mut sequence = PollSequence::new(self.config.clone());

        if is_cancelled(cancel) {
            return sequence.cancel();
        }

        let handle = match self.api.submit(request).await {
            Ok(handle) => handle,
            Err(error) => {
                log::error!("Job submission failed: {}", error);
                return sequence.submit_failed(error);
            }
        };
        sequence.submitted();

        self.drive(&handle, sequence, on_progress, cancel).await
    }

    /// Polls a job that was submitted elsewhere.
    pub async fn track(
        &self,
        handle: &JobHandle,
        on_progress: Option<&ProgressFn<'_>>,
        cancel: Option<&CancellationToken>,
    ) -> PollOutcome {
        let mut sequence = PollSequence::new(self.config.clone());
        sequence.submitted();
        self.drive(handle, sequence, on_progress, cancel).await
    }

    async fn drive(
        &self,
        handle: &JobHandle,
        mut sequence: PollSequence,
        on_progress: Option<&ProgressFn<'_>>,
        cancel: Option<&CancellationToken>,
    ) -> PollOutcome {
        log::info!(
            "Polling job {} every {}ms, at most {} ticks",
            handle,
            self.config.interval.as_millis(),
            self.config.max_ticks
        );

        while sequence.has_ticks_left() {
            if !self.wait(cancel).await {
                log::info!("Polling of job {} cancelled", handle);
                return sequence.cancel();
            }

            let tick = sequence.begin_tick();
            log::debug!("Job {} tick {}/{}", handle, tick, self.config.max_ticks);

            let polled = self.api.poll_once(handle).await;
            match sequence.observe(polled) {
                TickDecision::Continue(Some(update)) => {
                    log::debug!("Job {} at {}%: {}", handle, update.percent, update.detail);
                    if let Some(callback) = on_progress {
                        callback(&update);
                    }
                }
                TickDecision::Continue(None) => {}
                TickDecision::Finish(outcome) => {
                    match &outcome {
                        PollOutcome::Success(artifacts) => log::info!(
                            "Job {} completed with {} image(s) after {} tick(s)",
                            handle,
                            artifacts.len(),
                            tick
                        ),
                        other => log::warn!(
                            "Job {} ended after {} tick(s): {}",
                            handle,
                            tick,
                            other.reason().unwrap_or_default()
                        ),
                    }
                    return outcome;
                }
            }
        }

        log::warn!(
            "Job {} still running after {} ticks, giving up",
            handle,
            sequence.ticks()
        );
        sequence.time_out()
    }

    /// Sleeps one interval. Returns `false` when cancelled before or
    /// during the sleep.
    async fn wait(&self, cancel: Option<&CancellationToken>) -> bool {
        match cancel {
            Some(token) => {
                if token.is_cancelled() {
                    return false;
                }
                tokio::select! {
                    _ = token.cancelled() => false,
                    _ = tokio::time::sleep(self.config.interval) => !token.is_cancelled(),
                }
            }
            None => {
                tokio::time::sleep(self.config.interval).await;
                true
            }
        }
    }
}

fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.map_or(false, CancellationToken::is_cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedApi {
        submit: Result<JobHandle>,
        polls: Mutex<VecDeque<Result<Value>>>,
        poll_count: AtomicU32,
        submit_count: AtomicU32,
    }

    impl ScriptedApi {
        fn new(polls: Vec<Result<Value>>) -> Self {
            Self {
                submit: Ok(JobHandle::new("T1")),
                polls: Mutex::new(polls.into()),
                poll_count: AtomicU32::new(0),
                submit_count: AtomicU32::new(0),
            }
        }

        fn failing_submit(error: MuseError) -> Self {
            Self {
                submit: Err(error),
                ..Self::new(Vec::new())
            }
        }

        fn polls(&self) -> u32 {
            self.poll_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobApi for ScriptedApi {
        async fn submit(&self, _request: &GenerationRequest) -> Result<JobHandle> {
            self.submit_count.fetch_add(1, Ordering::SeqCst);
            self.submit.clone()
        }

        async fn poll_once(&self, handle: &JobHandle) -> Result<Value> {
            assert_eq!(handle.job_id, "T1");
            self.poll_count.fetch_add(1, Ordering::SeqCst);
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(processing(10)))
        }
    }

    fn primary(task: Value) -> Value {
        json!({"Success": true, "Data": {"data": task}})
    }

    fn processing(percent: u8) -> Value {
        primary(json!({"status": "PROCESSING", "progress": {"percent": percent}}))
    }

    fn transport() -> Result<Value> {
        Err(MuseError::Transport("connection reset".into()))
    }

    fn fast_config() -> PollerConfig {
        PollerConfig::new().with_interval(Duration::ZERO)
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("a cat", 512, 512).unwrap()
    }

    async fn run(api: Arc<ScriptedApi>, config: PollerConfig) -> PollOutcome {
        JobPoller::new(api, config)
            .unwrap()
            .run(&request(), None, None)
            .await
    }

    #[tokio::test]
    async fn processing_then_completed_succeeds() {
        let api = Arc::new(ScriptedApi::new(vec![
            Ok(processing(40)),
            Ok(primary(json!({
                "status": "COMPLETED",
                "predictResult": [{"url": "https://x/a.png"}]
            }))),
        ]));
        let seen = Mutex::new(Vec::new());
        let on_progress = |update: &ProgressUpdate| {
            seen.lock().unwrap().push((update.tick, update.percent));
        };

        let outcome = JobPoller::new(api.clone(), fast_config())
            .unwrap()
            .run(&request(), Some(&on_progress), None)
            .await;

        assert_eq!(outcome.urls(), vec!["https://x/a.png"]);
        assert_eq!(api.polls(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 40)]);
    }

    #[tokio::test]
    async fn completed_without_artifacts_fails() {
        let api = Arc::new(ScriptedApi::new(vec![Ok(primary(json!({
            "status": "COMPLETED",
            "predictResult": []
        })))]));
        let outcome = run(api, fast_config()).await;
        assert_eq!(outcome, PollOutcome::Failure(MuseError::Extraction));
        assert_eq!(
            outcome.reason().as_deref(),
            Some("completed but no artifacts found")
        );
    }

    #[tokio::test]
    async fn remote_failure_passes_message_through() {
        let api = Arc::new(ScriptedApi::new(vec![Ok(primary(json!({
            "status": "FAILED",
            "errorMsg": "prompt rejected by moderation"
        })))]));
        let outcome = run(api, fast_config()).await;
        assert_eq!(
            outcome.reason().as_deref(),
            Some("prompt rejected by moderation")
        );

        let api = Arc::new(ScriptedApi::new(vec![Ok(primary(json!({"status": "FAILED"})))]));
        let outcome = run(api, fast_config()).await;
        assert_eq!(outcome.reason().as_deref(), Some("unknown error"));
    }

    #[tokio::test]
    async fn unknown_budget_is_enforced() {
        let api = Arc::new(ScriptedApi::new(vec![
            Ok(json!({"weird": true})),
            Ok(json!(null)),
            Ok(primary(json!({"status": "EXPLODED"}))),
        ]));
        let outcome = run(api.clone(), fast_config()).await;
        assert_eq!(outcome, PollOutcome::Failure(MuseError::UnrecognizedSchema));
        assert_eq!(api.polls(), 3);
    }

    #[tokio::test]
    async fn times_out_after_exactly_max_ticks() {
        let api = Arc::new(ScriptedApi::new(Vec::new()));
        let outcome = run(api.clone(), fast_config().with_max_ticks(2)).await;
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(api.polls(), 2);
    }

    #[tokio::test]
    async fn transport_errors_are_retried_in_place() {
        let api = Arc::new(ScriptedApi::new(vec![
            transport(),
            transport(),
            Ok(primary(json!({
                "status": "SUCCESS",
                "predictResult": {"imageUrl": "https://x/b.jpg"}
            }))),
        ]));
        let outcome = run(api.clone(), fast_config()).await;
        assert_eq!(outcome.urls(), vec!["https://x/b.jpg"]);
        assert_eq!(api.polls(), 3);
    }

    #[tokio::test]
    async fn transport_ceiling_fails_the_sequence() {
        let api = Arc::new(ScriptedApi::new(vec![
            transport(),
            transport(),
            transport(),
            transport(),
        ]));
        let outcome = run(api.clone(), fast_config().with_max_transport_retries(3)).await;
        assert!(matches!(outcome, PollOutcome::Failure(MuseError::Transport(_))));
        assert_eq!(api.polls(), 4);
    }

    #[tokio::test]
    async fn transport_errors_do_not_spend_the_unknown_budget() {
        let api = Arc::new(ScriptedApi::new(vec![
            Ok(json!({})),
            transport(),
            transport(),
            Ok(json!({})),
            Ok(primary(json!({
                "status": "COMPLETED",
                "predictResult": [{"url": "https://x/c.png"}]
            }))),
        ]));
        let outcome = run(api, fast_config()).await;
        assert_eq!(outcome.urls(), vec!["https://x/c.png"]);
    }

    #[tokio::test]
    async fn submit_failure_never_polls() {
        let api = Arc::new(ScriptedApi::failing_submit(MuseError::Auth(
            "session cookie is not configured".into(),
        )));
        let outcome = run(api.clone(), fast_config()).await;
        assert!(matches!(outcome, PollOutcome::Failure(MuseError::Auth(_))));
        assert_eq!(api.polls(), 0);
    }

    #[tokio::test]
    async fn cancelled_token_skips_submission() {
        let api = Arc::new(ScriptedApi::new(Vec::new()));
        let token = CancellationToken::new();
        token.cancel();
        let outcome = JobPoller::new(api.clone(), fast_config())
            .unwrap()
            .run(&request(), None, Some(&token))
            .await;
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(api.submit_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_call() {
        let api = Arc::new(ScriptedApi::new(Vec::new()));
        let token = CancellationToken::new();
        let cancel_on_progress = |_: &ProgressUpdate| token.cancel();

        let outcome = JobPoller::new(api.clone(), fast_config())
            .unwrap()
            .run(&request(), Some(&cancel_on_progress), Some(&token))
            .await;
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(api.polls(), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_sleep() {
        let api = Arc::new(ScriptedApi::new(Vec::new()));
        let poller = JobPoller::new(
            api.clone(),
            PollerConfig::new().with_interval(Duration::from_secs(60)),
        )
        .unwrap();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            poller.run(&request(), None, Some(&token)),
        )
        .await
        .expect("cancellation should end the sleep");
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(api.polls(), 0);
    }

    #[test]
    fn zero_budgets_are_rejected() {
        let api: Arc<dyn JobApi> = Arc::new(ScriptedApi::new(Vec::new()));
        assert!(matches!(
            JobPoller::new(api.clone(), fast_config().with_max_ticks(0)),
            Err(MuseError::Config(_))
        ));
        assert!(matches!(
            JobPoller::new(api, fast_config().with_unknown_budget(0)),
            Err(MuseError::Config(_))
        ));
    }

    #[test]
    fn recognized_status_resets_unknown_counter() {
        let mut sequence = PollSequence::new(PollerConfig::new().with_unknown_budget(2));
        sequence.submitted();

        assert_eq!(sequence.observe(Ok(json!({}))), TickDecision::Continue(None));
        assert!(matches!(
            sequence.observe(Ok(processing(5))),
            TickDecision::Continue(Some(_))
        ));
        assert_eq!(sequence.observe(Ok(json!({}))), TickDecision::Continue(None));
        assert_eq!(
            sequence.observe(Ok(json!({}))),
            TickDecision::Finish(PollOutcome::Failure(MuseError::UnrecognizedSchema))
        );
        assert_eq!(sequence.phase(), PollPhase::Failed);
        assert!(!sequence.has_ticks_left());
    }

    #[test]
    fn phases_follow_the_outcome() {
        let mut sequence = PollSequence::new(fast_config());
        assert_eq!(sequence.phase(), PollPhase::Submitting);
        assert!(!sequence.has_ticks_left());

        sequence.submitted();
        assert_eq!(sequence.phase(), PollPhase::Polling);
        assert_eq!(sequence.begin_tick(), 1);

        assert_eq!(sequence.time_out(), PollOutcome::TimedOut);
        assert_eq!(sequence.phase(), PollPhase::TimedOut);
        assert!(sequence.is_finished());
    }
}
