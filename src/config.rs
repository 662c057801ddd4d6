use crate::{
    error::{MuseError, Result},
    models::LoraArg,
};
use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://www.modelscope.cn";
pub const DEFAULT_REFERER: &str =
    "https://www.modelscope.cn/aigc/imageGeneration?tab=advanced&presetId=5804";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36";

const SUBMIT_PATH: &str = "/api/v1/muse/predict/task/submit";
const STATUS_PATH: &str = "/api/v1/muse/predict/task/status";

#[derive(Debug, Clone)]
pub struct MuseConfig {
    pub cookie: Option<String>,
    pub base_url: String,
    pub referer: String,
    pub user_agent: String,
    pub default_width: u32,
    pub default_height: u32,
    pub lora_args: Vec<LoraArg>,
    pub submit_timeout: Duration,
    pub status_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_ticks: u32,
    /// Consecutive unrecognized payloads tolerated before giving up.
    pub unknown_budget: u32,
    /// Consecutive transport failures retried before giving up.
    pub max_transport_retries: u32,
}

impl Default for MuseConfig {
    fn default() -> Self {
        MuseConfig {
            cookie: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_width: 1104,
            default_height: 1472,
            lora_args: vec![LoraArg::new(334516, 0.5), LoraArg::new(356161, 0.7)],
            submit_timeout: Duration::from_secs(30),
            status_timeout: Duration::from_millis(2500),
        }
    }
}

impl MuseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cookie = env::var("MODELSCOPE_COOKIE")
            .ok()
            .filter(|c| !c.trim().is_empty());
        let base_url = env::var("MUSE_BASE_URL").unwrap_or(defaults.base_url);
        let default_width = env::var("MUSE_DEFAULT_WIDTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.default_width);
        let default_height = env::var("MUSE_DEFAULT_HEIGHT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.default_height);

        MuseConfig {
            cookie,
            base_url,
            default_width,
            default_height,
            ..defaults
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_default_size(mut self, width: u32, height: u32) -> Self {
        self.default_width = width;
        self.default_height = height;
        self
    }

    pub fn with_lora_args(mut self, lora_args: Vec<LoraArg>) -> Self {
        self.lora_args = lora_args;
        self
    }

    pub fn with_timeouts(mut self, submit: Duration, status: Duration) -> Self {
        self.submit_timeout = submit;
        self.status_timeout = status;
        self
    }

    pub fn submit_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), SUBMIT_PATH)
    }

    pub fn status_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), STATUS_PATH)
    }

    /// Origin header value derived from the base URL.
    pub fn origin(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            interval: Duration::from_secs(3),
            max_ticks: 60,
            unknown_budget: 3,
            max_transport_retries: 3,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        let interval = env::var("MUSE_POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.interval);
        let max_ticks = env::var("MUSE_MAX_TICKS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_ticks);
        let unknown_budget = env::var("MUSE_UNKNOWN_BUDGET")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.unknown_budget);
        let max_transport_retries = env::var("MUSE_TRANSPORT_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_transport_retries);

        PollerConfig {
            interval,
            max_ticks,
            unknown_budget,
            max_transport_retries,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_ticks(mut self, max_ticks: u32) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    pub fn with_unknown_budget(mut self, budget: u32) -> Self {
        self.unknown_budget = budget;
        self
    }

    pub fn with_max_transport_retries(mut self, retries: u32) -> Self {
        self.max_transport_retries = retries;
        self
    }

    /// Rejects a zero tick limit or a zero unknown budget.
    pub fn validate_budgets(&self) -> Result<()> {
        if self.max_ticks == 0 {
            return Err(MuseError::Config("max_ticks must be at least 1".into()));
        }
        if self.unknown_budget == 0 {
            return Err(MuseError::Config(
                "unknown_budget must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Checks the poller settings against the status call timeout. A
    /// status call must not be able to outlast the tick that issued it.
    ///
    /// The submit timeout is not checked: submission happens once, before
    /// the first tick, so it never overlaps a poll interval.
    pub fn validate(&self, status_timeout: Duration) -> Result<()> {
        self.validate_budgets()?;
        if !self.interval.is_zero() && status_timeout >= self.interval {
            return Err(MuseError::Config(format!(
                "status timeout ({}ms) must be shorter than the poll interval ({}ms)",
                status_timeout.as_millis(),
                self.interval.as_millis()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_built_from_base_url() {
        let config = MuseConfig::new().with_base_url("http://localhost:8080/");
        assert_eq!(
            config.submit_url(),
            "http://localhost:8080/api/v1/muse/predict/task/submit"
        );
        assert_eq!(
            config.status_url(),
            "http://localhost:8080/api/v1/muse/predict/task/status"
        );
        assert_eq!(config.origin(), "http://localhost:8080");
    }

    #[test]
    fn default_poller_fits_default_timeouts() {
        let muse = MuseConfig::default();
        let poller = PollerConfig::default();
        assert_eq!(poller.max_ticks, 60);
        assert_eq!(poller.unknown_budget, 3);
        assert!(poller.validate(muse.status_timeout).is_ok());
    }

    #[test]
    fn submit_timeout_may_exceed_interval() {
        let muse =
            MuseConfig::new().with_timeouts(Duration::from_secs(30), Duration::from_secs(1));
        let poller = PollerConfig::new().with_interval(Duration::from_secs(3));
        assert!(muse.submit_timeout > poller.interval);
        assert!(poller.validate(muse.status_timeout).is_ok());
    }

    #[test]
    fn status_timeout_must_be_shorter_than_interval() {
        let poller = PollerConfig::new().with_interval(Duration::from_secs(2));
        let err = poller.validate(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, MuseError::Config(_)));

        let test_mode = PollerConfig::new().with_interval(Duration::ZERO);
        assert!(test_mode.validate(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn zero_ticks_is_rejected() {
        let poller = PollerConfig::new().with_max_ticks(0);
        assert!(poller.validate(Duration::from_millis(100)).is_err());
        assert!(poller.validate_budgets().is_err());
        assert!(PollerConfig::new()
            .with_unknown_budget(0)
            .validate_budgets()
            .is_err());
    }
}
