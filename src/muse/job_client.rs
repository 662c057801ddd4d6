use super::traits::JobApi;
use crate::{
    config::MuseConfig,
    error::{MuseError, Result},
    models::{GenerationRequest, JobHandle},
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{
    header::{
        HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, ORIGIN,
        REFERER, USER_AGENT,
    },
    Client, StatusCode,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

const TASK_TYPE: &str = "TXT_2_IMG";

/// Cookie names that may hold the CSRF token, in lookup order.
const CSRF_COOKIE_NAMES: &[&str] = &[
    "csrf_token",
    "csrftoken",
    "csrf_session",
    "XSRF-TOKEN",
    "csrfToken",
];

static CSRF_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    CSRF_COOKIE_NAMES
        .iter()
        .filter_map(|name| {
            Regex::new(&format!(r"(?:^|;)\s*{}=([^;]*)", regex::escape(name))).ok()
        })
        .collect()
});

const SESSION_EXPIRED_MARKERS: &[&str] = &["会话已过期", "session expired"];

#[derive(Clone)]
pub struct JobClient {
    http: Client,
    config: Arc<MuseConfig>,
}

impl JobClient {
    pub fn new(config: Arc<MuseConfig>) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| MuseError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    /// Reuses an existing [`reqwest::Client`] so several job clients can
    /// share one connection pool.
    pub fn with_client(http: Client, config: Arc<MuseConfig>) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &MuseConfig {
        &self.config
    }

    fn cookie(&self) -> Result<&str> {
        self.config
            .cookie
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| MuseError::Auth("session cookie is not configured".into()))
    }

    fn build_headers(&self, cookie: &str, with_csrf: bool) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9"),
        );
        headers.insert(
            HeaderName::from_static("x-modelscope-accept-language"),
            HeaderValue::from_static("zh_CN"),
        );
        headers.insert(
            COOKIE,
            HeaderValue::from_str(cookie).map_err(|_| {
                MuseError::Auth("session cookie contains characters not allowed in a header".into())
            })?,
        );
        headers.insert(REFERER, header_value(&self.config.referer, "referer")?);
        headers.insert(USER_AGENT, header_value(&self.config.user_agent, "user agent")?);
        headers.insert(
            HeaderName::from_static("x-modelscope-trace-id"),
            header_value(&Uuid::new_v4().to_string(), "trace id")?,
        );

        if with_csrf {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            headers.insert(ORIGIN, header_value(&self.config.origin(), "origin")?);
            match extract_csrf_token(cookie) {
                Some(token) => {
                    headers.insert(
                        HeaderName::from_static("x-csrftoken"),
                        header_value(&token, "csrf token")?,
                    );
                }
                None => log::warn!("No CSRF token found in session cookie, submitting without it"),
            }
        }

        Ok(headers)
    }

    pub fn build_submit_body(&self, request: &GenerationRequest) -> Value {
        let args = request.model_args();
        let lora_args = args.lora_args.as_ref().unwrap_or(&self.config.lora_args);

        let mut model_args = json!({
            "checkpointModelVersionId": args.checkpoint_version_id,
            "checkpointShowInfo": args.checkpoint_name,
            "loraArgs": lora_args,
            "predictType": TASK_TYPE
        });
        if let Some(obj) = model_args.as_object_mut() {
            for (key, value) in &args.extra {
                obj.insert(key.clone(), value.clone());
            }
        }

        json!({
            "taskType": TASK_TYPE,
            "type": TASK_TYPE,
            "task_type": TASK_TYPE,
            "predictType": TASK_TYPE,
            "modelArgs": model_args,
            "promptArgs": {
                "prompt": request.prompt(),
                "negativePrompt": args.negative_prompt
            },
            "basicDiffusionArgs": {
                "sampler": args.sampler,
                "guidanceScale": args.guidance_scale,
                "seed": args.seed,
                "numInferenceSteps": args.inference_steps,
                "numImagesPerPrompt": args.images_per_prompt,
                "width": request.width(),
                "height": request.height()
            },
            "advanced": false,
            "addWaterMark": false,
            "adetailerArgsMap": {},
            "controlNetFullArgs": [],
            "hiresFixFrontArgs": null
        })
    }
}

#[async_trait]
impl JobApi for JobClient {
    async fn submit(&self, request: &GenerationRequest) -> Result<JobHandle> {
        let cookie = self.cookie()?;
        let headers = self.build_headers(cookie, true)?;
        let body = self.build_submit_body(request);

        log::info!(
            "Submitting generation job ({}x{}): {}",
            request.width(),
            request.height(),
            request.prompt_preview()
        );
        log::debug!("Submit request body: {}", body);

        let response = self
            .http
            .post(self.config.submit_url())
            .headers(headers)
            .json(&body)
            .timeout(self.config.submit_timeout)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        log::debug!("Submit response ({}): {}", status, text);

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(MuseError::Auth(format!(
                "session rejected by the service (HTTP {})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(MuseError::Submission(format!(
                "submit endpoint returned HTTP {}: {}",
                status.as_u16(),
                truncate(&text, 200)
            )));
        }

        let payload: Value = serde_json::from_str(&text)
            .map_err(|e| MuseError::Submission(format!("submit response is not JSON: {}", e)))?;

        let handle = parse_submit_response(&payload)?;
        log::info!("Job submitted, id {}", handle);
        Ok(handle)
    }

    async fn poll_once(&self, handle: &JobHandle) -> Result<Value> {
        let cookie = self.cookie()?;
        let headers = self.build_headers(cookie, false)?;

        let response = self
            .http
            .get(self.config.status_url())
            .query(&[("taskId", handle.job_id.as_str())])
            .headers(headers)
            .timeout(self.config.status_timeout)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(MuseError::Transport(format!(
                "status endpoint returned HTTP {}: {}",
                status.as_u16(),
                truncate(&text, 200)
            )));
        }

        log::debug!("Status for job {}: {}", handle, text);

        match serde_json::from_str(&text) {
            Ok(payload) => Ok(payload),
            Err(e) => {
                log::warn!("Status response for job {} is not JSON: {}", handle, e);
                Ok(Value::Null)
            }
        }
    }
}

fn header_value(value: &str, what: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| {
        MuseError::Config(format!("{} contains characters not allowed in a header", what))
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

/// First CSRF token found in the cookie string, quotes stripped.
pub fn extract_csrf_token(cookie: &str) -> Option<String> {
    CSRF_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(cookie)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().trim_matches('"').to_string())
            .filter(|token| !token.is_empty())
    })
}

/// Turns a submit response into a job handle, surfacing business errors
/// reported inside a 2xx body.
pub fn parse_submit_response(payload: &Value) -> Result<JobHandle> {
    if let Some(data) = payload.get("Data").filter(|d| d.is_object()) {
        if let Some(code) = data.get("code").filter(|c| !c.is_null()) {
            if code.as_i64() != Some(0) {
                let message = data
                    .get("message")
                    .and_then(Value::as_str)
                    .filter(|m| !m.is_empty())
                    .unwrap_or("unknown error");
                let lower = message.to_lowercase();
                if SESSION_EXPIRED_MARKERS.iter().any(|m| lower.contains(m)) {
                    return Err(MuseError::Auth(format!(
                        "session cookie has expired: {}",
                        message
                    )));
                }
                return Err(MuseError::Submission(format!(
                    "service rejected the job: {}",
                    message
                )));
            }
        }
    }

    find_job_id(payload).map(JobHandle::new).ok_or_else(|| {
        log::error!("No job id in submit response: {}", payload);
        MuseError::Submission("no job id in submit response, check the session cookie".into())
    })
}

fn find_job_id(payload: &Value) -> Option<String> {
    let candidates = [
        payload.get("data").and_then(|d| d.get("taskId")),
        payload
            .get("Data")
            .and_then(|d| d.get("data"))
            .and_then(|d| d.get("taskId")),
        payload.get("Data").and_then(|d| d.get("taskId")),
        payload.get("taskId"),
    ];

    candidates.into_iter().flatten().find_map(|id| match id {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
