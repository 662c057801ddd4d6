//! Collapses the status envelopes returned by the muse API into a
//! [`JobStatus`].
//!
//! Two envelopes are recognized, tried in order:
//!
//! * `{"Success": true, "Data": {"data": {...}}}` (current)
//! * `{"code": 0, "data": {...}}` (legacy)
//!
//! Anything else normalizes to [`JobStatus::Unknown`].

use crate::models::JobStatus;
use serde_json::{Map, Value};

pub const GENERIC_DETAIL: &str = "processing, please wait...";
pub const DEFAULT_FAILURE_MESSAGE: &str = "unknown error";

type Object = Map<String, Value>;

pub fn normalize_status(payload: &Value) -> JobStatus {
    match task_object(payload) {
        Some(task) => from_task(task, payload),
        None => JobStatus::Unknown { raw_status: None },
    }
}

/// Locates the task object inside whichever envelope matches first.
pub(crate) fn task_object(payload: &Value) -> Option<&Object> {
    primary_task(payload).or_else(|| legacy_task(payload))
}

fn primary_task(payload: &Value) -> Option<&Object> {
    if payload.get("Success").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    payload.get("Data")?.get("data")?.as_object()
}

fn legacy_task(payload: &Value) -> Option<&Object> {
    if payload.get("code").and_then(Value::as_i64) != Some(0) {
        return None;
    }
    payload.get("data")?.as_object()
}

fn from_task(task: &Object, payload: &Value) -> JobStatus {
    let status = task.get("status").and_then(Value::as_str).unwrap_or("");

    match status {
        "COMPLETED" | "SUCCESS" | "SUCCEED" => JobStatus::Completed {
            payload: payload.clone(),
        },
        "FAILED" => JobStatus::Failed {
            message: non_empty_str(task.get("errorMsg"))
                .unwrap_or(DEFAULT_FAILURE_MESSAGE)
                .to_string(),
        },
        "PENDING" => {
            let percent = progress_percent(task);
            let detail = queue_detail(task)
                .or_else(|| progress_detail(task))
                .unwrap_or_else(|| default_detail(percent));
            JobStatus::Queued { percent, detail }
        }
        "PROCESSING" | "QUEUING" => {
            let percent = progress_percent(task);
            let detail = progress_detail(task).unwrap_or_else(|| default_detail(percent));
            JobStatus::Processing { percent, detail }
        }
        other => JobStatus::Unknown {
            raw_status: (!other.is_empty()).then(|| other.to_string()),
        },
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn progress_percent(task: &Object) -> Option<u8> {
    let raw = task.get("progress")?.get("percent")?;
    let percent = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok()?,
        _ => return None,
    };
    if !percent.is_finite() {
        return None;
    }
    Some(percent.clamp(0.0, 100.0).round() as u8)
}

fn progress_detail(task: &Object) -> Option<String> {
    non_empty_str(task.get("progress").and_then(|p| p.get("detail"))).map(str::to_string)
}

fn queue_detail(task: &Object) -> Option<String> {
    let queue = task.get("taskQueue")?.as_object()?;
    Some(format!(
        "queued: position {} of {}",
        render_count(queue.get("currentPosition")),
        render_count(queue.get("total"))
    ))
}

fn render_count(value: Option<&Value>) -> String {
    match value {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => "?".to_string(),
    }
}

fn default_detail(percent: Option<u8>) -> String {
    match percent {
        Some(p) if p > 0 => format!("generating image, {}%", p),
        _ => GENERIC_DETAIL.to_string(),
    }
}
