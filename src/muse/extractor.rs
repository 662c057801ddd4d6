//! Finds the generated image URLs in a completed status payload.
//!
//! Where the service puts its results depends on the task type and on
//! the API revision, so extraction runs an ordered list of strategies and
//! keeps the first one that yields at least one valid URL. The recursive
//! search is a safety net and always runs last.

use super::normalizer::task_object;
use crate::{
    error::{MuseError, Result},
    models::ResultArtifact,
};
use reqwest::Url;
use serde_json::Value;

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp"];
const URL_KEYS: &[&str] = &["url", "imageurl", "image_url"];

type Strategy = fn(&Value) -> Vec<String>;

const STRATEGIES: &[(&str, Strategy)] = &[
    ("predictResult.imageUrl", predict_image_url),
    ("predictResult.image_list", predict_image_list),
    ("result object list", result_object_list),
    ("predictResult.url", predict_url),
    ("recursive search", recursive_search),
];

pub fn extract_artifacts(payload: &Value) -> Result<Vec<ResultArtifact>> {
    for (name, strategy) in STRATEGIES {
        let urls: Vec<String> = strategy(payload)
            .into_iter()
            .filter(|candidate| {
                let valid = is_absolute_http_url(candidate);
                if !valid {
                    log::debug!("Dropping invalid artifact URL from {}: {}", name, candidate);
                }
                valid
            })
            .collect();

        if !urls.is_empty() {
            log::debug!("Extracted {} artifact(s) via {}", urls.len(), name);
            return Ok(urls.into_iter().map(ResultArtifact::new).collect());
        }
    }

    log::error!("Job completed but no artifact URL could be located");
    Err(MuseError::Extraction)
}

fn predict_result(payload: &Value) -> Option<&Value> {
    task_object(payload)?.get("predictResult")
}

fn predict_image_url(payload: &Value) -> Vec<String> {
    predict_result(payload)
        .and_then(|p| p.get("imageUrl"))
        .and_then(Value::as_str)
        .map(|url| vec![url.to_string()])
        .unwrap_or_default()
}

fn predict_image_list(payload: &Value) -> Vec<String> {
    predict_result(payload)
        .and_then(|p| p.get("image_list"))
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn result_object_list(payload: &Value) -> Vec<String> {
    let Some(task) = task_object(payload) else {
        return Vec::new();
    };

    let candidates = [
        task.get("predictResult"),
        task.get("predictResult").and_then(|p| p.get("results")),
        task.get("results"),
    ];

    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("url").and_then(Value::as_str))
                .filter(|url| is_absolute_http_url(url))
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        // a path holding only unusable URLs must not hide the next one
        .find(|urls| !urls.is_empty())
        .unwrap_or_default()
}

fn predict_url(payload: &Value) -> Vec<String> {
    predict_result(payload)
        .and_then(|p| p.get("url"))
        .and_then(Value::as_str)
        .map(|url| vec![url.to_string()])
        .unwrap_or_default()
}

fn recursive_search(payload: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_url_fields(payload, &mut found);

    let mut urls: Vec<String> = Vec::new();
    for url in found {
        if has_image_extension(&url) && !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

fn collect_url_fields(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let is_url_key = URL_KEYS.contains(&key.to_lowercase().as_str());
                match child {
                    Value::String(s) if is_url_key => out.push(s.clone()),
                    Value::Object(_) | Value::Array(_) => collect_url_fields(child, out),
                    _ => {}
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_url_fields(item, out);
            }
        }
        _ => {}
    }
}

fn has_image_extension(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or("");
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn is_absolute_http_url(candidate: &str) -> bool {
    match Url::parse(candidate.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}
