//! Upstream incident fetcher
//!
//! One HTTP GET per attempt, bounded by a fixed timeout, retried under a
//! [`RetryPolicy`]. The provider answers either with a bare list of records
//! or with an object holding an `events` list.

use crate::retry::{retry_with_policy, RetryError, RetryPolicy};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("otw-ingest/", env!("CARGO_PKG_VERSION"));

/// Longest prefix of the raw body written to the debug log
const LOGGED_BODY_PREFIX: usize = 500;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Upstream returned HTTP {0}")]
    Status(u16),

    #[error("Response body is not valid JSON: {0}")]
    Decode(String),

    #[error("Unexpected payload shape: {0}")]
    UnexpectedFormat(String),
}

impl FetchError {
    /// Transport, status and decode failures are transient; a payload of the
    /// wrong shape will not fix itself on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::UnexpectedFormat(_))
    }
}

#[derive(Clone)]
pub struct IncidentFetcher {
    http_client: reqwest::Client,
    url: String,
    policy: RetryPolicy,
}

impl IncidentFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration, policy: RetryPolicy) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            url: url.into(),
            policy,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the current snapshot, retrying transient failures
    pub async fn fetch(&self) -> Result<Vec<Value>, RetryError<FetchError>> {
        retry_with_policy(&self.policy, "fetch_incidents", FetchError::is_retryable, |attempt| {
            debug!(attempt, url = %self.url, "Fetching incidents");
            self.fetch_once()
        })
        .await
    }

    /// Single attempt, no retry
    pub async fn fetch_once(&self) -> Result<Vec<Value>, FetchError> {
        let response = self.http_client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        debug!(
            raw = %truncate(&body, LOGGED_BODY_PREFIX),
            "Raw upstream response (truncated)"
        );

        let payload: Value =
            serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))?;
        let events = extract_events(payload)?;
        info!(count = events.len(), "Fetched incident snapshot");
        Ok(events)
    }
}

/// Pull the record list out of an upstream payload
pub fn extract_events(payload: Value) -> Result<Vec<Value>, FetchError> {
    match payload {
        Value::Array(events) => Ok(events),
        Value::Object(mut map) => match map.remove("events") {
            Some(Value::Array(events)) => Ok(events),
            Some(other) => Err(FetchError::UnexpectedFormat(format!(
                "'events' is {} rather than a list",
                json_type(&other)
            ))),
            None => {
                let keys: Vec<_> = map.keys().cloned().collect();
                Err(FetchError::UnexpectedFormat(format!(
                    "object without 'events' (keys: {})",
                    keys.join(", ")
                )))
            }
        },
        other => Err(FetchError::UnexpectedFormat(format!(
            "top-level {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
