//! Outbound calls to intent handlers.
//!
//! The wire contract: POST `{metadata, spec, status, input}` to the
//! signature's procedure callback; the response body may carry
//! `{"delay_secs": <number>}`. Health checks are a GET on
//! `{base_callback}/healthcheck` where any 2xx means healthy.

use std::time::Duration;

use async_trait::async_trait;
use intentful_core::{DiffField, Metadata, Spec, Status};
use serde::{Deserialize, Serialize};

use crate::error::HandlerError;

/// Body sent to a procedure callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerRequest {
    pub metadata: Metadata,
    pub spec: Spec,
    pub status: Status,
    pub input: Vec<DiffField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerResponse {
    #[serde(default)]
    pub delay_secs: Option<f64>,
}

/// Something that can resolve diffs on behalf of the engine.
#[async_trait]
pub trait IntentHandler: Send + Sync + 'static {
    /// Invoke the procedure at `url`. Returns the handler's explicit retry
    /// delay in seconds, if it named one.
    async fn invoke(&self, url: &str, request: &HandlerRequest)
        -> Result<Option<f64>, HandlerError>;

    async fn healthy(&self, url: &str) -> bool;
}

/// Handler reached over HTTP.
///
/// Uses `ureq` (sync) wrapped in `tokio::task::spawn_blocking`.
#[derive(Debug, Clone)]
pub struct HttpIntentHandler {
    timeout: Duration,
}

impl HttpIntentHandler {
    pub fn new(timeout: Duration) -> Self {
        HttpIntentHandler { timeout }
    }

    fn agent(&self) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build()
            .into()
    }
}

fn classify(url: &str, err: ureq::Error) -> HandlerError {
    match err {
        ureq::Error::StatusCode(status) => HandlerError::Status {
            url: url.to_string(),
            status,
        },
        other => HandlerError::Unreachable {
            url: url.to_string(),
            message: other.to_string(),
        },
    }
}

/// Parse a response body. Empty or `null` bodies mean "no explicit delay".
pub fn parse_delay(url: &str, body: &str) -> Result<Option<f64>, HandlerError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: serde_json::Value =
        serde_json::from_str(trimmed).map_err(|e| HandlerError::MalformedResponse {
            url: url.to_string(),
            message: e.to_string(),
        })?;
    if value.is_null() {
        return Ok(None);
    }
    let response: HandlerResponse =
        serde_json::from_value(value).map_err(|e| HandlerError::MalformedResponse {
            url: url.to_string(),
            message: e.to_string(),
        })?;
    Ok(response.delay_secs.filter(|d| d.is_finite()))
}

#[async_trait]
impl IntentHandler for HttpIntentHandler {
    async fn invoke(
        &self,
        url: &str,
        request: &HandlerRequest,
    ) -> Result<Option<f64>, HandlerError> {
        let agent = self.agent();
        let url = url.to_string();
        let body = serde_json::to_value(request).map_err(|e| HandlerError::MalformedResponse {
            url: url.clone(),
            message: format!("could not encode request: {}", e),
        })?;

        tokio::task::spawn_blocking(move || {
            let response = agent
                .post(&url)
                .send_json(&body)
                .map_err(|e| classify(&url, e))?;
            let text = response
                .into_body()
                .read_to_string()
                .map_err(|e| HandlerError::MalformedResponse {
                    url: url.clone(),
                    message: e.to_string(),
                })?;
            parse_delay(&url, &text)
        })
        .await
        .map_err(|e| HandlerError::Join(e.to_string()))?
    }

    async fn healthy(&self, url: &str) -> bool {
        let agent = self.agent();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || agent.get(&url).call().is_ok())
            .await
            .unwrap_or(false)
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
