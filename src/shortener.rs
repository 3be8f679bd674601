use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ShortenerConfig;

pub const DEFAULT_FAILURE_MESSAGE: &str = "API request failed";

#[derive(Debug, Error)]
pub enum ShortenError {
    /// The provider answered with a non-success status.
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid response from shortener: {0}")]
    InvalidResponse(#[from] serde_json::Error),
    #[error("shortener response has no {0:?} field")]
    MissingResult(String),
}

/// Asks `provider` for a short form of `long_url` and returns its result
/// field exactly as the provider sent it.
pub async fn shorten(
    client: &reqwest::Client,
    provider: &ShortenerConfig,
    long_url: &str,
    timeout: Duration,
) -> Result<Value, ShortenError> {
    let mut request_body = Map::new();
    request_body.insert(
        provider.request_field.clone(),
        Value::String(long_url.to_string()),
    );

    let response = client
        .post(&provider.endpoint)
        .timeout(timeout)
        .json(&request_body)
        .send()
        .await?;
    let status = response.status();
    let bytes = response.bytes().await?;

    if !status.is_success() {
        let message = serde_json::from_slice::<Value>(&bytes)
            .ok()
            .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
        warn!(
            "Shortener {} answered {}: {}",
            provider.name, status, message
        );
        return Err(ShortenError::Rejected(message));
    }

    let mut body: Value = serde_json::from_slice(&bytes)?;
    let result = body
        .get_mut(&provider.result_field)
        .map(Value::take)
        .ok_or_else(|| ShortenError::MissingResult(provider.result_field.clone()))?;

    debug!("Shortener {} returned {}", provider.name, result);
    Ok(result)
}
