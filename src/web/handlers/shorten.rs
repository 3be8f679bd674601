use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use url::form_urlencoded;

use crate::app_error::AppError;
use crate::config::ShortenerConfig;
use crate::shortener;
use crate::web::state::AppState;

#[derive(Debug, Default, PartialEq)]
pub struct ShortenForm {
    pub url: Option<String>,
}

impl ShortenForm {
    /// Reads the urlencoded body whatever content type the client declared.
    pub fn from_body(body: &[u8]) -> Self {
        let url = form_urlencoded::parse(body)
            .find(|(name, _)| name == "url")
            .map(|(_, value)| value.into_owned());
        Self { url }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ShortenResponse {
    pub result_url: Value,
}

pub async fn shorten_default(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ShortenResponse>, AppError> {
    let provider = state
        .config
        .default_shortener()
        .cloned()
        .ok_or_else(|| AppError::NotFound("Default shortener".to_string()))?;
    proxy(&state, &provider, ShortenForm::from_body(&body)).await
}

pub async fn shorten_with_provider(
    Path(provider): Path<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ShortenResponse>, AppError> {
    let provider = state
        .config
        .find_shortener(&provider)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("Shortener {}", provider)))?;
    proxy(&state, &provider, ShortenForm::from_body(&body)).await
}

async fn proxy(
    state: &AppState,
    provider: &ShortenerConfig,
    form: ShortenForm,
) -> Result<Json<ShortenResponse>, AppError> {
    let long_url = form
        .url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| AppError::InvalidFormData("url is required".to_string()))?;

    let result_url = shortener::shorten(
        &state.http_client,
        provider,
        &long_url,
        state.config.shortener_timeout,
    )
    .await
    .map_err(|e| AppError::Upstream(e.to_string()))?;

    info!("Shortened {} with {}", long_url, provider.name);
    Ok(Json(ShortenResponse { result_url }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_body_parsing() {
        let form = ShortenForm::from_body(b"note=hi&url=https%3A%2F%2Fexample.com%2Fa%20b");
        assert_eq!(form.url.as_deref(), Some("https://example.com/a b"));

        let form = ShortenForm::from_body(b"url=example.com%2Fpage&url=second");
        assert_eq!(form.url.as_deref(), Some("example.com/page"));

        assert_eq!(ShortenForm::from_body(b""), ShortenForm::default());
        assert_eq!(ShortenForm::from_body(b"{\"url\":1}").url, None);
    }
}
