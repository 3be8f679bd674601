use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::app_error::AppError;
use crate::models::form_data::FormRecord;
use crate::realtime::RealtimeEvent;
use crate::web::state::AppState;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct FormFieldResponse {
    pub key: String,
    pub value: Value,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<FormRecord> for FormFieldResponse {
    fn from(record: FormRecord) -> Self {
        Self {
            key: record.key,
            value: record.value,
            updated_at: Some(record.updated_at),
        }
    }
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct SaveFormFieldRequest {
    #[serde(default)]
    pub value: Value,
}

impl SaveFormFieldRequest {
    /// Parses the body as JSON regardless of the declared content type.
    pub fn from_body(body: &[u8]) -> Result<Self, AppError> {
        serde_json::from_slice(body)
            .map_err(|e| AppError::InvalidFormData(format!("body is not valid JSON: {}", e)))
    }
}

/// A key nobody has saved yet loads as `null` rather than 404.
pub async fn get_form_field(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<FormFieldResponse>, AppError> {
    let record = state
        .forms
        .load(&key)
        .await
        .map_err(|e| AppError::DatabaseError(format!("loading {}: {}", key, e)))?;

    Ok(Json(match record {
        Some(record) => record.into(),
        None => FormFieldResponse {
            key,
            value: Value::Null,
            updated_at: None,
        },
    }))
}

pub async fn save_form_field(
    Path(key): Path<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<FormFieldResponse>, AppError> {
    let request = SaveFormFieldRequest::from_body(&body)?;
    let record = state
        .forms
        .save(&key, &request.value)
        .await
        .map_err(|e| AppError::DatabaseError(format!("saving {}: {}", key, e)))?;
    info!("Saved form field {}", key);

    let event = RealtimeEvent::FormChanged {
        key: record.key.clone(),
        value: record.value.clone(),
        updated_at: record.updated_at,
    };
    // The write already happened; clients that miss this will see it on next load.
    if let Err(e) = state.bus.publish(&event).await {
        error!("Failed to publish change of form field {}: {}", key, e);
    }

    Ok(Json(record.into()))
}
