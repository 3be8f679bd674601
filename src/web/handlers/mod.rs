use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub mod client;
pub mod form;
pub mod presence;
pub mod shorten;

pub async fn handler_404(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{} not found", uri.path()) })),
    )
        .into_response()
}
