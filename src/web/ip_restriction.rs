use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Response};
use minijinja::{context, Environment};
use tracing::{debug, error, warn};

use super::client_ip::{peer_addr, restriction_ip};
use super::state::{AppState, FORBIDDEN_TEMPLATE};

pub const CONFIGURATION_ERROR: &str = "Server Configuration Error";

/// Lets a request through only when the caller's address is allow-listed.
pub async fn ip_restriction(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let allow_list = match &state.allow_list {
        Ok(allow_list) => allow_list,
        Err(e) => {
            error!("Refusing all requests, bad allow-list: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, CONFIGURATION_ERROR).into_response();
        }
    };

    let client_ip = restriction_ip(
        req.headers(),
        peer_addr(req.extensions()),
        state.config.client_ip_header.as_deref(),
    );

    if allow_list.contains_str(&client_ip) {
        debug!("Allowed {} {} from {}", req.method(), req.uri().path(), client_ip);
        return next.run(req).await;
    }

    warn!("Blocked {} {} from {}", req.method(), req.uri().path(), client_ip);
    forbidden(&state.env, &client_ip)
}

fn forbidden(env: &Environment<'static>, client_ip: &str) -> Response {
    let rendered = env
        .get_template(FORBIDDEN_TEMPLATE)
        .and_then(|template| template.render(context! { client_ip }));

    match rendered {
        Ok(html) => (StatusCode::FORBIDDEN, Html(html)).into_response(),
        Err(e) => {
            error!("Failed to render forbidden page: {}", e);
            StatusCode::FORBIDDEN.into_response()
        }
    }
}
