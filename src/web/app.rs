use super::state::AppState;
use crate::web::handlers::client::{get_client_ip, list_users};
use crate::web::handlers::form::{get_form_field, save_form_field};
use crate::web::handlers::handler_404;
use crate::web::handlers::presence::presence_websocket_handler;
use crate::web::handlers::shorten::{shorten_default, shorten_with_provider};
use crate::web::ip_restriction::ip_restriction;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use tokio::signal;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub struct App {
    state: AppState,
}

/// Every route, static files included, sits behind the IP restriction.
pub fn router(state: AppState) -> Router {
    let static_router = Router::new().nest_service("/static", ServeDir::new(&state.config.static_dir));

    let api_router = Router::new()
        .route("/api/form/:key", get(get_form_field).put(save_form_field))
        .route("/api/shorten", post(shorten_default))
        .route("/api/shorten/:provider", post(shorten_with_provider))
        .route("/api/client-ip", get(get_client_ip))
        .route("/api/users", get(list_users))
        .route("/ws/presence/:room", get(presence_websocket_handler));

    Router::new()
        .merge(api_router)
        .merge(static_router)
        .fallback(handler_404)
        .layer(middleware::from_fn_with_state(state.clone(), ip_restriction))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl App {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn serve(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.state.config.bind_addr;
        let app = router(self.state);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("listening on {}", addr);

        // Peer addresses feed the IP restriction when no proxy header is set.
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down");
}
