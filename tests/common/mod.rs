#![allow(dead_code)]

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response};
use axum::Router;
use config::{Config, File, FileFormat};
use deployform::models::form_data::MemoryFormStore;
use deployform::realtime::{MemoryEventBus, MemoryPresenceStore};
use deployform::web::state::AppState;
use deployform::AppConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub const ALICE_IP: &str = "172.21.25.25";
pub const BOB_IP: &str = "172.21.24.18";

/// `extra` is appended to the TOML, e.g. `[[shorteners]]` tables.
pub fn test_config(allowed_ips: &str, extra: &str) -> AppConfig {
    let toml = format!(
        r#"
        allowed_ips = "{allowed_ips}"
        client_ip_header = ""
        db_url = "postgres://localhost/deployform_test"
        db_max_connections = 1
        db_acquire_timeout = 1
        redis_url = "redis://localhost:6379"
        redis_max_connections = 1
        heartbeat_interval = 1

        [[users]]
        name = "alice"
        ip = "{ALICE_IP}"

        [[users]]
        name = "bob"
        ip = "{BOB_IP}"

        {extra}
        "#
    );
    Config::builder()
        .add_source(File::from_str(&toml, FileFormat::Toml))
        .build()
        .and_then(|cfg| cfg.try_deserialize::<AppConfig>())
        .and_then(AppConfig::validated)
        .expect("test config")
}

pub fn test_state(cfg: AppConfig) -> AppState {
    let presence_ttl = cfg.presence_ttl;
    AppState::new(
        cfg,
        Arc::new(MemoryFormStore::new()),
        Arc::new(MemoryPresenceStore::new(presence_ttl)),
        Arc::new(MemoryEventBus::default()),
    )
    .expect("templates load")
}

pub fn test_app(allowed_ips: &str) -> Router {
    deployform::web::app::router(test_state(test_config(allowed_ips, "")))
}

/// A request that looks like it arrived on a socket from `ip`.
pub fn request_from(ip: &str, builder: axum::http::request::Builder, body: Body) -> Request<Body> {
    let addr: SocketAddr = format!("{}:40000", ip)
        .parse()
        .or_else(|_| format!("[{}]:40000", ip).parse())
        .expect("valid ip");
    let mut request = builder.body(body).expect("valid request");
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).expect("json body")
}

/// Serves `router` on an ephemeral local port with peer addresses attached.
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("server");
    });
    addr
}

pub const WAIT: Duration = Duration::from_secs(5);
