use axum::extract::State;
use axum::http::{Extensions, HeaderMap};
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::web::client_ip::{detect_client_ip, peer_addr, FORWARDED_IP_HEADERS};
use crate::web::state::AppState;

#[derive(Serialize)]
pub struct ClientIpResponse {
    pub ip: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub user: Option<String>,
    pub debug: BTreeMap<String, Option<String>>,
}

#[derive(Serialize)]
pub struct UsersResponse {
    pub users: Vec<String>,
}

pub async fn get_client_ip(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Json<ClientIpResponse> {
    let peer = peer_addr(&extensions);
    let ip = detect_client_ip(&headers, peer);

    let mut debug_info: BTreeMap<String, Option<String>> = FORWARDED_IP_HEADERS
        .iter()
        .map(|name| {
            let value = headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            (name.to_string(), value)
        })
        .collect();
    debug_info.insert(
        "peer".to_string(),
        peer.map(|addr| addr.ip().to_string()),
    );
    debug!("Client IP resolved to {} ({:?})", ip, debug_info);

    let user = state.users.find_user_by_ip(&ip).map(|u| u.name.clone());

    Json(ClientIpResponse {
        user_id: ip.clone(),
        ip,
        user,
        debug: debug_info,
    })
}

pub async fn list_users(State(state): State<AppState>) -> Json<UsersResponse> {
    Json(UsersResponse {
        users: state.users.names(),
    })
}
