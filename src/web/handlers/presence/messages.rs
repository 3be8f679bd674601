use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::realtime::{editing_users, online_users, PresenceMeta, PresenceState};

/// What a browser sends over the presence socket.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        #[serde(default)]
        user: Map<String, Value>,
    },
    Update {
        updates: Map<String, Value>,
    },
    SetEditing {
        field: String,
    },
    ClearEditing {
        field: String,
    },
    Leave,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Joined {
        user: PresenceMeta,
    },
    PresenceSync {
        state: PresenceState,
        online_users: Vec<PresenceMeta>,
        editing_users: BTreeMap<String, Vec<PresenceMeta>>,
    },
    FormChanged {
        key: String,
        value: Value,
        updated_at: DateTime<Utc>,
    },
    Error {
        error: String,
    },
}

impl ServerMessage {
    /// Full presence picture as seen by `current_user_id`.
    pub fn presence_sync(state: PresenceState, current_user_id: Option<&str>) -> Self {
        let online = online_users(&state);
        let editing = editing_users(&state, current_user_id);
        ServerMessage::PresenceSync {
            state,
            online_users: online,
            editing_users: editing,
        }
    }

    pub fn error(error: impl ToString) -> Self {
        ServerMessage::Error {
            error: error.to_string(),
        }
    }
}
