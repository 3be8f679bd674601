use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// What a connection advertises about itself on a presence channel.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PresenceMeta {
    pub id: String,
    pub joined_at: DateTime<Utc>,
    pub editing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<DateTime<Utc>>,
    /// Client supplied fields such as `name`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PresenceMeta {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            joined_at: Utc::now(),
            editing: None,
            last_active: None,
            extra: Map::new(),
        }
    }

    /// Shallow merge: every key in `updates` replaces the current one.
    pub fn merged(&self, updates: Map<String, Value>) -> Result<Self, serde_json::Error> {
        let mut current = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        current.extend(updates);
        serde_json::from_value(Value::Object(current))
    }
}

/// Presence key → every presence tracked under it, oldest first.
pub type PresenceState = BTreeMap<String, Vec<PresenceMeta>>;

/// Anonymous session id, e.g. `user_k3j9x0a1b`.
pub fn generate_user_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("user_{}", suffix)
}

/// One entry per key: the first presence tracked under it.
pub fn online_users(state: &PresenceState) -> Vec<PresenceMeta> {
    state
        .values()
        .filter_map(|presences| presences.first())
        .cloned()
        .collect()
}

/// Field name → users editing it, leaving out `current_user_id` so nobody
/// is told that they themselves are editing.
pub fn editing_users(
    state: &PresenceState,
    current_user_id: Option<&str>,
) -> BTreeMap<String, Vec<PresenceMeta>> {
    let mut editing: BTreeMap<String, Vec<PresenceMeta>> = BTreeMap::new();

    for user in state.values().filter_map(|presences| presences.first()) {
        let Some(field) = user.editing.as_deref() else {
            continue;
        };
        if user.id.is_empty() || Some(user.id.as_str()) == current_user_id {
            continue;
        }
        editing.entry(field.to_string()).or_default().push(user.clone());
    }

    editing
}
