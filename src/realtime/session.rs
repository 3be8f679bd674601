use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::bus::{EventBus, RealtimeEvent};
use super::presence::{generate_user_id, PresenceMeta, PresenceState};
use super::presence_store::PresenceStore;

/// One connection's view of a presence room.
///
/// Mirrors what a browser tab does on a presence channel: it joins with some
/// metadata, keeps that metadata current while the user moves between form
/// fields, and untracks itself on leave. Every change is followed by a
/// `PresenceChanged` event so the other connections resync.
pub struct PresenceSession {
    room: String,
    connection_id: String,
    store: Arc<dyn PresenceStore>,
    bus: Arc<dyn EventBus>,
    current_user: Option<PresenceMeta>,
    key: Option<String>,
}

impl PresenceSession {
    pub fn new(
        room: impl Into<String>,
        store: Arc<dyn PresenceStore>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            room: room.into(),
            connection_id: Uuid::new_v4().to_string(),
            store,
            bus,
            current_user: None,
            key: None,
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The metadata last tracked by this session, kept after `leave`.
    pub fn current_user(&self) -> Option<&PresenceMeta> {
        self.current_user.as_ref()
    }

    pub fn is_joined(&self) -> bool {
        self.key.is_some()
    }

    /// Tracks this connection in the room. The presence key is `user_data.id`
    /// when the client already has one (a reconnecting tab), otherwise a fresh
    /// anonymous id. Fields in `user_data` override the defaults.
    pub async fn join(&mut self, mut user_data: Map<String, Value>) -> Result<&PresenceMeta> {
        if self.is_joined() {
            self.leave().await?;
        }

        let user_id = match user_data.get("id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => generate_user_id(),
        };
        // the key always wins over whatever id the client sent
        user_data.insert("id".to_string(), Value::String(user_id.clone()));

        let meta = PresenceMeta::new(user_id.clone()).merged(user_data)?;

        self.store
            .track(&self.room, &user_id, &self.connection_id, &meta)
            .await?;
        info!(
            "Connection {} joined room {} as {}",
            self.connection_id, self.room, user_id
        );

        self.key = Some(user_id);
        self.notify().await?;

        Ok(&*self.current_user.insert(meta))
    }

    /// Shallow-merges `updates` into the tracked metadata. Does nothing
    /// before `join` or after `leave`.
    pub async fn update_presence(&mut self, updates: Map<String, Value>) -> Result<()> {
        let (Some(key), Some(current)) = (self.key.as_ref(), self.current_user.as_ref()) else {
            debug!("Ignoring presence update on connection {} (not joined)", self.connection_id);
            return Ok(());
        };

        let mut updates = updates;
        // the presence key and the advertised id must not diverge
        updates.remove("id");
        let updated = current.merged(updates)?;

        self.store
            .track(&self.room, key, &self.connection_id, &updated)
            .await?;
        self.current_user = Some(updated);
        self.notify().await
    }

    pub async fn set_editing(&mut self, field: &str) -> Result<()> {
        let updates = json_map(json!({
            "editing": field,
            "last_active": Utc::now(),
        }));
        self.update_presence(updates).await
    }

    /// Only clears when this session is editing exactly `field`, so a late
    /// blur event from one input can't wipe the focus of the next one.
    pub async fn clear_editing(&mut self, field: &str) -> Result<()> {
        let editing_this = self
            .current_user
            .as_ref()
            .and_then(|user| user.editing.as_deref())
            == Some(field);
        if !editing_this {
            return Ok(());
        }
        self.update_presence(json_map(json!({ "editing": null })))
            .await
    }

    /// Refreshes the liveness of the tracked presence without changing it.
    pub async fn heartbeat(&self) -> Result<()> {
        if let (Some(key), Some(current)) = (self.key.as_ref(), self.current_user.as_ref()) {
            self.store
                .track(&self.room, key, &self.connection_id, current)
                .await?;
        }
        Ok(())
    }

    /// Drops presences that stopped heartbeating and, when any went away,
    /// tells the room so every client resyncs.
    pub async fn prune_stale(&self) -> Result<usize> {
        if !self.is_joined() {
            return Ok(0);
        }
        let removed = self.store.prune(&self.room).await?;
        if removed > 0 {
            info!("Removed {} stale presences from room {}", removed, self.room);
            self.notify().await?;
        }
        Ok(removed)
    }

    pub async fn leave(&mut self) -> Result<()> {
        let Some(key) = self.key.take() else {
            return Ok(());
        };
        self.store
            .untrack(&self.room, &key, &self.connection_id)
            .await?;
        info!(
            "Connection {} left room {} ({})",
            self.connection_id, self.room, key
        );
        self.notify().await
    }

    pub async fn presence_state(&self) -> Result<PresenceState> {
        self.store.state(&self.room).await
    }

    async fn notify(&self) -> Result<()> {
        self.bus
            .publish(&RealtimeEvent::PresenceChanged {
                room: self.room.clone(),
            })
            .await
    }
}

fn json_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::bus::MemoryEventBus;
    use crate::realtime::presence::{editing_users, online_users};
    use crate::realtime::presence_store::MemoryPresenceStore;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn backends() -> (Arc<dyn PresenceStore>, Arc<MemoryEventBus>) {
        (
            Arc::new(MemoryPresenceStore::new(Duration::from_secs(30))),
            Arc::new(MemoryEventBus::default()),
        )
    }

    fn session(store: &Arc<dyn PresenceStore>, bus: &Arc<MemoryEventBus>) -> PresenceSession {
        PresenceSession::new("deploy", store.clone(), bus.clone())
    }

    #[tokio::test]
    async fn test_join_generates_id_and_tracks() {
        let (store, bus) = backends();
        let mut events = bus.subscribe().await.unwrap();
        let mut alice = session(&store, &bus);

        let mut data = Map::new();
        data.insert("name".to_string(), json!("alice"));
        let user = alice.join(data).await.unwrap().clone();

        assert!(user.id.starts_with("user_"));
        assert_eq!(user.editing, None);
        assert_eq!(user.extra.get("name"), Some(&json!("alice")));

        let state = alice.presence_state().await.unwrap();
        assert_eq!(state[&user.id].len(), 1);
        assert_eq!(
            events.next().await,
            Some(RealtimeEvent::PresenceChanged {
                room: "deploy".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_join_reuses_client_id() {
        let (store, bus) = backends();
        let mut alice = session(&store, &bus);
        let data = json_map(json!({ "id": "user_abc123xyz" }));
        assert_eq!(alice.join(data).await.unwrap().id, "user_abc123xyz");
    }

    #[tokio::test]
    async fn test_update_before_join_is_noop() {
        let (store, bus) = backends();
        let mut alice = session(&store, &bus);
        alice.set_editing("version").await.unwrap();
        assert!(alice.current_user().is_none());
        assert!(alice.presence_state().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_and_clear_editing() {
        let (store, bus) = backends();
        let mut alice = session(&store, &bus);
        alice.join(Map::new()).await.unwrap();

        alice.set_editing("version").await.unwrap();
        let user = alice.current_user().unwrap();
        assert_eq!(user.editing.as_deref(), Some("version"));
        assert!(user.last_active.is_some());

        // clearing another field leaves the current edit alone
        alice.clear_editing("notes").await.unwrap();
        assert_eq!(
            alice.current_user().unwrap().editing.as_deref(),
            Some("version")
        );

        alice.clear_editing("version").await.unwrap();
        assert_eq!(alice.current_user().unwrap().editing, None);

        let state = alice.presence_state().await.unwrap();
        assert_eq!(online_users(&state)[0].editing, None);
    }

    #[tokio::test]
    async fn test_other_sessions_see_editing_but_not_their_own() {
        let (store, bus) = backends();
        let mut alice = session(&store, &bus);
        let mut bob = session(&store, &bus);
        let alice_id = alice.join(Map::new()).await.unwrap().id.clone();
        let bob_id = bob.join(Map::new()).await.unwrap().id.clone();

        alice.set_editing("version").await.unwrap();
        bob.set_editing("version").await.unwrap();

        let state = bob.presence_state().await.unwrap();
        let seen_by_bob = editing_users(&state, Some(&bob_id));
        assert_eq!(seen_by_bob["version"].len(), 1);
        assert_eq!(seen_by_bob["version"][0].id, alice_id);

        let seen_by_alice = editing_users(&state, Some(&alice_id));
        assert_eq!(seen_by_alice["version"][0].id, bob_id);
    }

    #[tokio::test]
    async fn test_leave_untracks_and_stops_updates() {
        let (store, bus) = backends();
        let mut alice = session(&store, &bus);
        alice.join(Map::new()).await.unwrap();
        alice.leave().await.unwrap();

        assert!(!alice.is_joined());
        assert!(alice.presence_state().await.unwrap().is_empty());

        alice.set_editing("version").await.unwrap();
        assert!(alice.presence_state().await.unwrap().is_empty());
        // leaving twice is harmless
        alice.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_prune_stale_announces_dead_presences() {
        let store: Arc<dyn PresenceStore> =
            Arc::new(MemoryPresenceStore::new(Duration::from_millis(300)));
        let bus = Arc::new(MemoryEventBus::default());

        // a presence left behind by a connection that never heartbeats again
        store
            .track("deploy", "user_ghost", "dead-conn", &PresenceMeta::new("user_ghost"))
            .await
            .unwrap();

        let mut alice = session(&store, &bus);
        alice.join(Map::new()).await.unwrap();
        assert_eq!(alice.presence_state().await.unwrap().len(), 2);

        tokio::time::sleep(Duration::from_millis(400)).await;
        alice.heartbeat().await.unwrap();

        let mut events = bus.subscribe().await.unwrap();
        assert_eq!(alice.prune_stale().await.unwrap(), 1);
        assert_eq!(
            events.next().await,
            Some(RealtimeEvent::PresenceChanged {
                room: "deploy".to_string()
            })
        );

        let state = alice.presence_state().await.unwrap();
        assert_eq!(state.len(), 1);
        assert!(state.get("user_ghost").is_none());

        // nothing left to prune, nothing announced
        assert_eq!(alice.prune_stale().await.unwrap(), 0);
    }
}
