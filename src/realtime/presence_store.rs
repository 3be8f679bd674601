use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::presence::{PresenceMeta, PresenceState};
use crate::redis::RedisPool;

const PRESENCE_PREFIX: &str = "deployform:presence:";

// ARGV holds field/value pairs as read. A field re-tracked since then no
// longer matches and is kept.
const PRUNE_SCRIPT: &str = r#"
    local removed = 0
    for i = 1, #ARGV, 2 do
        if redis.call('HGET', KEYS[1], ARGV[i]) == ARGV[i + 1] then
            redis.call('HDEL', KEYS[1], ARGV[i])
            removed = removed + 1
        end
    end
    return removed
"#;

/// Where presence lives between connections and server instances.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Insert or replace the presence of one connection. Also serves as heartbeat.
    async fn track(
        &self,
        room: &str,
        key: &str,
        connection_id: &str,
        meta: &PresenceMeta,
    ) -> Result<()>;

    async fn untrack(&self, room: &str, key: &str, connection_id: &str) -> Result<()>;

    /// Live presences of a room. Entries whose heartbeat is older than the
    /// store's TTL are left out.
    async fn state(&self, room: &str) -> Result<PresenceState>;

    /// Deletes stale entries of a room and returns how many went away.
    async fn prune(&self, room: &str) -> Result<usize>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrackedPresence {
    key: String,
    connection_id: String,
    meta: PresenceMeta,
    heartbeat_at: DateTime<Utc>,
}

impl TrackedPresence {
    fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now - self.heartbeat_at > ttl,
            Err(_) => false,
        }
    }
}

fn build_state(tracked: impl IntoIterator<Item = TrackedPresence>) -> PresenceState {
    let mut by_key: HashMap<String, Vec<TrackedPresence>> = HashMap::new();
    for presence in tracked {
        by_key.entry(presence.key.clone()).or_default().push(presence);
    }

    by_key
        .into_iter()
        .map(|(key, mut presences)| {
            presences.sort_by(|a, b| {
                a.meta
                    .joined_at
                    .cmp(&b.meta.joined_at)
                    .then_with(|| a.connection_id.cmp(&b.connection_id))
            });
            (key, presences.into_iter().map(|p| p.meta).collect())
        })
        .collect()
}

#[derive(Clone)]
pub struct RedisPresenceStore {
    pool: RedisPool,
    ttl: Duration,
}

impl RedisPresenceStore {
    pub fn new(pool: RedisPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    fn room_key(room: &str) -> String {
        format!("{}{}", PRESENCE_PREFIX, room)
    }

    // connection ids are uuids, so the last ':' separates them from the key
    fn field(key: &str, connection_id: &str) -> String {
        format!("{}:{}", key, connection_id)
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn track(
        &self,
        room: &str,
        key: &str,
        connection_id: &str,
        meta: &PresenceMeta,
    ) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let room_key = Self::room_key(room);

        let tracked = TrackedPresence {
            key: key.to_string(),
            connection_id: connection_id.to_string(),
            meta: meta.clone(),
            heartbeat_at: Utc::now(),
        };
        let serialized = serde_json::to_string(&tracked)?;

        conn.hset::<_, _, _, ()>(&room_key, Self::field(key, connection_id), serialized)
            .await?;
        // The whole room expires when nobody heartbeats any more.
        conn.expire::<_, ()>(&room_key, (self.ttl.as_secs() * 2).max(1) as i64)
            .await?;

        debug!("Tracked presence {} ({}) in room {}", key, connection_id, room);
        Ok(())
    }

    async fn untrack(&self, room: &str, key: &str, connection_id: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.hdel::<_, _, ()>(Self::room_key(room), Self::field(key, connection_id))
            .await?;
        debug!("Untracked presence {} ({}) in room {}", key, connection_id, room);
        Ok(())
    }

    async fn state(&self, room: &str) -> Result<PresenceState> {
        let mut conn = self.pool.get().await?;
        let entries: HashMap<String, String> = conn.hgetall(Self::room_key(room)).await?;

        let now = Utc::now();
        let live = entries
            .into_iter()
            .filter_map(|(field, raw)| match serde_json::from_str::<TrackedPresence>(&raw) {
                Ok(tracked) if tracked.is_stale(now, self.ttl) => None,
                Ok(tracked) => Some(tracked),
                Err(e) => {
                    warn!("Skipping unreadable presence {} in room {}: {}", field, room, e);
                    None
                }
            })
            .collect::<Vec<_>>();

        Ok(build_state(live))
    }

    async fn prune(&self, room: &str) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let room_key = Self::room_key(room);
        let entries: HashMap<String, String> = conn.hgetall(&room_key).await?;

        let now = Utc::now();
        let stale = entries
            .into_iter()
            .filter(|(_, raw)| match serde_json::from_str::<TrackedPresence>(raw) {
                Ok(tracked) => tracked.is_stale(now, self.ttl),
                Err(_) => true,
            })
            .collect::<Vec<_>>();
        if stale.is_empty() {
            return Ok(0);
        }

        let script = redis::Script::new(PRUNE_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation.key(&room_key);
        for (field, raw) in &stale {
            invocation.arg(field).arg(raw);
        }
        let removed: usize = invocation.invoke_async(&mut *conn).await?;

        if removed > 0 {
            debug!("Pruned {} stale presences in room {}", removed, room);
        }
        Ok(removed)
    }
}

pub struct MemoryPresenceStore {
    rooms: RwLock<HashMap<String, HashMap<String, TrackedPresence>>>,
    ttl: Duration,
}

impl MemoryPresenceStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            ttl,
        }
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn track(
        &self,
        room: &str,
        key: &str,
        connection_id: &str,
        meta: &PresenceMeta,
    ) -> Result<()> {
        let tracked = TrackedPresence {
            key: key.to_string(),
            connection_id: connection_id.to_string(),
            meta: meta.clone(),
            heartbeat_at: Utc::now(),
        };
        self.rooms
            .write()
            .await
            .entry(room.to_string())
            .or_default()
            .insert(connection_id.to_string(), tracked);
        Ok(())
    }

    async fn untrack(&self, room: &str, _key: &str, connection_id: &str) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        if let Some(presences) = rooms.get_mut(room) {
            presences.remove(connection_id);
            if presences.is_empty() {
                rooms.remove(room);
            }
        }
        Ok(())
    }

    async fn state(&self, room: &str) -> Result<PresenceState> {
        let now = Utc::now();
        let rooms = self.rooms.read().await;
        let live = rooms
            .get(room)
            .map(|presences| {
                presences
                    .values()
                    .filter(|p| !p.is_stale(now, self.ttl))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(build_state(live))
    }

    async fn prune(&self, room: &str) -> Result<usize> {
        let now = Utc::now();
        let mut rooms = self.rooms.write().await;
        let Some(presences) = rooms.get_mut(room) else {
            return Ok(0);
        };

        let before = presences.len();
        presences.retain(|_, p| !p.is_stale(now, self.ttl));
        let removed = before - presences.len();
        if presences.is_empty() {
            rooms.remove(room);
        }
        if removed > 0 {
            debug!("Pruned {} stale presences in room {}", removed, room);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_track_groups_connections_by_key() {
        let store = MemoryPresenceStore::new(Duration::from_secs(30));
        let first = PresenceMeta::new("user_a");
        let mut second = PresenceMeta::new("user_a");
        second.joined_at = first.joined_at + chrono::Duration::seconds(1);

        store.track("deploy", "user_a", "conn-2", &second).await.unwrap();
        store.track("deploy", "user_a", "conn-1", &first).await.unwrap();
        store
            .track("deploy", "user_b", "conn-3", &PresenceMeta::new("user_b"))
            .await
            .unwrap();

        let state = store.state("deploy").await.unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state["user_a"].len(), 2);
        assert_eq!(state["user_a"][0].joined_at, first.joined_at);
        assert!(store.state("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_track_again_replaces_meta() {
        let store = MemoryPresenceStore::new(Duration::from_secs(30));
        let mut meta = PresenceMeta::new("user_a");
        store.track("deploy", "user_a", "conn-1", &meta).await.unwrap();
        meta.editing = Some("version".to_string());
        store.track("deploy", "user_a", "conn-1", &meta).await.unwrap();

        let state = store.state("deploy").await.unwrap();
        assert_eq!(state["user_a"].len(), 1);
        assert_eq!(state["user_a"][0].editing.as_deref(), Some("version"));
    }

    #[tokio::test]
    async fn test_untrack_removes_presence() {
        let store = MemoryPresenceStore::new(Duration::from_secs(30));
        store
            .track("deploy", "user_a", "conn-1", &PresenceMeta::new("user_a"))
            .await
            .unwrap();
        store.untrack("deploy", "user_a", "conn-1").await.unwrap();
        assert!(store.state("deploy").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_presence_is_hidden() {
        let store = MemoryPresenceStore::new(Duration::ZERO);
        store
            .track("deploy", "user_a", "conn-1", &PresenceMeta::new("user_a"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.state("deploy").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_removes_only_stale_presences() {
        let store = MemoryPresenceStore::new(Duration::from_millis(200));
        store
            .track("deploy", "ghost", "conn-1", &PresenceMeta::new("ghost"))
            .await
            .unwrap();
        assert_eq!(store.prune("deploy").await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        store
            .track("deploy", "user_a", "conn-2", &PresenceMeta::new("user_a"))
            .await
            .unwrap();

        assert_eq!(store.prune("deploy").await.unwrap(), 1);
        assert_eq!(store.prune("deploy").await.unwrap(), 0);
        let state = store.state("deploy").await.unwrap();
        assert_eq!(state.keys().collect::<Vec<_>>(), vec!["user_a"]);
        assert_eq!(store.prune("empty").await.unwrap(), 0);
    }
}
