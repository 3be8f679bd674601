//! Presence tracking and change fan-out shared by every connected form.

pub mod bus;
pub mod presence;
pub mod presence_store;
pub mod session;

pub use bus::{EventBus, MemoryEventBus, RealtimeEvent, RedisEventBus};
pub use presence::{editing_users, online_users, PresenceMeta, PresenceState};
pub use presence_store::{MemoryPresenceStore, PresenceStore, RedisPresenceStore};
pub use session::PresenceSession;
