use bb8_redis::{bb8::Pool, RedisConnectionManager};

use crate::AppConfig;

pub type RedisPool = Pool<RedisConnectionManager>;

impl AppConfig {
    /// Pooled connections for commands (presence hashes, PUBLISH).
    pub async fn connect_redis(&self) -> Result<RedisPool, redis::RedisError> {
        let manager = RedisConnectionManager::new(self.redis_url.clone())?;
        Pool::builder()
            .max_size(self.redis_max_connections)
            .build(manager)
            .await
    }

    /// Subscribers need a dedicated connection each, which a pool can't hand out.
    pub fn redis_client(&self) -> Result<redis::Client, redis::RedisError> {
        redis::Client::open(self.redis_url.as_str())
    }
}
