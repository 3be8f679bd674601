use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// One shared field of the deployment form.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct FormRecord {
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait FormStore: Send + Sync {
    /// `Ok(None)` when nothing was ever saved under `key`.
    async fn load(&self, key: &str) -> Result<Option<FormRecord>>;

    /// Insert or overwrite `key`, stamping `updated_at` with the current time.
    async fn save(&self, key: &str, value: &Value) -> Result<FormRecord>;
}

pub struct PgFormStore {
    db: PgPool,
}

impl PgFormStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FormStore for PgFormStore {
    async fn load(&self, key: &str) -> Result<Option<FormRecord>> {
        let record = sqlx::query_as::<_, FormRecord>(
            r#"
            SELECT key, value, updated_at
            FROM deployment_form_data
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?;
        Ok(record)
    }

    async fn save(&self, key: &str, value: &Value) -> Result<FormRecord> {
        let record = sqlx::query_as::<_, FormRecord>(
            r#"
            INSERT INTO deployment_form_data (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
            RETURNING key, value, updated_at
            "#,
        )
        .bind(key)
        .bind(sqlx::types::Json(value))
        .fetch_one(&self.db)
        .await?;
        debug!("Saved form field {}", key);
        Ok(record)
    }
}

/// Process-local store, used by tests and single-node development setups.
#[derive(Default)]
pub struct MemoryFormStore {
    records: RwLock<HashMap<String, FormRecord>>,
}

impl MemoryFormStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FormStore for MemoryFormStore {
    async fn load(&self, key: &str) -> Result<Option<FormRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &Value) -> Result<FormRecord> {
        let record = FormRecord {
            key: key.to_string(),
            value: value.clone(),
            updated_at: Utc::now(),
        };
        self.records
            .write()
            .await
            .insert(key.to_string(), record.clone());
        Ok(record)
    }
}
