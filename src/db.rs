use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::AppConfig;

impl AppConfig {
    pub async fn connect_database(&self) -> Result<PgPool, sqlx::Error> {
        let db = PgPoolOptions::new()
            .max_connections(self.db_max_connections)
            .acquire_timeout(self.db_acquire_timeout)
            .connect(&self.db_url)
            .await?;
        Ok(db)
    }
}

/// Applies the embedded migrations under `migrations/`.
pub async fn migrate(db: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!().run(db).await
}
