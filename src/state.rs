use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::auth::session::SessionHub;
use crate::config::{AppConfig, StoreBackend};
use crate::store::{MemoryStore, PgStore, Store};

/// Applies the schema. RLS policies and triggers live here, so a failure is fatal.
pub async fn run_migrations(db: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run migrations")
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub sessions: SessionHub,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store = match config.backend {
            StoreBackend::Postgres => {
                let db = PgPoolOptions::new()
                    .max_connections(config.db_max_connections)
                    .connect(&config.database_url)
                    .await
                    .context("connect to database")?;

                run_migrations(&db).await?;
                Arc::new(PgStore::new(db)) as Arc<dyn Store>
            }
            StoreBackend::Memory => {
                tracing::warn!("using in-memory store; data is lost on exit");
                Arc::new(MemoryStore::new()) as Arc<dyn Store>
            }
        };

        Ok(Self::from_parts(store, config))
    }

    pub fn from_parts(store: Arc<dyn Store>, config: Arc<AppConfig>) -> Self {
        Self {
            store,
            config,
            sessions: SessionHub::new(),
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            backend: StoreBackend::Memory,
            database_url: String::new(),
            db_max_connections: 1,
            host: "127.0.0.1".into(),
            port: 0,
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
        });
        Self::from_parts(Arc::new(MemoryStore::new()), config)
    }
}
