//! Backends opened by the host on every coordinator start.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_bus::{BackendProvider, Backends};
use herald_core::error::EventError;
use herald_core::publisher::EventPublisher;
use herald_event_store::PgEventStore;
use herald_publisher::{BroadcastPublisher, RedisPublisher};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// Connects a Postgres pool and a transport each time the coordinator
/// starts. Without a Redis URL the transport is in-process only.
#[derive(Debug, Clone)]
pub struct HostBackends {
    database_url: String,
    redis_url: Option<String>,
    node_id: String,
    max_connections: u32,
}

impl HostBackends {
    /// Creates a provider for the given database and optional Redis URL.
    #[must_use]
    pub fn new(database_url: String, redis_url: Option<String>, node_id: String) -> Self {
        Self {
            database_url,
            redis_url,
            node_id,
            max_connections: 10,
        }
    }

    async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&self.database_url)
            .await
    }
}

#[async_trait]
impl BackendProvider for HostBackends {
    async fn acquire(&self) -> Result<Backends, EventError> {
        let pool = self
            .connect()
            .await
            .map_err(|e| EventError::Persistence(format!("could not connect to database: {e}")))?;
        let store = Arc::new(PgEventStore::new(pool));

        let publisher: Arc<dyn EventPublisher> = match &self.redis_url {
            Some(url) => {
                info!("using redis transport");
                Arc::new(RedisPublisher::new(url, self.node_id.clone())?)
            }
            None => {
                info!("REDIS_URL not set, using in-process transport");
                Arc::new(BroadcastPublisher::new(self.node_id.clone()))
            }
        };

        Ok(Backends { store, publisher })
    }
}

/// Applies the schema migrations once at startup.
///
/// # Errors
///
/// Returns `sqlx::Error` if the database is unreachable or a migration fails.
pub async fn run_migrations(database_url: &str) -> Result<(), sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(database_url)
        .await?;
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;
    pool.close().await;
    Ok(())
}
