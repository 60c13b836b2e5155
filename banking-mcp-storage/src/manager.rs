//! Storage manager owning the database pool and the shared availability gate

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

use banking_mcp_core::{Agent, Session, Task};

use crate::gate::{GatedStore, StoreGate};
use crate::repositories::{SqliteStore, Store};
use crate::{Error, Result};

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Half-open probe interval while the store is degraded
    pub retry_after: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:./banking_mcp.db?mode=rwc".to_string(),
            max_connections: 5,
            retry_after: Duration::from_secs(30),
        }
    }
}

/// Coordinates the SQLite pool, the per-record stores and their gate
#[derive(Clone)]
pub struct StorageManager {
    pool: Pool<Sqlite>,
    gate: Arc<StoreGate>,
    retry_after: Duration,
}

impl StorageManager {
    /// Connect to the database
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to database");

        let pool = pool_options(config)
            .connect_with(connect_options(config)?)
            .await?;

        info!("Database connection established");

        Ok(Self {
            pool,
            gate: Arc::new(StoreGate::new(config.retry_after)),
            retry_after: config.retry_after,
        })
    }

    /// A manager whose pool connects on first use and whose gate starts degraded.
    ///
    /// Nothing touches the database until [`recover`](Self::recover) or a
    /// half-open probe does.
    pub fn lazy(config: &DatabaseConfig) -> Result<Self> {
        let pool = pool_options(config).connect_lazy_with(connect_options(config)?);
        Ok(Self {
            pool,
            gate: Arc::new(StoreGate::degraded(config.retry_after)),
            retry_after: config.retry_after,
        })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Migration(e.to_string()))?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Retry the migrations every `retry_after` until they succeed, then
    /// re-arm the gate. Returns immediately when the gate is available.
    pub async fn recover(&self) {
        let mut attempts: u32 = 0;
        while !self.gate.is_available() {
            tokio::time::sleep(self.retry_after).await;
            attempts += 1;
            match self.migrate().await {
                Ok(()) => {
                    self.gate.succeeded("migrate");
                    info!(attempts, "Durable store recovered");
                }
                Err(err) => self.gate.failed("migrate", &err),
            }
        }
    }

    pub fn pool(&self) -> Pool<Sqlite> {
        self.pool.clone()
    }

    pub fn gate(&self) -> Arc<StoreGate> {
        self.gate.clone()
    }

    fn gated<T>(&self) -> GatedStore<T>
    where
        T: crate::repositories::Record,
    {
        let store: Arc<dyn Store<T>> = Arc::new(SqliteStore::<T>::new(self.pool.clone()));
        GatedStore::new(store, self.gate.clone())
    }

    pub fn agents(&self) -> GatedStore<Agent> {
        self.gated()
    }

    pub fn tasks(&self) -> GatedStore<Task> {
        self.gated()
    }

    pub fn sessions(&self) -> GatedStore<Session> {
        self.gated()
    }

    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }
}

fn connect_options(config: &DatabaseConfig) -> Result<SqliteConnectOptions> {
    Ok(SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5)))
}

fn pool_options(config: &DatabaseConfig) -> SqlitePoolOptions {
    SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(5))
}

/// Connect and migrate, or fall back to a degraded manager that keeps
/// retrying through [`StorageManager::recover`].
///
/// `None` only when the URL itself is unusable; the server then runs
/// memory-only.
pub async fn connect_or_degrade(config: &DatabaseConfig) -> Option<StorageManager> {
    let outcome = match StorageManager::new(config).await {
        Ok(manager) => match manager.migrate().await {
            Ok(()) => return Some(manager),
            Err(err) => {
                manager.close().await;
                err
            }
        },
        Err(err) => err,
    };

    warn!(
        error = %outcome,
        retry_after_secs = config.retry_after.as_secs_f64(),
        "Durable store unreachable, starting degraded"
    );
    match StorageManager::lazy(config) {
        Ok(manager) => Some(manager),
        Err(err) => {
            warn!(error = %err, "Invalid database configuration, running memory-only");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tempfile::NamedTempFile;

    /// A migrated manager over a fresh temporary database
    pub async fn temp_manager() -> (StorageManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", temp_file.path().display()),
            max_connections: 5,
            retry_after: Duration::from_millis(50),
        };
        let manager = StorageManager::new(&config)
            .await
            .expect("Failed to connect to test database");
        manager.migrate().await.expect("Failed to run migrations");
        (manager, temp_file)
    }
}
