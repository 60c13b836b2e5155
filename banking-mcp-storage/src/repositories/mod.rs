//! Durable record stores
//!
//! A [`Store`] persists one kind of [`Record`] keyed by its identifier. The
//! in-memory indexes in the services are authoritative; a store is a cache
//! behind them that survives restarts.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use banking_mcp_core::{Agent, Session, Task};

use crate::Result;

/// A persistable domain record
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Backing table name
    const TABLE: &'static str;
    /// Entity name used in errors and logs
    const ENTITY: &'static str;

    fn record_id(&self) -> &str;

    /// Monotonic per-record counter; the store never replaces a newer row with an older one
    fn revision(&self) -> u64;

    fn updated_at(&self) -> DateTime<Utc>;

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Keyed persistence for one record kind
#[async_trait]
pub trait Store<T: Record>: Send + Sync {
    /// Insert or replace, keeping whichever copy has the higher revision
    async fn save(&self, record: &T) -> Result<()>;

    /// Fetch by id; expired records are reported absent
    async fn find(&self, id: &str) -> Result<Option<T>>;

    /// Every stored id, expired or not
    async fn ids(&self) -> Result<Vec<String>>;
}

impl Record for Agent {
    const TABLE: &'static str = "agents";
    const ENTITY: &'static str = "Agent";

    fn record_id(&self) -> &str {
        &self.agent_id
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Record for Task {
    const TABLE: &'static str = "tasks";
    const ENTITY: &'static str = "Task";

    fn record_id(&self) -> &str {
        &self.task_id
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

impl Record for Session {
    const TABLE: &'static str = "sessions";
    const ENTITY: &'static str = "Session";

    fn record_id(&self) -> &str {
        &self.session_id
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        Some(self.expires_at)
    }
}
