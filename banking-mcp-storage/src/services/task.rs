//! Task manager
//!
//! Owns every task record and its state machine. Each record lives in a
//! sharded concurrent map; an update holds that record's entry exclusively
//! while it validates and applies the mutation, so two writers on one task
//! never interleave. Persistence happens after the entry is released.

use chrono::{Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use banking_mcp_core::{Error, Result, Task, TaskRequest, TaskStatus, TaskUpdate};

use crate::gate::GatedStore;

/// Owner of task records
pub struct TaskManager {
    tasks: DashMap<String, Task>,
    store: Option<GatedStore<Task>>,
    retention: Option<Duration>,
}

impl TaskManager {
    pub fn new(store: Option<GatedStore<Task>>) -> Self {
        Self {
            tasks: DashMap::new(),
            store,
            retention: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Expire records `retention` after creation. Without it records are kept indefinitely.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Create a PENDING task
    pub async fn create_task(&self, request: TaskRequest) -> Result<Task> {
        let mut task = Task::new(request)?;
        if let Some(retention) = self.retention {
            task.expires_at = Some(task.created_at + retention);
        }

        info!(
            task_id = %task.task_id,
            user_id = %task.user_id,
            channel = %task.channel,
            intent = %task.intent,
            "Task created"
        );

        self.tasks.insert(task.task_id.clone(), task.clone());
        self.persist(&task).await;
        Ok(task)
    }

    /// Apply `update` to a task atomically and return the new snapshot
    pub async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<Task> {
        if !self.tasks.contains_key(task_id) {
            self.hydrate(task_id).await?;
        }

        let updated = {
            let mut task = self
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| Error::not_found("Task", task_id))?;
            if task.is_expired(Utc::now()) {
                return Err(Error::not_found("Task", task_id));
            }
            let previous = task.status;
            task.apply(update)?;
            if task.status != previous {
                debug!(task_id, from = %previous, to = %task.status, "Task transitioned");
            }
            task.clone()
        };

        self.persist(&updated).await;
        Ok(updated)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        if let Some(task) = self.tasks.get(task_id) {
            if task.is_expired(Utc::now()) {
                return Err(Error::not_found("Task", task_id));
            }
            return Ok(task.clone());
        }
        self.hydrate(task_id).await
    }

    /// Number of tasks currently in `status`
    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Pull a task from the durable store into memory
    async fn hydrate(&self, task_id: &str) -> Result<Task> {
        let found = match &self.store {
            Some(store) => store.find(task_id).await,
            None => None,
        };
        let Some(task) = found else {
            return Err(Error::not_found("Task", task_id));
        };

        // a concurrent writer may have inserted a newer copy meanwhile
        let cached = match self.tasks.entry(task_id.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => entry.insert(task).clone(),
        };
        Ok(cached)
    }

    async fn persist(&self, task: &Task) {
        if let Some(store) = &self.store {
            if !store.save(task).await {
                debug!(task_id = %task.task_id, "Task kept in memory only");
            }
        }
    }
}
