//! Session store with time-to-live expiry

use std::collections::HashMap;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use banking_mcp_core::{Error, Result, Session, SessionRequest, ValueMap};

use crate::gate::GatedStore;

/// Per-user session records
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    store: Option<GatedStore<Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(store: Option<GatedStore<Session>>, ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            ttl,
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(None, ttl)
    }

    pub async fn create_session(&self, request: SessionRequest) -> Result<Session> {
        let session = Session::new(request, self.ttl)?;

        info!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            channel = %session.channel,
            "Session created"
        );

        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session.clone());
        self.persist(&session).await;
        Ok(session)
    }

    /// Fetch a live session; expired sessions are evicted and reported missing
    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        let cached = self.sessions.read().await.get(session_id).cloned();
        if let Some(session) = cached {
            if session.is_expired(Utc::now()) {
                self.sessions.write().await.remove(session_id);
                debug!(session_id, "Session expired");
                return Err(Error::not_found("Session", session_id));
            }
            return Ok(session);
        }

        if let Some(store) = &self.store {
            if let Some(session) = store.find(session_id).await {
                let mut sessions = self.sessions.write().await;
                let cached = sessions
                    .entry(session.session_id.clone())
                    .or_insert(session);
                return Ok(cached.clone());
            }
        }

        Err(Error::not_found("Session", session_id))
    }

    /// Reuse `session_id` when it names a live session, otherwise open a new one
    pub async fn get_or_create(
        &self,
        session_id: Option<&str>,
        user_id: &str,
        channel: &str,
    ) -> Result<Session> {
        if let Some(session_id) = session_id.filter(|id| !id.trim().is_empty()) {
            match self.get_session(session_id).await {
                Ok(session) => return Ok(session),
                Err(err) if err.is_not_found() => {
                    debug!(session_id, "Requested session unavailable, opening a new one");
                }
                Err(err) => return Err(err),
            }
        }
        self.create_session(SessionRequest::new(user_id, channel))
            .await
    }

    /// Merge `patch` into the session context
    pub async fn update_context(&self, session_id: &str, patch: ValueMap) -> Result<Session> {
        self.modify(session_id, |session| session.merge_context(patch))
            .await
    }

    /// Append a task to the session history
    pub async fn add_task(&self, session_id: &str, task_id: &str) -> Result<Session> {
        self.modify(session_id, |session| session.record_task(task_id))
            .await
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn modify<F>(&self, session_id: &str, mutation: F) -> Result<Session>
    where
        F: FnOnce(&mut Session),
    {
        // make sure the record is in memory and still live
        self.get_session(session_id).await?;

        let updated = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| Error::not_found("Session", session_id))?;
            mutation(session);
            session.clone()
        };

        self.persist(&updated).await;
        Ok(updated)
    }

    async fn persist(&self, session: &Session) {
        if let Some(store) = &self.store {
            if !store.save(session).await {
                debug!(session_id = %session.session_id, "Session kept in memory only");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    include!("session_tests.rs");
}
