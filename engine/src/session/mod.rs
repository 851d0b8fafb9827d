//! Session Store
//!
//! Durable conversation identity. Every successful operation is written
//! through to SQLite before it returns, so the next `get` observes it.
//! Absent and inactive sessions are both reported as `NotFound`.

pub mod locks;

pub use crate::db::sessions::NewTurn;
pub use locks::{SessionGuard, SessionLocks};

use crate::db::{now_millis, Database, SessionRepository};
use sdk::errors::{EngineError, EntityKind, Result};
use sdk::session::{ChatTurn, ContextMap, RefinedContext, Session};
use std::time::Duration;
use tracing::{debug, info};

pub struct SessionStore {
    repo: SessionRepository,
}

impl SessionStore {
    pub fn new(db: &Database) -> Self {
        Self { repo: db.sessions() }
    }

    /// Allocate a new active session, optionally seeded with context
    pub async fn create(&self, initial_context: Option<ContextMap>) -> Result<Session> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let context = initial_context.unwrap_or_default();

        let session = self
            .repo
            .create(&session_id, &context, now_millis())
            .await?;

        info!(session_id = %session.session_id, keys = context.len(), "Session created");
        Ok(session)
    }

    /// Load an active session and bump its `last_accessed`
    pub async fn get(&self, session_id: &str) -> Result<Session> {
        self.repo
            .touch_and_load(session_id, now_millis())
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Session, session_id))
    }

    /// Shallow-merge `patch` into the session context
    pub async fn update_context(&self, session_id: &str, patch: &ContextMap) -> Result<()> {
        if self
            .repo
            .merge_context(session_id, patch, now_millis())
            .await?
        {
            debug!(session_id, keys = patch.len(), "Session context updated");
            Ok(())
        } else {
            Err(EngineError::not_found(EntityKind::Session, session_id))
        }
    }

    /// Merge a refinement patch and advance the context version
    pub async fn commit_refinement(
        &self,
        session_id: &str,
        intention_id: &str,
        patch: &ContextMap,
    ) -> Result<RefinedContext> {
        let (version, data) = self
            .repo
            .commit_refinement(session_id, patch, now_millis())
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Session, session_id))?;

        debug!(session_id, intention_id, version, "Context refined");

        Ok(RefinedContext {
            data,
            version,
            intention_id: intention_id.to_string(),
        })
    }

    /// End a session; idempotent
    ///
    /// Returns whether a live session was found and ended.
    pub async fn end(&self, session_id: &str) -> Result<bool> {
        let ended = self.repo.end(session_id).await?;
        if ended {
            info!(session_id, "Session ended");
        }
        Ok(ended)
    }

    pub async fn append_history(&self, session_id: &str, turn: &NewTurn) -> Result<ChatTurn> {
        let turn_id = uuid::Uuid::new_v4().to_string();

        self.repo
            .append_turn(session_id, &turn_id, turn, now_millis())
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Session, session_id))
    }

    /// Ordered chat history of an active session
    pub async fn history(&self, session_id: &str) -> Result<Vec<ChatTurn>> {
        Ok(self.get(session_id).await?.chat_history)
    }

    /// End every session idle for longer than `timeout` as of `now` (unix millis)
    pub async fn sweep_expired(&self, now: i64, timeout: Duration) -> Result<Vec<String>> {
        let timeout = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(timeout);
        let swept = self.repo.sweep_expired(cutoff).await?;

        if !swept.is_empty() {
            info!(count = swept.len(), "Expired sessions ended");
        }
        Ok(swept)
    }

    pub async fn active_sessions(&self) -> Result<Vec<String>> {
        self.repo.active_session_ids().await
    }
}
