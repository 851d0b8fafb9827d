/// Session persistence operations
///
/// Sessions, their typed context variables and the append-only chat turn
/// log. Every mutating query is guarded by `is_active = 1`, so an ended
/// session rejects mutation at the storage layer. `last_accessed` is only
/// ever raised through `MAX(last_accessed, ?)`.
use super::{from_json_column, to_json_column, DbResultExt};
use sdk::errors::{EngineError, Result};
use sdk::session::{ChatTurn, ContextMap, ContextValue, Session};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

/// A turn to append; sequence and id are assigned by the store
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub user_input: String,
    pub assistant_output: String,
    pub user_at: i64,
    pub assistant_at: i64,
    pub intention_id: String,
    pub plan_ids: Vec<String>,
    pub request_id: String,
    pub context_version: u64,
}

/// Session repository for database operations
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new active session with its initial context
    pub async fn create(
        &self,
        session_id: &str,
        initial_context: &ContextMap,
        now: i64,
    ) -> Result<Session> {
        let mut tx = self
            .pool
            .begin()
            .await
            .db_context("Failed to begin transaction")?;

        sqlx::query(
            "INSERT INTO sessions (session_id, created_at, last_accessed, is_active, context_version)
             VALUES (?, ?, ?, 1, 0)",
        )
        .bind(session_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .db_context("Failed to create session")?;

        upsert_variables(&mut tx, session_id, initial_context, now).await?;

        tx.commit().await.db_context("Failed to commit session")?;

        Ok(Session {
            session_id: session_id.to_string(),
            created_at: now,
            last_accessed: now,
            is_active: true,
            context: initial_context.clone(),
            context_version: 0,
            chat_history: Vec::new(),
        })
    }

    /// Bump `last_accessed` on an active session and load it
    ///
    /// Returns `None` when the session is absent or inactive.
    pub async fn touch_and_load(&self, session_id: &str, now: i64) -> Result<Option<Session>> {
        let row = sqlx::query(
            "UPDATE sessions SET last_accessed = MAX(last_accessed, ?)
             WHERE session_id = ? AND is_active = 1
             RETURNING created_at, last_accessed, context_version",
        )
        .bind(now)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .db_context("Failed to touch session")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let context = self.load_context(session_id).await?;
        let chat_history = self.history(session_id).await?;

        Ok(Some(Session {
            session_id: session_id.to_string(),
            created_at: row.get("created_at"),
            last_accessed: row.get("last_accessed"),
            is_active: true,
            context,
            context_version: row.get::<i64, _>("context_version") as u64,
            chat_history,
        }))
    }

    /// Shallow-merge `patch` into an active session's context
    ///
    /// Returns false when the session is absent or inactive.
    pub async fn merge_context(&self, session_id: &str, patch: &ContextMap, now: i64) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .db_context("Failed to begin transaction")?;

        if !touch_active(&mut tx, session_id, now).await? {
            return Ok(false);
        }

        upsert_variables(&mut tx, session_id, patch, now).await?;

        tx.commit()
            .await
            .db_context("Failed to commit context update")?;

        Ok(true)
    }

    /// Merge `patch` and increment the context version in one transaction
    ///
    /// Returns the new version and the full merged context, or `None` when
    /// the session is absent or inactive.
    pub async fn commit_refinement(
        &self,
        session_id: &str,
        patch: &ContextMap,
        now: i64,
    ) -> Result<Option<(u64, ContextMap)>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .db_context("Failed to begin transaction")?;

        let version: Option<i64> = sqlx::query_scalar(
            "UPDATE sessions
             SET context_version = context_version + 1,
                 last_accessed = MAX(last_accessed, ?)
             WHERE session_id = ? AND is_active = 1
             RETURNING context_version",
        )
        .bind(now)
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await
        .db_context("Failed to increment context version")?;

        let Some(version) = version else {
            return Ok(None);
        };

        upsert_variables(&mut tx, session_id, patch, now).await?;

        let rows = sqlx::query(VARIABLES_QUERY)
            .bind(session_id)
            .fetch_all(&mut *tx)
            .await
            .db_context("Failed to load session context")?;
        let context = decode_variables(&rows)?;

        tx.commit()
            .await
            .db_context("Failed to commit refinement")?;

        Ok(Some((version as u64, context)))
    }

    /// Mark a session inactive; returns whether a live session was ended
    pub async fn end(&self, session_id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE sessions SET is_active = 0 WHERE session_id = ? AND is_active = 1")
                .bind(session_id)
                .execute(&self.pool)
                .await
                .db_context("Failed to end session")?;

        Ok(result.rows_affected() > 0)
    }

    /// End every active session last accessed before `cutoff`
    ///
    /// Returns the ids of the sessions that were ended.
    pub async fn sweep_expired(&self, cutoff: i64) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "UPDATE sessions SET is_active = 0
             WHERE is_active = 1 AND last_accessed < ?
             RETURNING session_id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .db_context("Failed to sweep expired sessions")?;

        Ok(ids)
    }

    /// Ids of all active sessions, most recently used first
    pub async fn active_session_ids(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT session_id FROM sessions WHERE is_active = 1
             ORDER BY last_accessed DESC, session_id",
        )
        .fetch_all(&self.pool)
        .await
        .db_context("Failed to list sessions")
    }

    /// Append a turn to an active session's history
    ///
    /// Returns `None` when the session is absent or inactive.
    pub async fn append_turn(
        &self,
        session_id: &str,
        turn_id: &str,
        turn: &NewTurn,
        now: i64,
    ) -> Result<Option<ChatTurn>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .db_context("Failed to begin transaction")?;

        if !touch_active(&mut tx, session_id, now).await? {
            return Ok(None);
        }

        let sequence: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM chat_turns WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&mut *tx)
                .await
                .db_context("Failed to compute turn sequence")?;

        let plan_ids = to_json_column(&turn.plan_ids, "plan_ids")?;

        sqlx::query(
            "INSERT INTO chat_turns (turn_id, session_id, seq, user_input, assistant_output,
                                     user_at, assistant_at, intention_id, plan_ids, request_id,
                                     context_version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(turn_id)
        .bind(session_id)
        .bind(sequence)
        .bind(&turn.user_input)
        .bind(&turn.assistant_output)
        .bind(turn.user_at)
        .bind(turn.assistant_at)
        .bind(&turn.intention_id)
        .bind(&plan_ids)
        .bind(&turn.request_id)
        .bind(turn.context_version as i64)
        .execute(&mut *tx)
        .await
        .db_context("Failed to append chat turn")?;

        tx.commit().await.db_context("Failed to commit chat turn")?;

        Ok(Some(ChatTurn {
            turn_id: turn_id.to_string(),
            sequence,
            user_input: turn.user_input.clone(),
            assistant_output: turn.assistant_output.clone(),
            user_at: turn.user_at,
            assistant_at: turn.assistant_at,
            intention_id: turn.intention_id.clone(),
            plan_ids: turn.plan_ids.clone(),
            request_id: turn.request_id.clone(),
            context_version: turn.context_version,
        }))
    }

    /// Ordered chat history of a session, regardless of its state
    pub async fn history(&self, session_id: &str) -> Result<Vec<ChatTurn>> {
        let rows = sqlx::query(
            "SELECT turn_id, seq, user_input, assistant_output, user_at, assistant_at,
                    intention_id, plan_ids, request_id, context_version
             FROM chat_turns WHERE session_id = ? ORDER BY seq ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .db_context("Failed to load chat history")?;

        rows.iter().map(decode_turn).collect()
    }

    async fn load_context(&self, session_id: &str) -> Result<ContextMap> {
        let rows = sqlx::query(VARIABLES_QUERY)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .db_context("Failed to load session context")?;

        decode_variables(&rows)
    }
}

const VARIABLES_QUERY: &str = "SELECT key, value_type, string_value, number_value, boolean_value, json_value
     FROM session_variables WHERE session_id = ?";

async fn touch_active(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: &str,
    now: i64,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE sessions SET last_accessed = MAX(last_accessed, ?)
         WHERE session_id = ? AND is_active = 1",
    )
    .bind(now)
    .bind(session_id)
    .execute(&mut **tx)
    .await
    .db_context("Failed to touch session")?;

    Ok(result.rows_affected() > 0)
}

async fn upsert_variables(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: &str,
    variables: &ContextMap,
    now: i64,
) -> Result<()> {
    for (key, value) in variables {
        let (string_value, number_value, boolean_value, json_value) = match value {
            ContextValue::String(s) => (Some(s.clone()), None, None, None),
            ContextValue::Number(n) => (None, Some(*n), None, None),
            ContextValue::Boolean(b) => (None, None, Some(*b), None),
            ContextValue::Json(v) => (None, None, None, Some(to_json_column(v, key)?)),
        };

        sqlx::query(
            "INSERT INTO session_variables (session_id, key, value_type, string_value, number_value,
                                            boolean_value, json_value, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id, key) DO UPDATE SET
                value_type = excluded.value_type,
                string_value = excluded.string_value,
                number_value = excluded.number_value,
                boolean_value = excluded.boolean_value,
                json_value = excluded.json_value,
                updated_at = excluded.updated_at",
        )
        .bind(session_id)
        .bind(key)
        .bind(value.value_type())
        .bind(string_value)
        .bind(number_value)
        .bind(boolean_value)
        .bind(json_value)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await
        .db_context("Failed to write session variable")?;
    }

    Ok(())
}

fn decode_variables(rows: &[SqliteRow]) -> Result<ContextMap> {
    let mut context = ContextMap::new();

    for row in rows {
        let key: String = row.get("key");
        let value_type: String = row.get("value_type");

        let value = match value_type.as_str() {
            "string" => ContextValue::String(
                row.get::<Option<String>, _>("string_value")
                    .unwrap_or_default(),
            ),
            "number" => ContextValue::Number(
                row.get::<Option<f64>, _>("number_value")
                    .unwrap_or_default(),
            ),
            "boolean" => ContextValue::Boolean(
                row.get::<Option<bool>, _>("boolean_value")
                    .unwrap_or_default(),
            ),
            "json" => {
                let raw: Option<String> = row.get("json_value");
                ContextValue::Json(from_json_column(raw.as_deref().unwrap_or("null"), &key)?)
            }
            other => {
                return Err(EngineError::Database(format!(
                    "Unknown value type '{}' for context key '{}'",
                    other, key
                )))
            }
        };

        context.insert(key, value);
    }

    Ok(context)
}

fn decode_turn(row: &SqliteRow) -> Result<ChatTurn> {
    let plan_ids: String = row.get("plan_ids");

    Ok(ChatTurn {
        turn_id: row.get("turn_id"),
        sequence: row.get("seq"),
        user_input: row.get("user_input"),
        assistant_output: row.get("assistant_output"),
        user_at: row.get("user_at"),
        assistant_at: row.get("assistant_at"),
        intention_id: row.get("intention_id"),
        plan_ids: from_json_column(&plan_ids, "plan_ids")?,
        request_id: row.get("request_id"),
        context_version: row.get::<i64, _>("context_version") as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    fn turn(input: &str, version: u64) -> NewTurn {
        NewTurn {
            user_input: input.to_string(),
            assistant_output: "ok".to_string(),
            user_at: 10,
            assistant_at: 11,
            intention_id: "i-1".to_string(),
            plan_ids: vec!["p-1".to_string()],
            request_id: "r-1".to_string(),
            context_version: version,
        }
    }

    #[tokio::test]
    async fn test_typed_variables_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.sessions();

        let mut context = ContextMap::new();
        context.insert("database_name".into(), "sales".into());
        context.insert("limit".into(), ContextValue::Number(5.0));
        context.insert("verbose".into(), ContextValue::Boolean(true));
        context.insert("tables".into(), ContextValue::Json(json!(["orders"])));

        repo.create("s-1", &context, 100).await.unwrap();
        let session = repo.touch_and_load("s-1", 200).await.unwrap().unwrap();

        assert_eq!(session.context, context);
        assert_eq!(session.last_accessed, 200);
        assert_eq!(session.created_at, 100);
    }

    #[tokio::test]
    async fn test_last_accessed_never_decreases() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.sessions();

        repo.create("s-1", &ContextMap::new(), 500).await.unwrap();
        let session = repo.touch_and_load("s-1", 100).await.unwrap().unwrap();
        assert_eq!(session.last_accessed, 500);
    }

    #[tokio::test]
    async fn test_ended_session_rejects_mutation() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.sessions();

        repo.create("s-1", &ContextMap::new(), 1).await.unwrap();
        assert!(repo.end("s-1").await.unwrap());
        assert!(!repo.end("s-1").await.unwrap());

        assert!(repo.touch_and_load("s-1", 2).await.unwrap().is_none());
        assert!(!repo.merge_context("s-1", &ContextMap::new(), 2).await.unwrap());
        assert!(repo
            .commit_refinement("s-1", &ContextMap::new(), 2)
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .append_turn("s-1", "t-1", &turn("hi", 0), 2)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_refinement_increments_version_and_keeps_keys() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.sessions();

        let mut initial = ContextMap::new();
        initial.insert("a".into(), "kept".into());
        repo.create("s-1", &initial, 1).await.unwrap();

        let mut patch = ContextMap::new();
        patch.insert("b".into(), "new".into());

        let (v1, ctx1) = repo.commit_refinement("s-1", &patch, 2).await.unwrap().unwrap();
        let (v2, ctx2) = repo.commit_refinement("s-1", &patch, 3).await.unwrap().unwrap();

        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
        assert_eq!(ctx1.get("a"), Some(&ContextValue::from("kept")));
        assert_eq!(ctx2.get("a"), Some(&ContextValue::from("kept")));
        assert_eq!(ctx2.get("b"), Some(&ContextValue::from("new")));
    }

    #[tokio::test]
    async fn test_turn_sequence_is_per_session() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.sessions();

        repo.create("s-1", &ContextMap::new(), 1).await.unwrap();
        repo.create("s-2", &ContextMap::new(), 1).await.unwrap();

        repo.append_turn("s-1", "t-1", &turn("one", 1), 2).await.unwrap();
        repo.append_turn("s-2", "t-2", &turn("other", 1), 2).await.unwrap();
        let second = repo
            .append_turn("s-1", "t-3", &turn("two", 2), 3)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(second.sequence, 2);

        let history = repo.history("s-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].user_input, "one");
        assert_eq!(history[1].plan_ids, vec!["p-1".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.sessions();

        repo.create("old", &ContextMap::new(), 100).await.unwrap();
        repo.create("fresh", &ContextMap::new(), 1_000).await.unwrap();

        let swept = repo.sweep_expired(500).await.unwrap();
        assert_eq!(swept, vec!["old".to_string()]);
        assert_eq!(repo.active_session_ids().await.unwrap(), vec!["fresh".to_string()]);
    }
}
