/// Intention persistence operations
///
/// Intentions are written once when analysed and afterwards only change
/// status. Relationship edges live in the analyzer's arena; only the parent
/// id is persisted so lineage survives restarts.
use super::{from_json_column, parse_column, to_json_column, DbResultExt};
use sdk::errors::Result;
use sdk::intention::{
    Intention, IntentionKind, IntentionSource, IntentionStatus, Relationships, SourceKind,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Intention repository for database operations
pub struct IntentionRepository {
    pool: SqlitePool,
}

impl IntentionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a freshly analysed intention
    pub async fn insert(&self, intention: &Intention) -> Result<()> {
        let analysis = to_json_column(&intention.analysis, "analysis")?;
        let source_kind = match intention.source.kind {
            SourceKind::Prompt => "prompt",
            SourceKind::Message => "message",
            SourceKind::Derived => "derived",
        };

        sqlx::query(
            "INSERT INTO intentions (id, session_id, kind, source_kind, content, primary_intent,
                                     analysis, status, parent_intention_id, version, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&intention.id)
        .bind(intention.source.session_id.as_deref())
        .bind(intention.kind.as_str())
        .bind(source_kind)
        .bind(&intention.source.content)
        .bind(intention.analysis.primary_intent.as_str())
        .bind(&analysis)
        .bind(intention.status.as_str())
        .bind(intention.relationships.parent_intention_id.as_deref())
        .bind(intention.version as i64)
        .bind(intention.created_at)
        .execute(&self.pool)
        .await
        .db_context("Failed to persist intention")?;

        Ok(())
    }

    pub async fn update_status(&self, id: &str, status: IntentionStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE intentions SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .db_context("Failed to update intention status")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Intention>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_INTENTION))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .db_context("Failed to fetch intention")?;

        row.as_ref().map(decode_intention).transpose()
    }

    /// Ids of intentions derived from `parent_id`, oldest first
    pub async fn child_ids(&self, parent_id: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT id FROM intentions WHERE parent_intention_id = ? ORDER BY created_at, id",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .db_context("Failed to list derived intentions")
    }

    /// Most recent intentions across all sessions, newest first
    pub async fn recent(&self, limit: i64) -> Result<Vec<Intention>> {
        let rows = sqlx::query(&format!(
            "{} ORDER BY created_at DESC, id LIMIT ?",
            SELECT_INTENTION
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .db_context("Failed to list intentions")?;

        rows.iter().map(decode_intention).collect()
    }
}

const SELECT_INTENTION: &str = "SELECT id, session_id, kind, source_kind, content, analysis, status,
        parent_intention_id, version, created_at
 FROM intentions";

fn decode_intention(row: &SqliteRow) -> Result<Intention> {
    let source_kind = match row.get::<String, _>("source_kind").as_str() {
        "prompt" => SourceKind::Prompt,
        "message" => SourceKind::Message,
        _ => SourceKind::Derived,
    };
    let analysis: String = row.get("analysis");
    let kind: String = row.get("kind");
    let status: String = row.get("status");

    Ok(Intention {
        id: row.get("id"),
        kind: parse_column::<IntentionKind>(&kind)?,
        source: IntentionSource {
            kind: source_kind,
            content: row.get("content"),
            session_id: row.get("session_id"),
        },
        analysis: from_json_column(&analysis, "analysis")?,
        status: parse_column::<IntentionStatus>(&status)?,
        relationships: Relationships {
            parent_intention_id: row.get("parent_intention_id"),
            ..Default::default()
        },
        version: row.get::<i64, _>("version") as u32,
        created_at: row.get("created_at"),
    })
}
