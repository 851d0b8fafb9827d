/// Plan and task persistence operations
///
/// A plan and its tasks are written in one transaction. `task_order`
/// preserves the construction order so dependency order survives a reload.
use super::{from_json_column, parse_column, to_json_column, DbResultExt};
use sdk::errors::Result;
use sdk::intention::IntentionKind;
use sdk::plan::{Plan, PlanMetadata, PlanStatus, Task, TaskStatus, TaskType};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Plan repository for database operations
pub struct PlanRepository {
    pool: SqlitePool,
}

impl PlanRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a plan with all of its tasks
    pub async fn insert(&self, plan: &Plan) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .db_context("Failed to begin transaction")?;

        sqlx::query(
            "INSERT INTO execution_plans (plan_id, intention_id, kind, status, total_tasks, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&plan.plan_id)
        .bind(&plan.intention_id)
        .bind(plan.kind.as_str())
        .bind(plan.status.as_str())
        .bind(plan.metadata.total_tasks as i64)
        .bind(plan.metadata.created_at)
        .execute(&mut *tx)
        .await
        .db_context("Failed to persist plan")?;

        for (order, task) in plan.tasks.iter().enumerate() {
            let dependencies = to_json_column(&task.dependencies, "dependencies")?;
            let parameters = to_json_column(&task.parameters, "parameters")?;
            let result = task
                .result
                .as_ref()
                .map(|r| to_json_column(r, "result"))
                .transpose()?;

            sqlx::query(
                "INSERT INTO plan_tasks (task_id, plan_id, task_order, task_type, priority,
                                         dependencies, parameters, status, result)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&task.task_id)
            .bind(&plan.plan_id)
            .bind(order as i64)
            .bind(task.task_type.as_str())
            .bind(task.priority as i64)
            .bind(&dependencies)
            .bind(&parameters)
            .bind(task.status.as_str())
            .bind(result)
            .execute(&mut *tx)
            .await
            .db_context("Failed to persist task")?;
        }

        tx.commit().await.db_context("Failed to commit plan")?;

        Ok(())
    }

    /// Record a task transition, and the plan status when it changed
    pub async fn update_task(
        &self,
        task: &Task,
        plan_status: Option<PlanStatus>,
        now: i64,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .db_context("Failed to begin transaction")?;

        let result = task
            .result
            .as_ref()
            .map(|r| to_json_column(r, "result"))
            .transpose()?;

        sqlx::query(
            "UPDATE plan_tasks SET
                status = ?,
                result = COALESCE(?, result),
                started_at = CASE WHEN ? = 'in_progress' THEN ? ELSE started_at END,
                completed_at = CASE WHEN ? IN ('completed', 'failed') THEN ? ELSE completed_at END
             WHERE task_id = ?",
        )
        .bind(task.status.as_str())
        .bind(result)
        .bind(task.status.as_str())
        .bind(now)
        .bind(task.status.as_str())
        .bind(now)
        .bind(&task.task_id)
        .execute(&mut *tx)
        .await
        .db_context("Failed to update task")?;

        if let Some(status) = plan_status {
            sqlx::query("UPDATE execution_plans SET status = ? WHERE plan_id = ?")
                .bind(status.as_str())
                .bind(&task.plan_id)
                .execute(&mut *tx)
                .await
                .db_context("Failed to update plan status")?;
        }

        tx.commit().await.db_context("Failed to commit task update")?;

        Ok(())
    }

    pub async fn get(&self, plan_id: &str) -> Result<Option<Plan>> {
        let row = sqlx::query(
            "SELECT plan_id, intention_id, kind, status, total_tasks, created_at
             FROM execution_plans WHERE plan_id = ?",
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .db_context("Failed to fetch plan")?;

        match row {
            Some(row) => Ok(Some(self.decode_plan(&row).await?)),
            None => Ok(None),
        }
    }

    /// Id of the plan owning a task
    pub async fn plan_id_for_task(&self, task_id: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT plan_id FROM plan_tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .db_context("Failed to look up task")
    }

    pub async fn for_intention(&self, intention_id: &str) -> Result<Vec<Plan>> {
        let rows = sqlx::query(
            "SELECT plan_id, intention_id, kind, status, total_tasks, created_at
             FROM execution_plans WHERE intention_id = ? ORDER BY created_at ASC, plan_id",
        )
        .bind(intention_id)
        .fetch_all(&self.pool)
        .await
        .db_context("Failed to list plans")?;

        let mut plans = Vec::with_capacity(rows.len());
        for row in &rows {
            plans.push(self.decode_plan(row).await?);
        }
        Ok(plans)
    }

    async fn decode_plan(&self, row: &SqliteRow) -> Result<Plan> {
        let plan_id: String = row.get("plan_id");
        let kind: String = row.get("kind");
        let status: String = row.get("status");

        let task_rows = sqlx::query(
            "SELECT task_id, plan_id, task_type, priority, dependencies, parameters, status, result
             FROM plan_tasks WHERE plan_id = ? ORDER BY task_order ASC",
        )
        .bind(&plan_id)
        .fetch_all(&self.pool)
        .await
        .db_context("Failed to load plan tasks")?;

        let tasks = task_rows
            .iter()
            .map(decode_task)
            .collect::<Result<Vec<_>>>()?;

        Ok(Plan {
            plan_id,
            intention_id: row.get("intention_id"),
            kind: parse_column::<IntentionKind>(&kind)?,
            status: parse_column::<PlanStatus>(&status)?,
            metadata: PlanMetadata {
                created_at: row.get("created_at"),
                total_tasks: row.get::<i64, _>("total_tasks") as usize,
            },
            tasks,
        })
    }
}

fn decode_task(row: &SqliteRow) -> Result<Task> {
    let task_type: String = row.get("task_type");
    let status: String = row.get("status");
    let dependencies: String = row.get("dependencies");
    let parameters: String = row.get("parameters");
    let result: Option<String> = row.get("result");

    Ok(Task {
        task_id: row.get("task_id"),
        plan_id: row.get("plan_id"),
        task_type: parse_column::<TaskType>(&task_type)?,
        priority: row.get::<i64, _>("priority") as u32,
        dependencies: from_json_column(&dependencies, "dependencies")?,
        parameters: from_json_column::<Value>(&parameters, "parameters")?,
        status: parse_column::<TaskStatus>(&status)?,
        result: result
            .as_deref()
            .map(|raw| from_json_column::<Value>(raw, "result"))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    fn sample_plan() -> Plan {
        let tasks = vec![
            Task {
                task_id: "t-1".to_string(),
                plan_id: "p-1".to_string(),
                task_type: TaskType::SqlGeneration,
                priority: 2,
                dependencies: vec![],
                parameters: json!({"query": "top customers"}),
                status: TaskStatus::Pending,
                result: None,
            },
            Task {
                task_id: "t-2".to_string(),
                plan_id: "p-1".to_string(),
                task_type: TaskType::Validation,
                priority: 3,
                dependencies: vec!["t-1".to_string()],
                parameters: json!({}),
                status: TaskStatus::Pending,
                result: None,
            },
        ];

        Plan {
            plan_id: "p-1".to_string(),
            intention_id: "i-1".to_string(),
            kind: IntentionKind::Completion,
            metadata: PlanMetadata {
                created_at: 5,
                total_tasks: tasks.len(),
            },
            tasks,
            status: PlanStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_plan_round_trip_keeps_order() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.plans();

        let plan = sample_plan();
        repo.insert(&plan).await.unwrap();

        let loaded = repo.get("p-1").await.unwrap().unwrap();
        assert_eq!(loaded, plan);
        assert_eq!(
            repo.plan_id_for_task("t-2").await.unwrap().as_deref(),
            Some("p-1")
        );
        assert_eq!(repo.for_intention("i-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_task_and_plan_status() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.plans();

        let mut plan = sample_plan();
        repo.insert(&plan).await.unwrap();

        let task = &mut plan.tasks[0];
        task.status = TaskStatus::Completed;
        task.result = Some(json!({"sql": "SELECT 1"}));
        repo.update_task(task, Some(PlanStatus::Completed), 9)
            .await
            .unwrap();

        let loaded = repo.get("p-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, PlanStatus::Completed);
        assert_eq!(loaded.tasks[0].status, TaskStatus::Completed);
        assert_eq!(loaded.tasks[0].result, Some(json!({"sql": "SELECT 1"})));
    }
}
