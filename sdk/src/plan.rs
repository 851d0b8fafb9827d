//! Plan and task types

use crate::intention::IntentionKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    SchemaLookup,
    SqlGeneration,
    Clarification,
    Refinement,
    Validation,
    DataQuery,
    Explanation,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SchemaLookup => "schema_lookup",
            TaskType::SqlGeneration => "sql_generation",
            TaskType::Clarification => "clarification",
            TaskType::Refinement => "refinement",
            TaskType::Validation => "validation",
            TaskType::DataQuery => "data_query",
            TaskType::Explanation => "explanation",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schema_lookup" => Ok(TaskType::SchemaLookup),
            "sql_generation" => Ok(TaskType::SqlGeneration),
            "clarification" => Ok(TaskType::Clarification),
            "refinement" => Ok(TaskType::Refinement),
            "validation" => Ok(TaskType::Validation),
            "data_query" => Ok(TaskType::DataQuery),
            "explanation" => Ok(TaskType::Explanation),
            other => Err(format!("unknown task type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// pending → in_progress → completed | failed
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// Aggregate plan status, derived from its tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Completed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Completed => "completed",
        }
    }
}

impl FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PlanStatus::Pending),
            "completed" => Ok(PlanStatus::Completed),
            other => Err(format!("unknown plan status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub plan_id: String,
    pub task_type: TaskType,
    /// Lower runs first; also the stable tie-break
    pub priority: u32,
    /// Ids of tasks earlier in the same plan
    pub dependencies: Vec<String>,
    pub parameters: Value,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    /// Unix millis
    pub created_at: i64,
    pub total_tasks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub intention_id: String,
    pub kind: IntentionKind,
    pub tasks: Vec<Task>,
    pub status: PlanStatus,
    pub metadata: PlanMetadata,
}

impl Plan {
    /// Whether every task has completed; vacuously true for an empty plan
    pub fn all_tasks_completed(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Completed)
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.task_id == task_id)
    }

    /// Whether every dependency refers to a task appearing earlier in the plan
    pub fn dependencies_are_backward(&self) -> bool {
        self.tasks.iter().enumerate().all(|(index, task)| {
            task.dependencies
                .iter()
                .all(|dep| self.tasks[..index].iter().any(|t| &t.task_id == dep))
        })
    }
}
