//! Planner
//!
//! Turns an executable intention into an ordered, dependency-linked task
//! list. Tasks are appended in dependency order and a dependency is only
//! ever the id of a task already appended, so plans are acyclic by
//! construction.
//!
//! Plans are written through to storage before they become reachable in
//! the in-memory arena.

use crate::db::{now_millis, Database, PlanRepository};
use sdk::errors::{EngineError, EntityKind, Result};
use sdk::intention::{Intention, IntentionKind, PrimaryIntent};
use sdk::plan::{Plan, PlanMetadata, PlanStatus, Task, TaskStatus, TaskType};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Build the task list for an intention
///
/// * completion + sql_query/data_exploration: `schema_lookup` (1, only when
///   tables or fields are referenced), `sql_generation` (2), `validation` (3)
/// * chat + clarification: `clarification` (1)
/// * chat + refinement: `refinement` (1), `validation` (2)
/// * anything else: no tasks, and the plan is completed as built
pub fn build_plan(intention: &Intention, now: i64) -> Plan {
    let plan_id = uuid::Uuid::new_v4().to_string();
    let analysis = &intention.analysis;
    let mut tasks = TaskList::new(&plan_id);

    match (intention.kind, analysis.primary_intent) {
        (IntentionKind::Completion, intent) if intent.is_sql_generation_like() => {
            let lookup = analysis.references_schema().then(|| {
                tasks.push(
                    TaskType::SchemaLookup,
                    1,
                    Vec::new(),
                    json!({
                        "tables": analysis.entity("tables"),
                        "fields": analysis.entity("fields"),
                        "database_name": analysis.database_name,
                    }),
                )
            });

            let generation = tasks.push(
                TaskType::SqlGeneration,
                2,
                lookup.into_iter().collect(),
                json!({
                    "query": intention.source.content,
                    "primary_intent": analysis.primary_intent,
                    "entities": analysis.entities,
                    "constraints": analysis.constraints,
                    "database_name": analysis.database_name,
                }),
            );

            tasks.push(
                TaskType::Validation,
                3,
                vec![generation.clone()],
                json!({ "target_task_id": generation }),
            );
        }
        (IntentionKind::Chat, PrimaryIntent::Clarification) => {
            tasks.push(
                TaskType::Clarification,
                1,
                Vec::new(),
                json!({
                    "question": intention.source.content,
                    "missing_parameters": analysis.execution_requirements.missing_parameters,
                }),
            );
        }
        (IntentionKind::Chat, PrimaryIntent::Refinement) => {
            let refinement = tasks.push(
                TaskType::Refinement,
                1,
                Vec::new(),
                json!({
                    "request": intention.source.content,
                    "previous_intents": analysis.conversation_state.previous_intents,
                    "constraints": analysis.constraints,
                }),
            );

            tasks.push(
                TaskType::Validation,
                2,
                vec![refinement.clone()],
                json!({ "target_task_id": refinement }),
            );
        }
        _ => {}
    }

    let tasks = tasks.finish();
    let status = if tasks.is_empty() {
        PlanStatus::Completed
    } else {
        PlanStatus::Pending
    };

    Plan {
        plan_id,
        intention_id: intention.id.clone(),
        kind: intention.kind,
        metadata: PlanMetadata {
            created_at: now,
            total_tasks: tasks.len(),
        },
        tasks,
        status,
    }
}

struct TaskList {
    plan_id: String,
    tasks: Vec<Task>,
}

impl TaskList {
    fn new(plan_id: &str) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            tasks: Vec::new(),
        }
    }

    /// Append a task and return its fresh id
    fn push(
        &mut self,
        task_type: TaskType,
        priority: u32,
        dependencies: Vec<String>,
        parameters: Value,
    ) -> String {
        debug_assert!(dependencies
            .iter()
            .all(|dep| self.tasks.iter().any(|t| &t.task_id == dep)));

        let task_id = uuid::Uuid::new_v4().to_string();
        self.tasks.push(Task {
            task_id: task_id.clone(),
            plan_id: self.plan_id.clone(),
            task_type,
            priority,
            dependencies,
            parameters,
            status: TaskStatus::Pending,
            result: None,
        });
        task_id
    }

    fn finish(self) -> Vec<Task> {
        self.tasks
    }
}

/// Recently used plans, evicted oldest first beyond `retention`
struct PlanArena {
    plans: HashMap<String, Plan>,
    task_index: HashMap<String, String>,
    order: VecDeque<String>,
    retention: usize,
}

impl PlanArena {
    fn new(retention: usize) -> Self {
        Self {
            plans: HashMap::new(),
            task_index: HashMap::new(),
            order: VecDeque::new(),
            retention: retention.max(1),
        }
    }

    fn insert(&mut self, plan: Plan) {
        for task in &plan.tasks {
            self.task_index
                .insert(task.task_id.clone(), plan.plan_id.clone());
        }
        let plan_id = plan.plan_id.clone();
        if self.plans.insert(plan_id.clone(), plan).is_none() {
            self.order.push_back(plan_id);
        }

        while self.plans.len() > self.retention {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(evicted) = self.plans.remove(&oldest) {
                for task in &evicted.tasks {
                    self.task_index.remove(&task.task_id);
                }
            }
        }
    }
}

pub struct Planner {
    repo: PlanRepository,
    arena: RwLock<PlanArena>,
}

impl Planner {
    pub fn new(db: &Database, retention: usize) -> Self {
        Self {
            repo: db.plans(),
            arena: RwLock::new(PlanArena::new(retention)),
        }
    }

    pub async fn create_plan(&self, intention: &Intention) -> Result<Plan> {
        let plan = build_plan(intention, now_millis());

        self.repo.insert(&plan).await?;
        self.arena.write().await.insert(plan.clone());

        info!(
            plan_id = %plan.plan_id,
            intention_id = %intention.id,
            tasks = plan.tasks.len(),
            status = plan.status.as_str(),
            "Plan created"
        );
        Ok(plan)
    }

    pub async fn get_plan(&self, plan_id: &str) -> Result<Plan> {
        if let Some(plan) = self.arena.read().await.plans.get(plan_id) {
            return Ok(plan.clone());
        }
        self.repo
            .get(plan_id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Plan, plan_id))
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        let plan_id = self.owning_plan_id(task_id).await?;
        self.get_plan(&plan_id)
            .await?
            .task(task_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(EntityKind::Task, task_id))
    }

    /// Advance a task through pending → in_progress → completed | failed
    ///
    /// Starting a task requires every dependency to be completed. When the
    /// last task completes the plan flips to completed, and never back.
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<Value>,
    ) -> Result<Task> {
        let plan_id = self.owning_plan_id(task_id).await?;
        let mut arena = self.arena.write().await;

        if !arena.plans.contains_key(&plan_id) {
            let plan = self
                .repo
                .get(&plan_id)
                .await?
                .ok_or_else(|| EngineError::not_found(EntityKind::Plan, &plan_id))?;
            arena.insert(plan);
        }

        let (updated, completes_plan) = {
            let plan = arena
                .plans
                .get(&plan_id)
                .ok_or_else(|| EngineError::not_found(EntityKind::Plan, &plan_id))?;
            let task = plan
                .task(task_id)
                .ok_or_else(|| EngineError::not_found(EntityKind::Task, task_id))?;

            check_transition(plan, task, status)?;

            let mut updated = task.clone();
            updated.status = status;
            if result.is_some() {
                updated.result = result;
            }

            let completes_plan = plan.status != PlanStatus::Completed
                && plan.tasks.iter().all(|t| {
                    if t.task_id == task_id {
                        status == TaskStatus::Completed
                    } else {
                        t.status == TaskStatus::Completed
                    }
                });
            (updated, completes_plan)
        };

        let plan_status = completes_plan.then_some(PlanStatus::Completed);
        self.repo
            .update_task(&updated, plan_status, now_millis())
            .await?;

        if let Some(plan) = arena.plans.get_mut(&plan_id) {
            if let Some(task) = plan.task_mut(task_id) {
                *task = updated.clone();
            }
            if completes_plan {
                plan.status = PlanStatus::Completed;
            }
        }

        debug!(task_id, status = status.as_str(), plan_completed = completes_plan, "Task updated");
        if completes_plan {
            info!(plan_id = %plan_id, "Plan completed");
        }

        Ok(updated)
    }

    /// Every plan created for an intention, oldest first
    pub async fn plans_for_intention(&self, intention_id: &str) -> Result<Vec<Plan>> {
        self.repo.for_intention(intention_id).await
    }

    async fn owning_plan_id(&self, task_id: &str) -> Result<String> {
        if let Some(plan_id) = self.arena.read().await.task_index.get(task_id) {
            return Ok(plan_id.clone());
        }
        self.repo
            .plan_id_for_task(task_id)
            .await?
            .ok_or_else(|| EngineError::not_found(EntityKind::Task, task_id))
    }
}

fn check_transition(plan: &Plan, task: &Task, next: TaskStatus) -> Result<()> {
    if task.status.is_terminal() {
        return Err(EngineError::InvalidRequest(format!(
            "Task {} is already {}",
            task.task_id, task.status
        )));
    }
    if !task.status.can_transition_to(next) {
        return Err(EngineError::InvalidRequest(format!(
            "Task {} cannot move from {} to {}",
            task.task_id, task.status, next
        )));
    }

    if next == TaskStatus::InProgress {
        let unfinished: Vec<&str> = task
            .dependencies
            .iter()
            .filter(|dep| {
                plan.task(dep)
                    .map_or(true, |t| t.status != TaskStatus::Completed)
            })
            .map(String::as_str)
            .collect();

        if !unfinished.is_empty() {
            return Err(EngineError::InvalidRequest(format!(
                "Task {} has unfinished dependencies: {}",
                task.task_id,
                unfinished.join(", ")
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::errors::ErrorKind;
    use sdk::intention::{
        Analysis, ConversationState, ExecutionRequirements, IntentRecord, IntentionSource,
        IntentionStatus, Relationships, SourceKind,
    };
    use std::collections::BTreeMap;

    fn intention(kind: IntentionKind, primary: PrimaryIntent, tables: &[&str]) -> Intention {
        let mut entities = BTreeMap::new();
        if !tables.is_empty() {
            entities.insert(
                "tables".to_string(),
                tables.iter().map(|t| t.to_string()).collect(),
            );
        }

        Intention {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            source: IntentionSource {
                kind: SourceKind::Prompt,
                content: "find top 5 customers".to_string(),
                session_id: None,
            },
            analysis: Analysis {
                primary_intent: primary,
                sub_intents: vec![],
                entities,
                constraints: vec![],
                database_name: Some("sales".to_string()),
                is_executable: true,
                execution_requirements: ExecutionRequirements::default(),
                conversation_state: ConversationState::default(),
            },
            status: IntentionStatus::Pending,
            relationships: Relationships::default(),
            version: 1,
            created_at: 0,
        }
    }

    fn types(plan: &Plan) -> Vec<TaskType> {
        plan.tasks.iter().map(|t| t.task_type).collect()
    }

    #[test]
    fn test_completion_with_schema_reference() {
        let plan = build_plan(
            &intention(IntentionKind::Completion, PrimaryIntent::SqlQuery, &["orders"]),
            0,
        );

        assert_eq!(
            types(&plan),
            vec![TaskType::SchemaLookup, TaskType::SqlGeneration, TaskType::Validation]
        );
        assert_eq!(
            plan.tasks.iter().map(|t| t.priority).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(plan.tasks[1].dependencies, vec![plan.tasks[0].task_id.clone()]);
        assert_eq!(plan.tasks[2].dependencies, vec![plan.tasks[1].task_id.clone()]);
        assert!(plan.dependencies_are_backward());
        assert_eq!(plan.metadata.total_tasks, 3);
        assert_eq!(plan.status, PlanStatus::Pending);
    }

    #[test]
    fn test_completion_without_schema_reference() {
        let plan = build_plan(
            &intention(IntentionKind::Completion, PrimaryIntent::DataExploration, &[]),
            0,
        );

        assert_eq!(types(&plan), vec![TaskType::SqlGeneration, TaskType::Validation]);
        assert!(plan.tasks[0].dependencies.is_empty());
        assert_eq!(plan.tasks[1].dependencies, vec![plan.tasks[0].task_id.clone()]);
    }

    #[test]
    fn test_chat_rules() {
        let clarification = build_plan(
            &intention(IntentionKind::Chat, PrimaryIntent::Clarification, &[]),
            0,
        );
        assert_eq!(types(&clarification), vec![TaskType::Clarification]);
        assert_eq!(clarification.tasks[0].priority, 1);

        let mut refine = intention(IntentionKind::Chat, PrimaryIntent::Refinement, &[]);
        refine.analysis.conversation_state.previous_intents.push(IntentRecord {
            intention_id: "earlier".to_string(),
            primary_intent: PrimaryIntent::SqlQuery,
            entities: BTreeMap::new(),
            timestamp: 0,
        });
        let refinement = build_plan(&refine, 0);
        assert_eq!(types(&refinement), vec![TaskType::Refinement, TaskType::Validation]);
        assert_eq!(
            refinement.tasks[0].parameters["previous_intents"][0]["intention_id"],
            "earlier"
        );
        assert_eq!(refinement.tasks[1].priority, 2);
    }

    #[test]
    fn test_other_combinations_are_empty_and_completed() {
        for (kind, primary) in [
            (IntentionKind::Chat, PrimaryIntent::SqlQuery),
            (IntentionKind::Completion, PrimaryIntent::Clarification),
            (IntentionKind::Completion, PrimaryIntent::SchemaInquiry),
            (IntentionKind::Chat, PrimaryIntent::Explanation),
        ] {
            let plan = build_plan(&intention(kind, primary, &["orders"]), 0);
            assert!(plan.tasks.is_empty(), "{:?} {:?}", kind, primary);
            assert_eq!(plan.status, PlanStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_task_state_machine_and_plan_completion() {
        let db = Database::in_memory().await.unwrap();
        let planner = Planner::new(&db, 16);
        let plan = planner
            .create_plan(&intention(
                IntentionKind::Completion,
                PrimaryIntent::SqlQuery,
                &[],
            ))
            .await
            .unwrap();
        let (generation, validation) = (&plan.tasks[0].task_id, &plan.tasks[1].task_id);

        let blocked = planner
            .update_task_status(validation, TaskStatus::InProgress, None)
            .await
            .unwrap_err();
        assert_eq!(blocked.kind(), ErrorKind::InvalidRequest);

        let skipped = planner
            .update_task_status(generation, TaskStatus::Completed, None)
            .await
            .unwrap_err();
        assert_eq!(skipped.kind(), ErrorKind::InvalidRequest);

        planner
            .update_task_status(generation, TaskStatus::InProgress, None)
            .await
            .unwrap();
        planner
            .update_task_status(
                generation,
                TaskStatus::Completed,
                Some(json!({"sql": "SELECT 1"})),
            )
            .await
            .unwrap();
        assert_eq!(
            planner.get_plan(&plan.plan_id).await.unwrap().status,
            PlanStatus::Pending
        );

        planner
            .update_task_status(validation, TaskStatus::InProgress, None)
            .await
            .unwrap();
        planner
            .update_task_status(validation, TaskStatus::Completed, None)
            .await
            .unwrap();

        let done = planner.get_plan(&plan.plan_id).await.unwrap();
        assert_eq!(done.status, PlanStatus::Completed);
        assert!(done.all_tasks_completed());

        let terminal = planner
            .update_task_status(validation, TaskStatus::InProgress, None)
            .await
            .unwrap_err();
        assert_eq!(terminal.kind(), ErrorKind::InvalidRequest);

        let stored = db.plans().get(&plan.plan_id).await.unwrap().unwrap();
        assert_eq!(stored.status, PlanStatus::Completed);
        assert_eq!(stored.tasks[0].result, Some(json!({"sql": "SELECT 1"})));
    }

    #[tokio::test]
    async fn test_failed_task_keeps_plan_pending() {
        let db = Database::in_memory().await.unwrap();
        let planner = Planner::new(&db, 16);
        let plan = planner
            .create_plan(&intention(IntentionKind::Chat, PrimaryIntent::Clarification, &[]))
            .await
            .unwrap();
        let task_id = &plan.tasks[0].task_id;

        planner
            .update_task_status(task_id, TaskStatus::InProgress, None)
            .await
            .unwrap();
        let failed = planner
            .update_task_status(task_id, TaskStatus::Failed, None)
            .await
            .unwrap();

        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(
            planner.get_plan(&plan.plan_id).await.unwrap().status,
            PlanStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let db = Database::in_memory().await.unwrap();
        let planner = Planner::new(&db, 16);

        assert!(planner
            .get_plan("nope")
            .await
            .unwrap_err()
            .is_not_found(EntityKind::Plan));
        assert!(planner
            .get_task("nope")
            .await
            .unwrap_err()
            .is_not_found(EntityKind::Task));
        assert!(planner
            .update_task_status("nope", TaskStatus::InProgress, None)
            .await
            .unwrap_err()
            .is_not_found(EntityKind::Task));
    }

    #[tokio::test]
    async fn test_evicted_plans_reload_from_storage() {
        let db = Database::in_memory().await.unwrap();
        let planner = Planner::new(&db, 1);
        let source = intention(IntentionKind::Completion, PrimaryIntent::SqlQuery, &[]);

        let first = planner.create_plan(&source).await.unwrap();
        planner.create_plan(&source).await.unwrap();

        let task_id = &first.tasks[0].task_id;
        planner
            .update_task_status(task_id, TaskStatus::InProgress, None)
            .await
            .unwrap();
        assert_eq!(
            planner.get_task(task_id).await.unwrap().status,
            TaskStatus::InProgress
        );
        assert_eq!(planner.plans_for_intention(&source.id).await.unwrap().len(), 2);
    }
}
