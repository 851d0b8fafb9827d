//! Integration tests for analysis-to-plan flow
//!
//! Covers plan shapes per intent, persistence across planner instances and
//! the task state machine.

use std::sync::Arc;

use nlsql_engine::capability::heuristic::HEURISTIC_MODEL;
use nlsql_engine::capability::{Classifier, HeuristicClassifier};
use nlsql_engine::conductor::{IntentionAnalyzer, Planner};
use nlsql_engine::config::AnalysisConfig;
use nlsql_engine::db::Database;
use sdk::errors::{EntityKind, ErrorKind};
use sdk::plan::{PlanStatus, TaskStatus, TaskType};
use sdk::session::{ContextMap, ContextValue};
use serde_json::json;

fn analyzer(db: &Database) -> IntentionAnalyzer {
    let heuristic: Arc<dyn Classifier> =
        Arc::new(HeuristicClassifier::new(HEURISTIC_MODEL).unwrap());
    IntentionAnalyzer::new(
        db,
        Arc::clone(&heuristic),
        heuristic,
        &AnalysisConfig::default(),
    )
}

fn sales() -> ContextMap {
    let mut context = ContextMap::new();
    context.insert("database_name".to_string(), ContextValue::from("sales"));
    context
}

#[tokio::test]
async fn test_completion_plan_ends_in_validation() {
    let db = Database::in_memory().await.unwrap();
    let analyzer = analyzer(&db);
    let planner = Planner::new(&db, 16);

    let intention = analyzer
        .analyze_completion("find top 5 customers", None, &sales())
        .await
        .unwrap();
    assert!(intention.is_executable());

    let plan = planner.create_plan(&intention).await.unwrap();
    let types: Vec<TaskType> = plan.tasks.iter().map(|t| t.task_type).collect();
    assert_eq!(types, vec![TaskType::SqlGeneration, TaskType::Validation]);

    let generation = &plan.tasks[0];
    let validation = &plan.tasks[1];
    assert_eq!(validation.dependencies, vec![generation.task_id.clone()]);
    assert_eq!(
        validation.parameters["target_task_id"],
        json!(generation.task_id)
    );
    assert_eq!(generation.parameters["database_name"], json!("sales"));
    assert!(plan.dependencies_are_backward());
}

#[tokio::test]
async fn test_completion_without_database_is_not_executable() {
    let db = Database::in_memory().await.unwrap();
    let analyzer = analyzer(&db);

    let intention = analyzer
        .analyze_completion("find top 5 customers", None, &ContextMap::new())
        .await
        .unwrap();

    assert!(!intention.is_executable());
    assert_eq!(
        intention.analysis.execution_requirements.missing_parameters,
        vec!["database_name"]
    );
}

#[tokio::test]
async fn test_plans_reload_from_storage() {
    let db = Database::in_memory().await.unwrap();
    let analyzer = analyzer(&db);

    let intention = analyzer
        .analyze_completion("count orders from orders", None, &sales())
        .await
        .unwrap();
    let plan = Planner::new(&db, 16).create_plan(&intention).await.unwrap();

    // A fresh planner has an empty arena and falls back to storage
    let reloaded = Planner::new(&db, 16);
    assert_eq!(reloaded.get_plan(&plan.plan_id).await.unwrap(), plan);
    assert_eq!(
        reloaded.get_task(&plan.tasks[0].task_id).await.unwrap(),
        plan.tasks[0]
    );
    assert_eq!(
        reloaded.plans_for_intention(&intention.id).await.unwrap(),
        vec![plan]
    );
}

#[tokio::test]
async fn test_task_cannot_start_before_dependencies() {
    let db = Database::in_memory().await.unwrap();
    let analyzer = analyzer(&db);
    let planner = Planner::new(&db, 16);

    let intention = analyzer
        .analyze_completion("find top 5 customers", None, &sales())
        .await
        .unwrap();
    let plan = planner.create_plan(&intention).await.unwrap();
    let validation = &plan.tasks[1];

    let err = planner
        .update_task_status(&validation.task_id, TaskStatus::InProgress, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_plan_completes_once_and_stays_completed() {
    let db = Database::in_memory().await.unwrap();
    let analyzer = analyzer(&db);
    let planner = Planner::new(&db, 1);

    let intention = analyzer
        .analyze_completion("find top 5 customers", None, &sales())
        .await
        .unwrap();
    let plan = planner.create_plan(&intention).await.unwrap();

    for task in &plan.tasks {
        planner
            .update_task_status(&task.task_id, TaskStatus::InProgress, None)
            .await
            .unwrap();
        let done = planner
            .update_task_status(
                &task.task_id,
                TaskStatus::Completed,
                Some(json!({"sql": "SELECT 1"})),
            )
            .await
            .unwrap();
        assert_eq!(done.result, Some(json!({"sql": "SELECT 1"})));
    }

    // Evict the plan from the single-slot arena, then reload it
    let other = analyzer
        .analyze_completion("find top 3 orders", None, &sales())
        .await
        .unwrap();
    planner.create_plan(&other).await.unwrap();

    let reloaded = planner.get_plan(&plan.plan_id).await.unwrap();
    assert_eq!(reloaded.status, PlanStatus::Completed);
    assert!(reloaded.all_tasks_completed());

    // Terminal tasks reject further transitions
    let err = planner
        .update_task_status(&plan.tasks[0].task_id, TaskStatus::Failed, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let db = Database::in_memory().await.unwrap();
    let planner = Planner::new(&db, 4);

    assert!(planner
        .get_plan("missing")
        .await
        .unwrap_err()
        .is_not_found(EntityKind::Plan));
    assert!(planner
        .update_task_status("missing", TaskStatus::InProgress, None)
        .await
        .unwrap_err()
        .is_not_found(EntityKind::Task));
}

#[tokio::test]
async fn test_non_sql_intent_gets_empty_completed_plan() {
    let db = Database::in_memory().await.unwrap();
    let analyzer = analyzer(&db);
    let planner = Planner::new(&db, 4);

    let intention = analyzer
        .analyze_completion("describe the orders table", None, &sales())
        .await
        .unwrap();
    let plan = planner.create_plan(&intention).await.unwrap();

    assert!(plan.tasks.is_empty());
    assert_eq!(plan.status, PlanStatus::Completed);
}
