//! Integration tests for the Assistant Orchestrator
//!
//! Drives whole turns against the heuristic classifier and the catalog
//! retriever over a seeded database:
//! - Session lifecycle through the orchestrator
//! - Completion plans ending in validation
//! - Concurrent chats on one session
//! - Cancellation between stages
//! - Event streaming

use std::sync::Arc;
use std::time::Duration;

use nlsql_engine::capability::ClientFactory;
use nlsql_engine::conductor::{Assistant, Capabilities, CancellationToken};
use nlsql_engine::config::Config;
use nlsql_engine::db::{CatalogSeed, Database};
use nlsql_engine::message_bus::{Event, EventType};
use sdk::errors::{EntityKind, ErrorKind, Stage};
use sdk::intention::{IntentionStatus, PrimaryIntent};
use sdk::plan::{PlanStatus, TaskType};
use sdk::session::{ContextMap, ContextValue};

const SEED: &str = r#"{
  "databases": [
    {"database_name": "sales", "description": "Orders and customers", "keywords": ["revenue", "orders"]}
  ],
  "tables": [
    {"database_name": "sales", "table_name": "orders", "description": "One row per order",
     "ddl": "CREATE TABLE orders (id INTEGER, customer_id INTEGER, total REAL)"},
    {"database_name": "sales", "table_name": "customers", "description": "Customer master data"}
  ],
  "columns": [
    {"database_name": "sales", "table_name": "orders", "field_name": "customer_id", "data_type": "INTEGER"},
    {"database_name": "sales", "table_name": "orders", "field_name": "total", "data_type": "REAL"},
    {"database_name": "sales", "table_name": "customers", "field_name": "id", "data_type": "INTEGER"}
  ],
  "examples": [
    {"database_name": "sales", "query": "SELECT customer_id, SUM(total) FROM orders GROUP BY customer_id",
     "description": "revenue per customer"}
  ]
}"#;

async fn setup() -> (Database, Assistant) {
    let db = Database::in_memory().await.unwrap();
    let seed = CatalogSeed::from_json_str(SEED).unwrap();
    db.catalog().load_seed(&seed).await.unwrap();

    let config = Config::default();
    let factory = ClientFactory::new();
    let capabilities = Capabilities::from_config(&db, &config, &factory).unwrap();
    let assistant = Assistant::new(&db, &config, capabilities);
    (db, assistant)
}

fn sales_context() -> ContextMap {
    let mut context = ContextMap::new();
    context.insert("database_name".to_string(), ContextValue::from("sales"));
    context
}

#[tokio::test]
async fn test_completion_creates_session_and_plan() {
    let (_db, assistant) = setup().await;

    let response = assistant
        .complete(
            "find top 5 customers from orders by total",
            Some(sales_context()),
            None,
        )
        .await
        .unwrap();

    assert!(response.metadata.is_new_session);
    assert_eq!(response.metadata.total_intentions, 1);
    assert_eq!(response.metadata.context_version, 1);
    assert_eq!(response.data.model, "heuristic");

    let primary = &response.data.intention.primary;
    assert_eq!(primary.primary_intent, PrimaryIntent::SqlQuery);
    assert_eq!(primary.status, IntentionStatus::Completed);
    assert!(primary.is_executable);

    // The plan ends in validation depending on sql_generation
    let plan_id = &response.metadata.plan_ids[0];
    let plan = assistant.planner().get_plan(plan_id).await.unwrap();
    let types: Vec<TaskType> = plan.tasks.iter().map(|t| t.task_type).collect();
    assert_eq!(
        types,
        vec![
            TaskType::SchemaLookup,
            TaskType::SqlGeneration,
            TaskType::Validation
        ]
    );
    let validation = &plan.tasks[2];
    assert_eq!(validation.dependencies, vec![plan.tasks[1].task_id.clone()]);

    // Refined context and turn bookkeeping were written back
    let session = assistant
        .sessions()
        .get(&response.metadata.session_id)
        .await
        .unwrap();
    assert_eq!(session.context_version, 1);
    assert_eq!(
        session.context.get("last_intention_id"),
        Some(&ContextValue::from(primary.id.as_str()))
    );
    assert!(session.context.contains_key("database_context"));
    assert!(session.context.contains_key("enrichment"));
    assert_eq!(session.chat_history.len(), 1);
    assert_eq!(session.chat_history[0].context_version, 1);
}

#[tokio::test]
async fn test_completion_without_database_is_not_executable() {
    let (_db, assistant) = setup().await;

    let response = assistant
        .complete("find top 5 customers", None, None)
        .await
        .unwrap();

    let primary = &response.data.intention.primary;
    assert!(!primary.is_executable);
    assert_eq!(primary.missing_parameters, vec!["database_name"]);
    assert!(response.metadata.plan_ids.is_empty());
    assert!(response.text.contains("database_name"));
}

#[tokio::test]
async fn test_empty_input_is_invalid_request() {
    let (_db, assistant) = setup().await;

    let err = assistant.chat("   ", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert_eq!(err.stage(), Some(Stage::Analysis));
    assert!(assistant.active_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_end_session_then_chat_is_not_found() {
    let (_db, assistant) = setup().await;

    let first = assistant
        .chat("show orders", None, Some(sales_context()))
        .await
        .unwrap();
    let session_id = first.metadata.session_id.clone();

    assert!(assistant.end_session(&session_id).await.unwrap());
    assert!(!assistant.end_session(&session_id).await.unwrap());

    let err = assistant
        .chat("show customers", Some(&session_id), None)
        .await
        .unwrap_err();
    assert!(err.is_not_found(EntityKind::Session));
    assert_eq!(err.stage(), Some(Stage::Session));

    let err = assistant.get_history(&session_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_chat_history_accumulates_intentions() {
    let (_db, assistant) = setup().await;

    let first = assistant
        .chat("show total from orders", None, Some(sales_context()))
        .await
        .unwrap();
    let session_id = first.metadata.session_id.clone();

    let second = assistant
        .chat("only orders over 100 instead", Some(&session_id), None)
        .await
        .unwrap();

    assert!(!second.metadata.is_new_session);
    assert_eq!(
        second.data.intention.primary.primary_intent,
        PrimaryIntent::Refinement
    );

    // A chat refinement plans refinement then validation
    let plan = assistant
        .planner()
        .get_plan(&second.metadata.plan_ids[0])
        .await
        .unwrap();
    assert_eq!(plan.tasks[0].task_type, TaskType::Refinement);
    assert_eq!(plan.tasks[1].task_type, TaskType::Validation);

    let history = assistant.get_history(&session_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].user_input, "show total from orders");
    assert!(history[0].context_version < history[1].context_version);
}

#[tokio::test]
async fn test_explain_request_derives_child_intention() {
    let (_db, assistant) = setup().await;

    let response = assistant
        .chat(
            "show total from orders and explain the result",
            None,
            Some(sales_context()),
        )
        .await
        .unwrap();

    assert_eq!(response.metadata.total_intentions, 2);
    let primary = &response.data.intention.primary;
    let child = &response.data.intention.additional[0];
    assert_eq!(child.primary_intent, PrimaryIntent::Explanation);
    assert_eq!(child.parent_intention_id.as_deref(), Some(primary.id.as_str()));

    let parent = assistant.analyzer().get_intention(&primary.id).await.unwrap();
    assert!(parent.relationships.child_intention_ids.contains(&child.id));
}

#[tokio::test]
async fn test_concurrent_chats_get_distinct_versions() {
    let (_db, assistant) = setup().await;
    let assistant = Arc::new(assistant);

    let session = assistant
        .sessions()
        .create(Some(sales_context()))
        .await
        .unwrap();
    let session_id = session.session_id.clone();

    let mut handles = Vec::new();
    for message in ["show total from orders", "list customers from customers"] {
        let assistant = Arc::clone(&assistant);
        let session_id = session_id.clone();
        handles.push(tokio::spawn(async move {
            assistant.chat(message, Some(&session_id), None).await
        }));
    }

    let mut versions = Vec::new();
    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        versions.push(response.metadata.context_version);
    }
    versions.sort_unstable();
    assert_eq!(versions, vec![1, 2]);

    let history = assistant.get_history(&session_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].sequence < history[1].sequence);
    assert!(history[0].context_version < history[1].context_version);
}

#[tokio::test]
async fn test_cancelled_turn_stops_before_analysis() {
    let (_db, assistant) = setup().await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = assistant
        .chat_cancellable("show orders", None, Some(sales_context()), &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.stage(), Some(Stage::Analysis));

    // The session created before the checkpoint survives without turns
    let sessions = assistant.active_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(assistant.get_history(&sessions[0]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_turn_events_are_streamed() {
    let (_db, assistant) = setup().await;
    let mut completed = assistant.subscribe(EventType::TurnCompleted).await;
    let mut failed = assistant.subscribe(EventType::TurnFailed).await;

    let response = assistant
        .complete("show orders", Some(sales_context()), None)
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), completed.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        Event::TurnCompleted { response: streamed } => {
            assert_eq!(streamed.metadata.request_id, response.metadata.request_id);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let _ = assistant
        .complete("show orders", None, Some("missing-session"))
        .await;
    let event = tokio::time::timeout(Duration::from_secs(1), failed.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        Event::TurnFailed { kind, session_id, .. } => {
            assert_eq!(kind, ErrorKind::NotFound);
            assert_eq!(session_id.as_deref(), Some("missing-session"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_sweep_keeps_recent_sessions() {
    let (_db, assistant) = setup().await;

    assistant
        .complete("show orders", Some(sales_context()), None)
        .await
        .unwrap();

    assert_eq!(assistant.sweep_expired().await.unwrap(), 0);
    assert_eq!(assistant.active_sessions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_task_lifecycle_completes_plan() {
    let (_db, assistant) = setup().await;

    let response = assistant
        .complete("count total from orders", Some(sales_context()), None)
        .await
        .unwrap();
    let plan_id = &response.metadata.plan_ids[0];
    let plan = assistant.planner().get_plan(plan_id).await.unwrap();

    for task in &plan.tasks {
        assistant
            .planner()
            .update_task_status(&task.task_id, sdk::plan::TaskStatus::InProgress, None)
            .await
            .unwrap();
        assistant
            .planner()
            .update_task_status(
                &task.task_id,
                sdk::plan::TaskStatus::Completed,
                Some(serde_json::json!({"ok": true})),
            )
            .await
            .unwrap();
    }

    let plan = assistant.planner().get_plan(plan_id).await.unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
    assert!(plan.all_tasks_completed());
}
