//! Response text
//!
//! The assistant does not generate SQL itself; the text tells the caller
//! what was understood and what was planned.

use super::intention::ChatAnalysis;
use sdk::intention::{Intention, PrimaryIntent};
use sdk::plan::Plan;
use std::collections::BTreeMap;

fn label(intent: PrimaryIntent) -> String {
    intent.as_str().replace('_', " ")
}

fn describe(intention: &Intention, plan: Option<&Plan>) -> String {
    let intent = label(intention.analysis.primary_intent);
    let missing = &intention.analysis.execution_requirements.missing_parameters;

    match plan {
        Some(plan) if !plan.tasks.is_empty() => {
            let steps: Vec<&str> = plan.tasks.iter().map(|t| t.task_type.as_str()).collect();
            format!(
                "Planned {} task{} for your {} request: {}.",
                steps.len(),
                if steps.len() == 1 { "" } else { "s" },
                intent,
                steps.join(", ")
            )
        }
        _ if !missing.is_empty() => format!(
            "I need more information before I can continue with your {} request. Missing: {}.",
            intent,
            missing.join(", ")
        ),
        Some(_) => format!("Understood your {} request. There is nothing to run for it.", intent),
        None => format!("Understood your {} request.", intent),
    }
}

/// Human-readable summary of a turn
pub fn compose_text(analysis: &ChatAnalysis, plans: &BTreeMap<String, Plan>) -> String {
    let mut text = describe(&analysis.primary, plans.get(&analysis.primary.id));

    for extra in &analysis.additional {
        text.push(' ');
        match extra.analysis.primary_intent {
            PrimaryIntent::Explanation => {
                text.push_str("I will also explain the result once it is ready.")
            }
            _ => text.push_str(&describe(extra, plans.get(&extra.id))),
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::planner::build_plan;
    use sdk::intention::{
        Analysis, ConversationState, ExecutionRequirements, IntentionKind, IntentionSource,
        IntentionStatus, Relationships, SourceKind,
    };

    fn intention(primary: PrimaryIntent, missing: &[&str]) -> Intention {
        Intention {
            id: "i-1".to_string(),
            kind: IntentionKind::Completion,
            source: IntentionSource {
                kind: SourceKind::Prompt,
                content: "find top 5 customers".to_string(),
                session_id: None,
            },
            analysis: Analysis {
                primary_intent: primary,
                sub_intents: vec![],
                entities: Default::default(),
                constraints: vec![],
                database_name: None,
                is_executable: missing.is_empty(),
                execution_requirements: ExecutionRequirements {
                    needs_clarification: !missing.is_empty(),
                    missing_parameters: missing.iter().map(|s| s.to_string()).collect(),
                },
                conversation_state: ConversationState::default(),
            },
            status: IntentionStatus::Pending,
            relationships: Relationships::default(),
            version: 1,
            created_at: 0,
        }
    }

    #[test]
    fn test_planned_tasks_are_listed() {
        let primary = intention(PrimaryIntent::SqlQuery, &[]);
        let mut plans = BTreeMap::new();
        plans.insert(primary.id.clone(), build_plan(&primary, 0));

        let text = compose_text(&ChatAnalysis::single(primary), &plans);
        assert_eq!(
            text,
            "Planned 2 tasks for your sql query request: sql_generation, validation."
        );
    }

    #[test]
    fn test_missing_parameters_are_named() {
        let primary = intention(PrimaryIntent::SqlQuery, &["database_name"]);
        let text = compose_text(&ChatAnalysis::single(primary), &BTreeMap::new());
        assert!(text.contains("Missing: database_name."));
    }

    #[test]
    fn test_derived_explanation_is_mentioned() {
        let primary = intention(PrimaryIntent::SchemaInquiry, &[]);
        let mut child = intention(PrimaryIntent::Explanation, &[]);
        child.id = "i-2".to_string();

        let analysis = ChatAnalysis {
            primary,
            additional: vec![child],
        };
        let text = compose_text(&analysis, &BTreeMap::new());
        assert!(text.starts_with("Understood your schema inquiry request."));
        assert!(text.ends_with("once it is ready."));
    }
}
