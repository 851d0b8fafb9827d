//! Response envelope
//!
//! Shape served to transport layers for both completion and chat turns.
//! A streaming transport emits one envelope per turn.

use crate::intention::{Intention, IntentionStatus, PrimaryIntent};
use crate::plan::{Plan, PlanStatus, TaskStatus, TaskType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Condensed view of an intention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentionDigest {
    pub id: String,
    pub primary_intent: PrimaryIntent,
    pub is_executable: bool,
    pub status: IntentionStatus,
    #[serde(default)]
    pub entities: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub missing_parameters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_intention_id: Option<String>,
}

impl From<&Intention> for IntentionDigest {
    fn from(intention: &Intention) -> Self {
        Self {
            id: intention.id.clone(),
            primary_intent: intention.analysis.primary_intent,
            is_executable: intention.analysis.is_executable,
            status: intention.status,
            entities: intention.analysis.entities.clone(),
            missing_parameters: intention
                .analysis
                .execution_requirements
                .missing_parameters
                .clone(),
            parent_intention_id: intention.relationships.parent_intention_id.clone(),
        }
    }
}

/// Primary intention of the turn plus any derived ones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentionSummary {
    pub primary: IntentionDigest,
    #[serde(default)]
    pub additional: Vec<IntentionDigest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub plan_id: String,
    pub status: PlanStatus,
    pub tasks: Vec<TaskSummary>,
}

impl From<&Plan> for PlanSummary {
    fn from(plan: &Plan) -> Self {
        Self {
            plan_id: plan.plan_id.clone(),
            status: plan.status,
            tasks: plan
                .tasks
                .iter()
                .map(|t| TaskSummary {
                    task_id: t.task_id.clone(),
                    task_type: t.task_type,
                    status: t.status,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    /// Classifier model that analysed the turn
    pub model: String,
    pub intention: IntentionSummary,
    /// Refined context produced by enrichment
    pub context: Value,
    /// Keyed by intention id
    pub plans: BTreeMap<String, PlanSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// RFC 3339
    pub timestamp: String,
    pub request_id: String,
    pub session_id: String,
    pub is_new_session: bool,
    pub intention_id: String,
    pub plan_ids: Vec<String>,
    pub context_version: u64,
    pub total_intentions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    pub data: ResponseData,
    /// Echo of the caller-supplied context
    pub context: Value,
    pub metadata: ResponseMetadata,
}

impl Response {
    /// Plan created for the given intention, if any
    pub fn plan_for(&self, intention_id: &str) -> Option<&PlanSummary> {
        self.data.plans.get(intention_id)
    }
}
