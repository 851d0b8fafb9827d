//! Intention types
//!
//! An intention is the structured interpretation of one user utterance.
//! Intentions reference each other only by id; the analyzer's arena owns them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Which entry point produced the intention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentionKind {
    Completion,
    Chat,
}

impl IntentionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentionKind::Completion => "completion",
            IntentionKind::Chat => "chat",
        }
    }
}

impl FromStr for IntentionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completion" => Ok(IntentionKind::Completion),
            "chat" => Ok(IntentionKind::Chat),
            other => Err(format!("unknown intention kind '{}'", other)),
        }
    }
}

/// Origin of the analysed text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Completion prompt
    Prompt,
    /// Chat message
    Message,
    /// Derived from another intention in the same turn
    Derived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentionSource {
    pub kind: SourceKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Primary intent categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryIntent {
    SqlQuery,
    DataExploration,
    SchemaInquiry,
    Clarification,
    Refinement,
    Explanation,
    SystemCommand,
}

impl PrimaryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimaryIntent::SqlQuery => "sql_query",
            PrimaryIntent::DataExploration => "data_exploration",
            PrimaryIntent::SchemaInquiry => "schema_inquiry",
            PrimaryIntent::Clarification => "clarification",
            PrimaryIntent::Refinement => "refinement",
            PrimaryIntent::Explanation => "explanation",
            PrimaryIntent::SystemCommand => "system_command",
        }
    }

    /// Intents that end in generated SQL
    pub fn is_sql_generation_like(&self) -> bool {
        matches!(self, PrimaryIntent::SqlQuery | PrimaryIntent::DataExploration)
    }
}

impl fmt::Display for PrimaryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrimaryIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sql_query" => Ok(PrimaryIntent::SqlQuery),
            "data_exploration" => Ok(PrimaryIntent::DataExploration),
            "schema_inquiry" => Ok(PrimaryIntent::SchemaInquiry),
            "clarification" => Ok(PrimaryIntent::Clarification),
            "refinement" => Ok(PrimaryIntent::Refinement),
            "explanation" => Ok(PrimaryIntent::Explanation),
            "system_command" => Ok(PrimaryIntent::SystemCommand),
            other => Err(format!("unknown primary intent '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequirements {
    pub needs_clarification: bool,
    #[serde(default)]
    pub missing_parameters: Vec<String>,
}

/// Compact record of an earlier intention, kept in session context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRecord {
    pub intention_id: String,
    pub primary_intent: PrimaryIntent,
    #[serde(default)]
    pub entities: BTreeMap<String, Vec<String>>,
    /// Unix millis
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub previous_intents: Vec<IntentRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub primary_intent: PrimaryIntent,
    #[serde(default)]
    pub sub_intents: Vec<String>,
    /// Entity type (e.g. `tables`, `fields`) to names
    #[serde(default)]
    pub entities: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    pub is_executable: bool,
    #[serde(default)]
    pub execution_requirements: ExecutionRequirements,
    #[serde(default)]
    pub conversation_state: ConversationState,
}

impl Analysis {
    /// Names recorded under an entity type, empty if absent
    pub fn entity(&self, entity_type: &str) -> &[String] {
        self.entities
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether the analysis mentions any tables or fields
    pub fn references_schema(&self) -> bool {
        !self.entity("tables").is_empty() || !self.entity("fields").is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentionStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl IntentionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentionStatus::Pending => "pending",
            IntentionStatus::Active => "active",
            IntentionStatus::Completed => "completed",
            IntentionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentionStatus::Completed | IntentionStatus::Failed)
    }

    /// pending → active → completed | failed, and pending → failed
    pub fn can_transition_to(&self, next: IntentionStatus) -> bool {
        matches!(
            (self, next),
            (IntentionStatus::Pending, IntentionStatus::Active)
                | (IntentionStatus::Pending, IntentionStatus::Failed)
                | (IntentionStatus::Active, IntentionStatus::Completed)
                | (IntentionStatus::Active, IntentionStatus::Failed)
        )
    }
}

impl FromStr for IntentionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IntentionStatus::Pending),
            "active" => Ok(IntentionStatus::Active),
            "completed" => Ok(IntentionStatus::Completed),
            "failed" => Ok(IntentionStatus::Failed),
            other => Err(format!("unknown intention status '{}'", other)),
        }
    }
}

/// Id-only adjacency to other intentions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relationships {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_intention_id: Option<String>,
    #[serde(default)]
    pub child_intention_ids: BTreeSet<String>,
    #[serde(default)]
    pub related_intention_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intention {
    pub id: String,
    pub kind: IntentionKind,
    pub source: IntentionSource,
    pub analysis: Analysis,
    pub status: IntentionStatus,
    pub relationships: Relationships,
    pub version: u32,
    /// Unix millis
    pub created_at: i64,
}

impl Intention {
    pub fn is_executable(&self) -> bool {
        self.analysis.is_executable
    }

    pub fn session_id(&self) -> Option<&str> {
        self.source.session_id.as_deref()
    }

    /// Compact record for the session's intention history
    pub fn record(&self) -> IntentRecord {
        IntentRecord {
            intention_id: self.id.clone(),
            primary_intent: self.analysis.primary_intent,
            entities: self.analysis.entities.clone(),
            timestamp: self.created_at,
        }
    }
}
