//! nlsql SDK
//!
//! Shared data model and error taxonomy for the nlsql assistant.
//! This crate is used by the engine and by any transport layer that
//! serves the response envelope.

/// Error types and handling
pub mod errors;

/// Session, context values and chat history
pub mod session;

/// Intentions and their analysis
pub mod intention;

/// Plans and tasks
pub mod plan;

/// Response envelope
pub mod response;

// Re-export commonly used types
pub use errors::{EngineError, EngineErrorExt, EntityKind, ErrorKind, Result, Stage};
pub use intention::{
    Analysis, ConversationState, ExecutionRequirements, IntentRecord, Intention, IntentionKind,
    IntentionSource, IntentionStatus, PrimaryIntent, Relationships, SourceKind,
};
pub use plan::{Plan, PlanMetadata, PlanStatus, Task, TaskStatus, TaskType};
pub use response::{
    IntentionDigest, IntentionSummary, PlanSummary, Response, ResponseData, ResponseMetadata,
    TaskSummary,
};
pub use session::{
    context_from_json, context_to_json, ChatTurn, ContextMap, ContextValue, RefinedContext,
    Session,
};
