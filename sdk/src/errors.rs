//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the nlsql engine.
//! Every pipeline stage returns an explicit `Result<T, EngineError>`; the
//! orchestrator wraps lower-layer failures in [`EngineError::Stage`] to attach
//! the stage name and the session/intention ids, but never replaces them.
//!
//! Transport layers map [`ErrorKind`] onto their own status codes
//! (`NotFound` → 404, `InvalidRequest` → 400, everything else → 500).
//!
//! # Examples
//!
//! ```
//! use sdk::errors::{EngineError, EngineErrorExt, EntityKind, ErrorKind, Stage};
//!
//! let error = EngineError::not_found(EntityKind::Session, "abc");
//! assert_eq!(error.kind(), ErrorKind::NotFound);
//!
//! let wrapped = error.in_stage(Stage::Session, Some("abc".to_string()), None);
//! assert_eq!(wrapped.kind(), ErrorKind::NotFound);
//! assert!(wrapped.is_recoverable());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Trait for engine error extensions
///
/// Provides user-facing hints and retry guidance for every error.
pub trait EngineErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint never contains ids, queries or internal details.
    fn user_hint(&self) -> &str;

    /// Returns whether retrying the whole turn is safe and may succeed
    fn is_recoverable(&self) -> bool;
}

/// Kinds of entities addressed by id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Session,
    Intention,
    Plan,
    Task,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Session => write!(f, "Session"),
            EntityKind::Intention => write!(f, "Intention"),
            EntityKind::Plan => write!(f, "Plan"),
            EntityKind::Task => write!(f, "Task"),
        }
    }
}

/// Pipeline stages of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Resolving or creating the session
    Session,
    /// Intention analysis
    Analysis,
    /// Context enrichment
    Enrichment,
    /// Task planning
    Planning,
    /// Writing the turn back to the session
    Persistence,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Session => write!(f, "session"),
            Stage::Analysis => write!(f, "analysis"),
            Stage::Enrichment => write!(f, "enrichment"),
            Stage::Planning => write!(f, "planning"),
            Stage::Persistence => write!(f, "persistence"),
        }
    }
}

/// Error taxonomy exposed to the transport boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    AnalysisFailed,
    EnrichmentFailed,
    PlanningFailed,
    Cancelled,
    Internal,
}

/// Main engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing database context for intention {intention_id}: {detail}")]
    MissingDatabaseContext { intention_id: String, detail: String },

    // Lookup errors (absent and inactive are reported identically)
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    // Collaborator errors
    #[error("Intention analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Context enrichment failed: {0}")]
    EnrichmentFailed(String),

    #[error("Planning failed: {0}")]
    PlanningFailed(String),

    // Turn control
    #[error("Turn cancelled before the {stage} stage")]
    Cancelled { stage: Stage },

    // Stage context added by the orchestrator
    #[error(
        "{stage} stage failed (session {}, intention {}): {source}",
        .session_id.as_deref().unwrap_or("-"),
        .intention_id.as_deref().unwrap_or("-")
    )]
    Stage {
        stage: Stage,
        session_id: Option<String>,
        intention_id: Option<String>,
        #[source]
        source: Box<EngineError>,
    },

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Shorthand for a `NotFound` error
    pub fn not_found(entity: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Wrap this error with the stage and ids it occurred under
    pub fn in_stage(
        self,
        stage: Stage,
        session_id: Option<String>,
        intention_id: Option<String>,
    ) -> Self {
        Self::Stage {
            stage,
            session_id,
            intention_id,
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through stage wrappers
    pub fn root(&self) -> &EngineError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// The outermost stage this error was reported under, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            Self::Cancelled { stage } => Some(*stage),
            _ => None,
        }
    }

    /// Classify the error into the boundary taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::InvalidRequest(_) | Self::MissingDatabaseContext { .. } => {
                ErrorKind::InvalidRequest
            }
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AnalysisFailed(_) => ErrorKind::AnalysisFailed,
            Self::EnrichmentFailed(_) => ErrorKind::EnrichmentFailed,
            Self::PlanningFailed(_) => ErrorKind::PlanningFailed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Database(_) | Self::Config(_) | Self::Io(_) | Self::Stage { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether this is a `NotFound` for the given entity kind
    pub fn is_not_found(&self, kind: EntityKind) -> bool {
        matches!(self.root(), Self::NotFound { entity, .. } if *entity == kind)
    }
}

impl EngineErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self.root() {
            // Request errors
            Self::InvalidRequest(_) => "The request is malformed. Check the input and try again",
            Self::MissingDatabaseContext { .. } => {
                "Tell me which database to use, e.g. set `database_name` in the context"
            }

            // Lookup errors
            Self::NotFound {
                entity: EntityKind::Session,
                ..
            } => "Session not found or expired. Start a new session",
            Self::NotFound { .. } => "The requested item does not exist",

            // Collaborator errors
            Self::AnalysisFailed(_) => "Could not understand the request. Try again",
            Self::EnrichmentFailed(_) => "Could not gather schema context. Try again",
            Self::PlanningFailed(_) => "Could not plan the request. Try again",

            // Turn control
            Self::Cancelled { .. } => "The request was cancelled",

            // Infrastructure errors
            Self::Database(_) => "Storage operation failed. Try again later",
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Io(_) => "File system operation failed",

            Self::Stage { .. } => "Internal error",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self.root() {
            // Retrying the same input cannot succeed
            Self::InvalidRequest(_) | Self::MissingDatabaseContext { .. } | Self::Config(_) => {
                false
            }

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_database_is_invalid_request() {
        let error = EngineError::MissingDatabaseContext {
            intention_id: "i-1".to_string(),
            detail: "no database_name".to_string(),
        };
        assert_eq!(error.kind(), ErrorKind::InvalidRequest);
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_stage_wrapper_preserves_kind() {
        let error = EngineError::EnrichmentFailed("search down".to_string()).in_stage(
            Stage::Enrichment,
            Some("s-1".to_string()),
            Some("i-1".to_string()),
        );

        assert_eq!(error.kind(), ErrorKind::EnrichmentFailed);
        assert_eq!(error.stage(), Some(Stage::Enrichment));

        let message = error.to_string();
        assert!(message.contains("enrichment stage failed"));
        assert!(message.contains("s-1"));
        assert!(message.contains("search down"));
    }

    #[test]
    fn test_nested_stage_root() {
        let error = EngineError::not_found(EntityKind::Task, "t-9")
            .in_stage(Stage::Planning, None, None)
            .in_stage(Stage::Persistence, None, None);

        assert!(error.is_not_found(EntityKind::Task));
        assert!(!error.is_not_found(EntityKind::Session));
        assert_eq!(error.stage(), Some(Stage::Persistence));
    }

    #[test]
    fn test_session_hint() {
        let error = EngineError::not_found(EntityKind::Session, "gone");
        assert!(error.user_hint().contains("Session not found"));
        assert!(!error.user_hint().contains("gone"));
    }
}
