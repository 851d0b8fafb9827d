//! Conductor System
//!
//! The turn pipeline: intention analysis, context enrichment, planning and
//! the assistant that orchestrates them over a session.

pub mod assistant;
pub mod cancel;
pub mod context;
pub mod intention;
pub mod planner;
pub mod response;

pub use assistant::{Assistant, Capabilities};
pub use cancel::CancellationToken;
pub use context::{build_search_query, ContextEngine, Enrichment, SectionKind};
pub use intention::{ChatAnalysis, IntentionAnalyzer};
pub use planner::{build_plan, Planner};
