//! Collaborator capabilities
//!
//! The pipeline consumes three external collaborators through traits:
//! a [`Classifier`] that turns text into a structured classification, a
//! [`Retriever`] that ranks catalog metadata for a search string, and a
//! [`KnowledgeGraph`] that answers relationship questions. Real model or
//! vector-search backends plug in behind these traits; the defaults in
//! this module are deterministic and run over the local catalog.

use async_trait::async_trait;
use sdk::intention::{IntentRecord, PrimaryIntent};
use sdk::session::ContextMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

pub mod catalog;
pub mod factory;
pub mod heuristic;

pub use catalog::{CatalogGraph, CatalogRetriever};
pub use factory::ClientFactory;
pub use heuristic::HeuristicClassifier;

/// Result type for capability calls
pub type Result<T> = std::result::Result<T, CapabilityError>;

/// Errors that can occur while calling a collaborator
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unusable response: {0}")]
    ParseError(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Input to a classification call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub text: String,
    pub context: ContextMap,
    /// Earlier intentions of the conversation; empty for completions
    #[serde(default)]
    pub intention_history: Vec<IntentRecord>,
}

/// Structured classification of one utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub primary_intent: PrimaryIntent,
    #[serde(default)]
    pub sub_intents: Vec<String>,
    #[serde(default)]
    pub entities: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub database_name: Option<String>,
    pub is_executable: bool,
    #[serde(default)]
    pub missing_parameters: Vec<String>,
}

/// One ranked retrieval result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub metadata: Value,
    pub score: f64,
}

/// Collections a retriever can search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Databases,
    Tables,
    Columns,
    QueryExamples,
    Intentions,
}

/// Filters narrowing a retrieval call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub collection: Collection,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub table_names: Vec<String>,
}

impl SearchFilters {
    pub fn collection(collection: Collection) -> Self {
        Self {
            collection,
            database_name: None,
            table_names: Vec::new(),
        }
    }

    pub fn in_database(mut self, database_name: impl Into<String>) -> Self {
        self.database_name = Some(database_name.into());
        self
    }

    pub fn with_tables(mut self, tables: &[String]) -> Self {
        self.table_names = tables.to_vec();
        self
    }
}

/// Answer to a natural-language graph query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphAnswer {
    pub summary: String,
    pub nodes: Vec<Value>,
}

/// Metadata and edges of one graph entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub metadata: Value,
    pub relationships: Vec<Value>,
}

/// Classification capability
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Model name reported in responses
    fn model(&self) -> &str;

    async fn classify(&self, request: &ClassifyRequest) -> Result<Classification>;
}

/// Retrieval capability
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, filters: &SearchFilters, limit: usize)
        -> Result<Vec<SearchHit>>;
}

/// Knowledge-graph capability
#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    async fn query(&self, nl_query: &str) -> Result<GraphAnswer>;

    async fn entity_info(&self, name: &str) -> Result<Option<EntityInfo>>;
}

/// Run a collaborator call with an upper bound on its latency
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CapabilityError::Timeout(limit)),
    }
}

/// Lowercased alphanumeric terms of a text, used for keyword matching
pub(crate) fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}
