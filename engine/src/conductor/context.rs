//! Context Enrichment Engine
//!
//! Builds a deterministic search string from an intention, runs the five
//! retrieval sub-operations concurrently and commits the results into the
//! session context as one versioned refinement.
//!
//! A single failed section is tolerated and left null, unless the
//! intention's primary intent depends on it. Two or more failed sections
//! abort enrichment.

use crate::capability::{
    bounded, heuristic::needs_database, CapabilityError, Collection, EntityInfo, KnowledgeGraph,
    Retriever, SearchFilters, SearchHit,
};
use crate::config::EnrichmentConfig;
use crate::session::SessionStore;
use sdk::errors::{EngineError, Result};
use sdk::intention::{Analysis, Intention, PrimaryIntent};
use sdk::session::{ContextMap, ContextValue, RefinedContext};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

type CapabilityResult<T> = crate::capability::Result<T>;

/// Context keys written by a refinement
pub const DATABASE_NAME_KEY: &str = "database_name";
pub const DATABASE_CONTEXT_KEY: &str = "database_context";
pub const TASK_CONTEXT_KEY: &str = "task_context";
pub const ENRICHMENT_KEY: &str = "enrichment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    DatabaseMetadata,
    TableMetadata,
    QueryExamples,
    SchemaRelationships,
    IntentionTaskRelationships,
}

impl SectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::DatabaseMetadata => "database_metadata",
            SectionKind::TableMetadata => "table_metadata",
            SectionKind::QueryExamples => "query_examples",
            SectionKind::SchemaRelationships => "schema_relationships",
            SectionKind::IntentionTaskRelationships => "intention_task_relationships",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a section's results came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub search_id: String,
    /// RFC 3339
    pub timestamp: String,
    pub intention_id: String,
}

impl Provenance {
    fn new(intention_id: &str) -> Self {
        Self {
            search_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            intention_id: intention_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section<T> {
    pub results: T,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableMetadata {
    pub tables: Vec<SearchHit>,
    pub columns: Vec<SearchHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaRelationships {
    pub summary: String,
    pub nodes: Vec<Value>,
    /// Keyed by `database.table`
    pub entities: BTreeMap<String, EntityInfo>,
}

/// Everything retrieved for one intention
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enrichment {
    pub query: String,
    pub database_name: Option<String>,
    pub database_metadata: Option<Section<Vec<SearchHit>>>,
    pub table_metadata: Option<Section<TableMetadata>>,
    pub query_examples: Option<Section<Vec<SearchHit>>>,
    pub schema_relationships: Option<Section<SchemaRelationships>>,
    pub intention_task_relationships: Option<Section<Vec<SearchHit>>>,
    pub failed_sections: Vec<SectionKind>,
}

impl Enrichment {
    /// Context patch committed by a refinement
    pub fn to_patch(&self, intention_id: &str) -> ContextMap {
        let mut patch = ContextMap::new();

        if let Some(db) = &self.database_name {
            patch.insert(DATABASE_NAME_KEY.to_string(), ContextValue::from(db.as_str()));
        }
        patch.insert(
            DATABASE_CONTEXT_KEY.to_string(),
            ContextValue::Json(json!({
                "database_name": self.database_name,
                "database_metadata": self.database_metadata,
                "table_metadata": self.table_metadata,
                "schema_relationships": self.schema_relationships,
            })),
        );
        patch.insert(
            TASK_CONTEXT_KEY.to_string(),
            ContextValue::Json(json!({
                "query_examples": self.query_examples,
                "intention_task_relationships": self.intention_task_relationships,
            })),
        );
        patch.insert(
            ENRICHMENT_KEY.to_string(),
            ContextValue::Json(json!({
                "query": self.query,
                "intention_id": intention_id,
                "failed_sections": self.failed_sections,
            })),
        );

        patch
    }
}

/// Search string for an analysis
///
/// `Intent: <primary>`, then `<type>: <a, b>` per non-empty entity type in
/// key order, then `Constraints: <a, b>`; empty sections are omitted.
pub fn build_search_query(analysis: &Analysis) -> String {
    let mut parts = vec![format!("Intent: {}", analysis.primary_intent)];

    for (entity_type, values) in &analysis.entities {
        if !values.is_empty() {
            parts.push(format!("{}: {}", entity_type, values.join(", ")));
        }
    }

    if !analysis.constraints.is_empty() {
        parts.push(format!("Constraints: {}", analysis.constraints.join(", ")));
    }

    parts.join(" ")
}

/// Section an intent cannot do without
pub fn required_section(primary: PrimaryIntent) -> Option<SectionKind> {
    match primary {
        PrimaryIntent::SqlQuery | PrimaryIntent::DataExploration => {
            Some(SectionKind::DatabaseMetadata)
        }
        PrimaryIntent::SchemaInquiry => Some(SectionKind::TableMetadata),
        _ => None,
    }
}

/// Apply the partial-failure policy to the failed sections of one run
pub fn check_failures(primary: PrimaryIntent, failed: &[(SectionKind, String)]) -> Result<()> {
    match failed {
        [] => Ok(()),
        [(section, error)] if Some(*section) == required_section(primary) => {
            Err(EngineError::EnrichmentFailed(format!(
                "{} is required for {} and failed: {}",
                section, primary, error
            )))
        }
        [_] => Ok(()),
        many => {
            let detail: Vec<String> = many
                .iter()
                .map(|(section, error)| format!("{} ({})", section, error))
                .collect();
            Err(EngineError::EnrichmentFailed(format!(
                "{} sections failed: {}",
                many.len(),
                detail.join("; ")
            )))
        }
    }
}

/// Database an intention is scoped to, from its analysis or the session
pub fn resolve_database(analysis: &Analysis, context: &ContextMap) -> Option<String> {
    analysis
        .database_name
        .clone()
        .or_else(|| {
            [DATABASE_NAME_KEY, "database"]
                .iter()
                .find_map(|key| context.get(*key).and_then(|v| v.as_str()))
                .map(str::to_string)
        })
        .filter(|name| !name.trim().is_empty())
}

pub struct ContextEngine {
    retriever: Arc<dyn Retriever>,
    graph: Arc<dyn KnowledgeGraph>,
    sessions: Arc<SessionStore>,
    config: EnrichmentConfig,
}

impl ContextEngine {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        graph: Arc<dyn KnowledgeGraph>,
        sessions: Arc<SessionStore>,
        config: EnrichmentConfig,
    ) -> Self {
        Self {
            retriever,
            graph,
            sessions,
            config,
        }
    }

    /// Enrich the session context for an intention and bump its version
    pub async fn refine_context(
        &self,
        session_id: &str,
        intention: &Intention,
    ) -> Result<RefinedContext> {
        let session = self.sessions.get(session_id).await?;
        let enrichment = self.enrich(intention, &session.context).await?;

        let refined = self
            .sessions
            .commit_refinement(session_id, &intention.id, &enrichment.to_patch(&intention.id))
            .await?;

        info!(
            session_id,
            intention_id = %intention.id,
            version = refined.version,
            failed = enrichment.failed_sections.len(),
            "Context refined"
        );
        Ok(refined)
    }

    /// Run retrieval for an intention without touching the session
    pub async fn enrich(&self, intention: &Intention, context: &ContextMap) -> Result<Enrichment> {
        let analysis = &intention.analysis;
        let query = build_search_query(analysis);
        let database_name = resolve_database(analysis, context);
        let tables = analysis.entity("tables");

        debug!(intention_id = %intention.id, query = %query, database = ?database_name, "Enriching");

        let mut failed: Vec<(SectionKind, String)> = Vec::new();
        let mut enrichment = Enrichment {
            query: query.clone(),
            database_name: database_name.clone(),
            database_metadata: None,
            table_metadata: None,
            query_examples: None,
            schema_relationships: None,
            intention_task_relationships: None,
            failed_sections: Vec::new(),
        };

        match &database_name {
            Some(db) => {
                let (databases, table_meta, examples, relationships, intentions) = futures::join!(
                    self.search_database_metadata(&query, db, &intention.id),
                    self.search_table_metadata(&query, db, tables, &intention.id),
                    self.search_query_examples(&query, db, &intention.id),
                    self.search_schema_relationships(&query, db, tables, &intention.id),
                    self.search_intention_task_relationships(&query, &intention.id),
                );

                enrichment.database_metadata =
                    keep(SectionKind::DatabaseMetadata, databases, &mut failed);
                enrichment.table_metadata =
                    keep(SectionKind::TableMetadata, table_meta, &mut failed);
                enrichment.query_examples =
                    keep(SectionKind::QueryExamples, examples, &mut failed);
                enrichment.schema_relationships =
                    keep(SectionKind::SchemaRelationships, relationships, &mut failed);
                enrichment.intention_task_relationships =
                    keep(SectionKind::IntentionTaskRelationships, intentions, &mut failed);
            }
            None if intention.is_executable() && needs_database(analysis.primary_intent) => {
                return Err(EngineError::MissingDatabaseContext {
                    intention_id: intention.id.clone(),
                    detail: format!(
                        "a {} request needs a database; set `database_name` in the context",
                        analysis.primary_intent
                    ),
                });
            }
            None => {
                let intentions = self
                    .search_intention_task_relationships(&query, &intention.id)
                    .await;
                enrichment.intention_task_relationships =
                    keep(SectionKind::IntentionTaskRelationships, intentions, &mut failed);
            }
        }

        check_failures(analysis.primary_intent, &failed)?;
        enrichment.failed_sections = failed.into_iter().map(|(section, _)| section).collect();
        Ok(enrichment)
    }

    pub async fn search_database_metadata(
        &self,
        query: &str,
        database_name: &str,
        intention_id: &str,
    ) -> CapabilityResult<Section<Vec<SearchHit>>> {
        let filters = SearchFilters::collection(Collection::Databases).in_database(database_name);
        let results = bounded(
            self.config.timeout(),
            self.retriever
                .search(query, &filters, self.config.database_limit),
        )
        .await?;

        Ok(Section {
            results,
            provenance: Provenance::new(intention_id),
        })
    }

    pub async fn search_table_metadata(
        &self,
        query: &str,
        database_name: &str,
        tables: &[String],
        intention_id: &str,
    ) -> CapabilityResult<Section<TableMetadata>> {
        let table_filters = SearchFilters::collection(Collection::Tables)
            .in_database(database_name)
            .with_tables(tables);
        let column_filters = SearchFilters::collection(Collection::Columns)
            .in_database(database_name)
            .with_tables(tables);

        let (tables, columns) = bounded(self.config.timeout(), async {
            futures::try_join!(
                self.retriever
                    .search(query, &table_filters, self.config.table_limit),
                self.retriever
                    .search(query, &column_filters, self.config.table_limit * 4),
            )
        })
        .await?;

        Ok(Section {
            results: TableMetadata { tables, columns },
            provenance: Provenance::new(intention_id),
        })
    }

    pub async fn search_query_examples(
        &self,
        query: &str,
        database_name: &str,
        intention_id: &str,
    ) -> CapabilityResult<Section<Vec<SearchHit>>> {
        let filters =
            SearchFilters::collection(Collection::QueryExamples).in_database(database_name);
        let results = bounded(
            self.config.timeout(),
            self.retriever
                .search(query, &filters, self.config.example_limit),
        )
        .await?;

        Ok(Section {
            results,
            provenance: Provenance::new(intention_id),
        })
    }

    pub async fn search_schema_relationships(
        &self,
        query: &str,
        database_name: &str,
        tables: &[String],
        intention_id: &str,
    ) -> CapabilityResult<Section<SchemaRelationships>> {
        let results = bounded(self.config.timeout(), async {
            let answer = self.graph.query(query).await?;

            let mut entities = BTreeMap::new();
            for table in tables {
                let qualified = qualify(database_name, table);
                if let Some(info) = self.graph.entity_info(&qualified).await? {
                    entities.insert(qualified, info);
                }
            }

            Ok::<_, CapabilityError>(SchemaRelationships {
                summary: answer.summary,
                nodes: answer.nodes,
                entities,
            })
        })
        .await?;

        Ok(Section {
            results,
            provenance: Provenance::new(intention_id),
        })
    }

    /// Similar earlier intentions and the tasks planned for them
    pub async fn search_intention_task_relationships(
        &self,
        query: &str,
        intention_id: &str,
    ) -> CapabilityResult<Section<Vec<SearchHit>>> {
        let filters = SearchFilters::collection(Collection::Intentions);
        let limit = self.config.example_limit;

        // One extra hit in case the intention matches itself
        let mut results = bounded(
            self.config.timeout(),
            self.retriever.search(query, &filters, limit + 1),
        )
        .await?;
        results.retain(|hit| hit.metadata["intention_id"].as_str() != Some(intention_id));
        results.truncate(limit);

        Ok(Section {
            results,
            provenance: Provenance::new(intention_id),
        })
    }
}

fn qualify(database_name: &str, table: &str) -> String {
    if table.contains('.') {
        table.to_string()
    } else {
        format!("{}.{}", database_name, table)
    }
}

fn keep<T>(
    section: SectionKind,
    outcome: CapabilityResult<Section<T>>,
    failed: &mut Vec<(SectionKind, String)>,
) -> Option<Section<T>> {
    match outcome {
        Ok(found) => Some(found),
        Err(e) => {
            warn!(section = section.as_str(), error = %e, "Retrieval section failed");
            failed.push((section, e.to_string()));
            None
        }
    }
}
