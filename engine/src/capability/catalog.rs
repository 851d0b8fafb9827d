//! Catalog-backed retrieval and relationship graph
//!
//! Keyword-overlap ranking over the semantic layer tables, and a schema
//! graph whose edges are inferred from `<table>_id` style foreign-key
//! columns. Past intentions are searchable alongside the catalog so the
//! enrichment engine can surface similar earlier requests.

use super::{
    terms, CapabilityError, Collection, EntityInfo, GraphAnswer, KnowledgeGraph, Result,
    Retriever, SearchFilters, SearchHit,
};
use crate::db::{CatalogRepository, ColumnInfo, Database, IntentionRepository, PlanRepository, TableInfo};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// Past intentions scanned per intention search
const INTENTION_SCAN: i64 = 200;

fn backend(err: sdk::errors::EngineError) -> CapabilityError {
    CapabilityError::Backend(err.to_string())
}

/// Fraction of query terms present in the document, 0.0 to 1.0
fn overlap(query_terms: &BTreeSet<String>, document: &str) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let doc_terms: BTreeSet<String> = terms(document).into_iter().collect();
    let shared = query_terms.intersection(&doc_terms).count();
    shared as f64 / query_terms.len() as f64
}

fn rank(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.text.cmp(&b.text))
    });
    hits.truncate(limit);
    hits
}

pub struct CatalogRetriever {
    catalog: CatalogRepository,
    intentions: IntentionRepository,
    plans: PlanRepository,
}

impl CatalogRetriever {
    pub fn new(db: &Database) -> Self {
        Self {
            catalog: db.catalog(),
            intentions: db.intentions(),
            plans: db.plans(),
        }
    }

    async fn tables_in_scope(&self, filters: &SearchFilters) -> Result<Vec<TableInfo>> {
        match &filters.database_name {
            Some(db) => self.catalog.list_tables(db).await.map_err(backend),
            None => {
                let mut tables = Vec::new();
                for db in self.catalog.list_databases().await.map_err(backend)? {
                    tables.extend(
                        self.catalog
                            .list_tables(&db.database_name)
                            .await
                            .map_err(backend)?,
                    );
                }
                Ok(tables)
            }
        }
    }

    async fn search_databases(
        &self,
        query_terms: &BTreeSet<String>,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let databases = self.catalog.list_databases().await.map_err(backend)?;

        Ok(databases
            .into_iter()
            .filter_map(|db| {
                let document = format!(
                    "{} {} {} {}",
                    db.database_name,
                    db.aliases.join(" "),
                    db.description,
                    db.keywords.join(" ")
                );
                let named = filters.database_name.as_deref() == Some(db.database_name.as_str());
                let score = overlap(query_terms, &document) + if named { 1.0 } else { 0.0 };
                (score > 0.0).then(|| SearchHit {
                    text: db.description.clone(),
                    metadata: json!({
                        "database_name": db.database_name,
                        "aliases": db.aliases,
                        "keywords": db.keywords,
                    }),
                    score,
                })
            })
            .collect())
    }

    async fn search_tables(
        &self,
        query_terms: &BTreeSet<String>,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let tables = self.tables_in_scope(filters).await?;

        Ok(tables
            .into_iter()
            .filter_map(|t| {
                let document = format!(
                    "{} {} {} {}",
                    t.table_name,
                    t.aliases.join(" "),
                    t.description,
                    t.keywords.join(" ")
                );
                let named = filters.table_names.contains(&t.table_name);
                let score = overlap(query_terms, &document) + if named { 1.0 } else { 0.0 };
                (score > 0.0).then(|| SearchHit {
                    text: t.description.clone(),
                    metadata: json!({
                        "database_name": t.database_name,
                        "table_name": t.table_name,
                        "ddl": t.ddl,
                    }),
                    score,
                })
            })
            .collect())
    }

    async fn search_columns(
        &self,
        query_terms: &BTreeSet<String>,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();

        for table in self.tables_in_scope(filters).await? {
            if !filters.table_names.is_empty() && !filters.table_names.contains(&table.table_name)
            {
                continue;
            }

            let columns = self
                .catalog
                .list_columns(&table.database_name, &table.table_name)
                .await
                .map_err(backend)?;

            for column in columns {
                let document = format!(
                    "{} {} {} {}",
                    column.field_name,
                    column.aliases.join(" "),
                    column.description,
                    column.keywords.join(" ")
                );
                // Columns of explicitly named tables are always relevant
                let score = overlap(query_terms, &document)
                    + if filters.table_names.is_empty() { 0.0 } else { 0.5 };
                if score > 0.0 {
                    hits.push(SearchHit {
                        text: column.description.clone(),
                        metadata: json!({
                            "database_name": column.database_name,
                            "table_name": column.table_name,
                            "field_name": column.field_name,
                            "data_type": column.data_type,
                        }),
                        score,
                    });
                }
            }
        }

        Ok(hits)
    }

    async fn search_examples(
        &self,
        query_terms: &BTreeSet<String>,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let database_names = match &filters.database_name {
            Some(db) => vec![db.clone()],
            None => self
                .catalog
                .list_databases()
                .await
                .map_err(backend)?
                .into_iter()
                .map(|d| d.database_name)
                .collect(),
        };

        let mut hits = Vec::new();
        for db in database_names {
            for example in self.catalog.list_examples(&db).await.map_err(backend)? {
                let document = format!(
                    "{} {} {}",
                    example.query,
                    example.description,
                    example.keywords.join(" ")
                );
                let score = overlap(query_terms, &document);
                if score > 0.0 {
                    hits.push(SearchHit {
                        text: example.query.clone(),
                        metadata: json!({
                            "database_name": example.database_name,
                            "description": example.description,
                        }),
                        score,
                    });
                }
            }
        }

        Ok(hits)
    }

    async fn search_intentions(&self, query_terms: &BTreeSet<String>) -> Result<Vec<SearchHit>> {
        let recent = self
            .intentions
            .recent(INTENTION_SCAN)
            .await
            .map_err(backend)?;

        let mut hits = Vec::new();
        for intention in recent {
            let entity_names: Vec<&str> = intention
                .analysis
                .entities
                .values()
                .flatten()
                .map(String::as_str)
                .collect();
            let document = format!(
                "{} {} {}",
                intention.source.content,
                intention.analysis.primary_intent,
                entity_names.join(" ")
            );
            let score = overlap(query_terms, &document);
            if score <= 0.0 {
                continue;
            }

            let task_types: Vec<String> = self
                .plans
                .for_intention(&intention.id)
                .await
                .map_err(backend)?
                .iter()
                .flat_map(|p| p.tasks.iter().map(|t| t.task_type.as_str().to_string()))
                .collect();

            hits.push(SearchHit {
                text: intention.source.content.clone(),
                metadata: json!({
                    "intention_id": intention.id,
                    "session_id": intention.source.session_id,
                    "primary_intent": intention.analysis.primary_intent,
                    "status": intention.status.as_str(),
                    "task_types": task_types,
                }),
                score,
            });
        }

        Ok(hits)
    }
}

#[async_trait]
impl Retriever for CatalogRetriever {
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let query_terms: BTreeSet<String> = terms(query).into_iter().collect();

        let hits = match filters.collection {
            Collection::Databases => self.search_databases(&query_terms, filters).await?,
            Collection::Tables => self.search_tables(&query_terms, filters).await?,
            Collection::Columns => self.search_columns(&query_terms, filters).await?,
            Collection::QueryExamples => self.search_examples(&query_terms, filters).await?,
            Collection::Intentions => self.search_intentions(&query_terms).await?,
        };

        Ok(rank(hits, limit))
    }
}

/// Schema relationship graph derived from the catalog
pub struct CatalogGraph {
    catalog: CatalogRepository,
}

impl CatalogGraph {
    pub fn new(db: &Database) -> Self {
        Self {
            catalog: db.catalog(),
        }
    }

    /// Foreign-key style edges from `table` to the other tables of its database
    async fn edges(&self, table: &TableInfo) -> Result<Vec<Value>> {
        let columns = self
            .catalog
            .list_columns(&table.database_name, &table.table_name)
            .await
            .map_err(backend)?;
        let siblings = self
            .catalog
            .list_tables(&table.database_name)
            .await
            .map_err(backend)?;

        let mut edges = Vec::new();
        for other in siblings.iter().filter(|t| t.table_name != table.table_name) {
            if let Some(via) = join_column(&columns, &other.table_name) {
                edges.push(json!({
                    "source": table.table_name,
                    "target": other.table_name,
                    "via": via,
                }));
            }
        }

        Ok(edges)
    }
}

fn singular(name: &str) -> &str {
    name.strip_suffix('s').unwrap_or(name)
}

/// Column of `columns` referencing `target` by the `<singular>_id` convention
fn join_column(columns: &[ColumnInfo], target: &str) -> Option<String> {
    let conventional = format!("{}_id", singular(target));

    columns
        .iter()
        .find(|c| c.field_name == conventional)
        .map(|c| c.field_name.clone())
}

#[async_trait]
impl KnowledgeGraph for CatalogGraph {
    async fn query(&self, nl_query: &str) -> Result<GraphAnswer> {
        let query_terms: BTreeSet<String> = terms(nl_query).into_iter().collect();

        let mut nodes = Vec::new();
        let mut summary = Vec::new();

        for db in self.catalog.list_databases().await.map_err(backend)? {
            for table in self
                .catalog
                .list_tables(&db.database_name)
                .await
                .map_err(backend)?
            {
                if !query_terms.contains(&table.table_name.to_lowercase()) {
                    continue;
                }

                let edges = self.edges(&table).await?;
                for edge in &edges {
                    summary.push(format!(
                        "{} references {} via {}",
                        edge["source"].as_str().unwrap_or_default(),
                        edge["target"].as_str().unwrap_or_default(),
                        edge["via"].as_str().unwrap_or_default()
                    ));
                }

                nodes.push(json!({
                    "database_name": table.database_name,
                    "table_name": table.table_name,
                    "relationships": edges,
                }));
            }
        }

        let summary = if summary.is_empty() {
            format!("{} matching tables, no relationships found", nodes.len())
        } else {
            summary.join("; ")
        };

        Ok(GraphAnswer { summary, nodes })
    }

    async fn entity_info(&self, name: &str) -> Result<Option<EntityInfo>> {
        let (database, table_name) = match name.split_once('.') {
            Some((db, table)) => (Some(db), table),
            None => (None, name),
        };

        let mut candidates = self.catalog.find_tables(table_name).await.map_err(backend)?;
        if let Some(db) = database {
            candidates.retain(|t| t.database_name == db);
        }

        if let Some(table) = candidates.first() {
            let relationships = self.edges(table).await?;
            return Ok(Some(EntityInfo {
                metadata: json!({
                    "kind": "table",
                    "database_name": table.database_name,
                    "table_name": table.table_name,
                    "description": table.description,
                    "ddl": table.ddl,
                }),
                relationships,
            }));
        }

        if database.is_none() {
            if let Some(db) = self.catalog.get_database(name).await.map_err(backend)? {
                let tables = self.catalog.list_tables(name).await.map_err(backend)?;
                return Ok(Some(EntityInfo {
                    metadata: json!({
                        "kind": "database",
                        "database_name": db.database_name,
                        "description": db.description,
                    }),
                    relationships: tables
                        .iter()
                        .map(|t| json!({"source": name, "target": t.table_name, "via": "contains"}))
                        .collect(),
                }));
            }
        }

        Ok(None)
    }
}
