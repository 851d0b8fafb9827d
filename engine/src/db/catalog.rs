/// Semantic layer catalog
///
/// Searchable metadata about databases, tables, columns and example
/// queries. Rows are upserted by natural key; aliases and keywords are
/// stored as JSON string arrays.
use super::{from_json_column, to_json_column, DbResultExt};
use sdk::errors::Result;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub database_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub database_name: String,
    pub table_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ddl: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub database_name: String,
    pub table_name: String,
    pub field_name: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExample {
    pub database_name: String,
    pub query: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// JSON document accepted by `nlsql catalog load`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub databases: Vec<DatabaseInfo>,
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub examples: Vec<QueryExample>,
}

impl CatalogSeed {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            sdk::errors::EngineError::InvalidRequest(format!("Invalid catalog seed: {}", e))
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Row counts written by a seed load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub databases: usize,
    pub tables: usize,
    pub columns: usize,
    pub examples: usize,
}

/// Catalog repository for database operations
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert_database(&self, info: &DatabaseInfo) -> Result<()> {
        sqlx::query(
            "INSERT INTO database_info (database_name, aliases, description, keywords)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(database_name) DO UPDATE SET
                aliases = excluded.aliases,
                description = excluded.description,
                keywords = excluded.keywords",
        )
        .bind(&info.database_name)
        .bind(to_json_column(&info.aliases, "aliases")?)
        .bind(&info.description)
        .bind(to_json_column(&info.keywords, "keywords")?)
        .execute(&self.pool)
        .await
        .db_context("Failed to upsert database info")?;

        Ok(())
    }

    pub async fn upsert_table(&self, info: &TableInfo) -> Result<()> {
        sqlx::query(
            "INSERT INTO table_info (database_name, table_name, aliases, description, ddl, keywords)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(database_name, table_name) DO UPDATE SET
                aliases = excluded.aliases,
                description = excluded.description,
                ddl = excluded.ddl,
                keywords = excluded.keywords",
        )
        .bind(&info.database_name)
        .bind(&info.table_name)
        .bind(to_json_column(&info.aliases, "aliases")?)
        .bind(&info.description)
        .bind(info.ddl.as_deref())
        .bind(to_json_column(&info.keywords, "keywords")?)
        .execute(&self.pool)
        .await
        .db_context("Failed to upsert table info")?;

        Ok(())
    }

    pub async fn upsert_column(&self, info: &ColumnInfo) -> Result<()> {
        sqlx::query(
            "INSERT INTO table_details (database_name, table_name, field_name, data_type, aliases,
                                        description, keywords)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(database_name, table_name, field_name) DO UPDATE SET
                data_type = excluded.data_type,
                aliases = excluded.aliases,
                description = excluded.description,
                keywords = excluded.keywords",
        )
        .bind(&info.database_name)
        .bind(&info.table_name)
        .bind(&info.field_name)
        .bind(&info.data_type)
        .bind(to_json_column(&info.aliases, "aliases")?)
        .bind(&info.description)
        .bind(to_json_column(&info.keywords, "keywords")?)
        .execute(&self.pool)
        .await
        .db_context("Failed to upsert column info")?;

        Ok(())
    }

    pub async fn upsert_example(&self, example: &QueryExample) -> Result<()> {
        sqlx::query(
            "INSERT INTO query_examples (database_name, query, description, keywords)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(database_name, query) DO UPDATE SET
                description = excluded.description,
                keywords = excluded.keywords",
        )
        .bind(&example.database_name)
        .bind(&example.query)
        .bind(&example.description)
        .bind(to_json_column(&example.keywords, "keywords")?)
        .execute(&self.pool)
        .await
        .db_context("Failed to upsert query example")?;

        Ok(())
    }

    /// Upsert every entry of a seed document, parents before children
    pub async fn load_seed(&self, seed: &CatalogSeed) -> Result<SeedSummary> {
        for info in &seed.databases {
            self.upsert_database(info).await?;
        }
        for info in &seed.tables {
            self.upsert_table(info).await?;
        }
        for info in &seed.columns {
            self.upsert_column(info).await?;
        }
        for example in &seed.examples {
            self.upsert_example(example).await?;
        }

        let summary = SeedSummary {
            databases: seed.databases.len(),
            tables: seed.tables.len(),
            columns: seed.columns.len(),
            examples: seed.examples.len(),
        };
        info!(?summary, "Catalog seed loaded");

        Ok(summary)
    }

    pub async fn list_databases(&self) -> Result<Vec<DatabaseInfo>> {
        let rows = sqlx::query(
            "SELECT database_name, aliases, description, keywords
             FROM database_info ORDER BY database_name",
        )
        .fetch_all(&self.pool)
        .await
        .db_context("Failed to list databases")?;

        rows.iter().map(decode_database).collect()
    }

    pub async fn get_database(&self, database_name: &str) -> Result<Option<DatabaseInfo>> {
        let row = sqlx::query(
            "SELECT database_name, aliases, description, keywords
             FROM database_info WHERE database_name = ?",
        )
        .bind(database_name)
        .fetch_optional(&self.pool)
        .await
        .db_context("Failed to fetch database info")?;

        row.as_ref().map(decode_database).transpose()
    }

    pub async fn list_tables(&self, database_name: &str) -> Result<Vec<TableInfo>> {
        let rows = sqlx::query(
            "SELECT database_name, table_name, aliases, description, ddl, keywords
             FROM table_info WHERE database_name = ? ORDER BY table_name",
        )
        .bind(database_name)
        .fetch_all(&self.pool)
        .await
        .db_context("Failed to list tables")?;

        rows.iter().map(decode_table).collect()
    }

    /// Tables with the given name in any database
    pub async fn find_tables(&self, table_name: &str) -> Result<Vec<TableInfo>> {
        let rows = sqlx::query(
            "SELECT database_name, table_name, aliases, description, ddl, keywords
             FROM table_info WHERE table_name = ? ORDER BY database_name",
        )
        .bind(table_name)
        .fetch_all(&self.pool)
        .await
        .db_context("Failed to find tables")?;

        rows.iter().map(decode_table).collect()
    }

    pub async fn list_columns(&self, database_name: &str, table_name: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(
            "SELECT database_name, table_name, field_name, data_type, aliases, description, keywords
             FROM table_details WHERE database_name = ? AND table_name = ? ORDER BY field_name",
        )
        .bind(database_name)
        .bind(table_name)
        .fetch_all(&self.pool)
        .await
        .db_context("Failed to list columns")?;

        rows.iter().map(decode_column).collect()
    }

    pub async fn list_examples(&self, database_name: &str) -> Result<Vec<QueryExample>> {
        let rows = sqlx::query(
            "SELECT database_name, query, description, keywords
             FROM query_examples WHERE database_name = ? ORDER BY query",
        )
        .bind(database_name)
        .fetch_all(&self.pool)
        .await
        .db_context("Failed to list query examples")?;

        rows.iter().map(decode_example).collect()
    }
}

fn string_list(row: &SqliteRow, column: &str) -> Result<Vec<String>> {
    let raw: String = row.get(column);
    from_json_column(&raw, column)
}

fn decode_database(row: &SqliteRow) -> Result<DatabaseInfo> {
    Ok(DatabaseInfo {
        database_name: row.get("database_name"),
        aliases: string_list(row, "aliases")?,
        description: row.get("description"),
        keywords: string_list(row, "keywords")?,
    })
}

fn decode_table(row: &SqliteRow) -> Result<TableInfo> {
    Ok(TableInfo {
        database_name: row.get("database_name"),
        table_name: row.get("table_name"),
        aliases: string_list(row, "aliases")?,
        description: row.get("description"),
        ddl: row.get("ddl"),
        keywords: string_list(row, "keywords")?,
    })
}

fn decode_column(row: &SqliteRow) -> Result<ColumnInfo> {
    Ok(ColumnInfo {
        database_name: row.get("database_name"),
        table_name: row.get("table_name"),
        field_name: row.get("field_name"),
        data_type: row.get("data_type"),
        aliases: string_list(row, "aliases")?,
        description: row.get("description"),
        keywords: string_list(row, "keywords")?,
    })
}

fn decode_example(row: &SqliteRow) -> Result<QueryExample> {
    Ok(QueryExample {
        database_name: row.get("database_name"),
        query: row.get("query"),
        description: row.get("description"),
        keywords: string_list(row, "keywords")?,
    })
}
