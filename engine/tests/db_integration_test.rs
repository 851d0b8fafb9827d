/// Integration tests for database module
///
/// Tests the complete database lifecycle including:
/// - Database creation and initialization
/// - WAL mode configuration
/// - Schema creation via migrations
/// - Catalog seed loading
/// - Graceful shutdown with WAL flush
use nlsql_engine::db::{CatalogSeed, Database};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nlsql.db");

    let db = Database::new(&db_path).await.unwrap();
    assert!(db_path.exists());

    // Created when WAL mode is enabled
    let wal_path = temp_dir.path().join("nlsql.db-wal");
    assert!(wal_path.exists());

    let result = sqlx::query("SELECT COUNT(*) as count FROM sessions")
        .fetch_one(db.pool())
        .await;
    assert!(result.is_ok());

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_database_schema_complete() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("nlsql.db")).await.unwrap();

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(db.pool())
            .await
            .unwrap();

    for expected in [
        "sessions",
        "session_variables",
        "chat_turns",
        "intentions",
        "execution_plans",
        "plan_tasks",
        "database_info",
        "table_info",
        "table_details",
        "query_examples",
    ] {
        assert!(
            tables.contains(&expected.to_string()),
            "{} table missing",
            expected
        );
    }

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nlsql.db");

    let db = Database::new(&db_path).await.unwrap();
    db.close().await.unwrap();

    // Reopening runs every migration again
    let db = Database::new(&db_path).await.unwrap();
    db.flush_wal().await.unwrap();
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_catalog_seed_load_and_list() {
    let temp_dir = TempDir::new().unwrap();
    let seed_path = temp_dir.path().join("catalog.json");
    std::fs::write(
        &seed_path,
        r#"{
          "databases": [{"database_name": "sales", "description": "Sales data"}],
          "tables": [
            {"database_name": "sales", "table_name": "orders", "aliases": ["purchases"]},
            {"database_name": "sales", "table_name": "customers"}
          ],
          "columns": [
            {"database_name": "sales", "table_name": "orders", "field_name": "customer_id"}
          ],
          "examples": []
        }"#,
    )
    .unwrap();

    let db = Database::new(&temp_dir.path().join("nlsql.db")).await.unwrap();
    let catalog = db.catalog();

    let seed = CatalogSeed::from_path(&seed_path).unwrap();
    let summary = catalog.load_seed(&seed).await.unwrap();
    assert_eq!(summary.databases, 1);
    assert_eq!(summary.tables, 2);
    assert_eq!(summary.columns, 1);
    assert_eq!(summary.examples, 0);

    // Loading twice upserts instead of duplicating
    catalog.load_seed(&seed).await.unwrap();

    let databases = catalog.list_databases().await.unwrap();
    assert_eq!(databases.len(), 1);

    let tables = catalog.list_tables("sales").await.unwrap();
    let names: Vec<&str> = tables.iter().map(|t| t.table_name.as_str()).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"orders"));
    assert_eq!(
        tables
            .iter()
            .find(|t| t.table_name == "orders")
            .unwrap()
            .aliases,
        vec!["purchases"]
    );

    db.close().await.unwrap();
}

#[test]
fn test_invalid_seed_is_rejected() {
    assert!(CatalogSeed::from_json_str("{\"databases\": 3}").is_err());
}
