use std::sync::Arc;

use shapesync_core::{ChangeEvent, Value, row};
use shapesync_engine::{EngineError, SubscriptionError, SyncConfig, SyncPhase, SyncRegistry, TableSyncConfig};
use shapesync_harness::server::TEST_BASE_URL;
use shapesync_harness::{TestReplica, init_tracing, todo_insert};
use shapesync_storage::{Database, SqliteDatabase, StorageError};

const CREATED_AT: &str = "2024-08-06T12:00:00Z";
const LISTS_DDL: &str = "CREATE TABLE lists (id TEXT PRIMARY KEY NOT NULL, name TEXT)";

fn list_insert(id: &str, name: &str) -> ChangeEvent {
    ChangeEvent::insert(row([("id", id), ("name", name)]))
}

fn two_table_config() -> SyncConfig {
    SyncConfig {
        base_url: TEST_BASE_URL.to_string(),
        ..SyncConfig::default()
    }
    .with_table(TestReplica::todos_config())
    .with_table(TableSyncConfig::new("lists", &["id"]))
}

fn list_count(replica: &TestReplica) -> Result<i64, StorageError> {
    let row = replica.db.query_one("SELECT COUNT(*) AS n FROM lists", &[])?;
    Ok(row.and_then(|r| r["n"].as_integer()).unwrap_or(0))
}

// ============================================================================
// Startup and shutdown
// ============================================================================

#[tokio::test]
async fn starts_and_stops_every_table() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let replica = TestReplica::new()?;
    replica.db.execute_batch(LISTS_DDL)?;
    replica
        .server
        .push_batch("todos", vec![todo_insert("t1", "a", false, CREATED_AT)]);
    replica
        .server
        .push_batch("lists", vec![list_insert("l1", "groceries")]);

    let registry = SyncRegistry::start(
        replica.database(),
        Arc::new(replica.server.clone()),
        &two_table_config(),
    )
    .await?;
    assert!(registry.start_failures().is_empty());
    assert_eq!(registry.tables().count(), 2);

    registry.wait_up_to_date().await?;
    assert_eq!(replica.todo_count()?, 1);
    assert_eq!(list_count(&replica)?, 1);
    assert!(replica.cursor("lists")?.is_some());

    let outcomes = registry.stop().await;
    assert_eq!(outcomes.len(), 2);
    for (table, outcome) in outcomes {
        assert!(outcome.is_ok(), "{table} ended with {outcome:?}");
        assert_eq!(replica.server.released(&table), 1);
    }
    Ok(())
}

#[tokio::test]
async fn unsupported_schema_version_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let db = SqliteDatabase::open_in_memory()?;
    db.execute_batch(
        "CREATE TABLE _shapesync_meta (version INTEGER NOT NULL);
         INSERT INTO _shapesync_meta (version) VALUES (99);",
    )?;
    let replica = TestReplica::new()?;

    let result = SyncRegistry::start(
        Arc::new(db),
        Arc::new(replica.server.clone()),
        &two_table_config(),
    )
    .await;

    match result {
        Err(EngineError::Storage(StorageError::UnsupportedSchemaVersion { found, expected })) => {
            assert_eq!(found, 99);
            assert_eq!(expected, 1);
        }
        Err(other) => panic!("expected schema version error, got {other}"),
        Ok(_) => panic!("expected schema version error"),
    }
    assert!(replica.server.subscriptions("todos").is_empty());
    Ok(())
}

#[tokio::test]
async fn duplicate_tables_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let replica = TestReplica::new()?;
    let config = SyncConfig::default()
        .with_table(TableSyncConfig::new("todos", &["id"]))
        .with_table(TableSyncConfig::new("todos", &["id"]));

    let result = SyncRegistry::start(replica.database(), Arc::new(replica.server.clone()), &config).await;
    assert!(matches!(result, Err(EngineError::Config(_))));
    Ok(())
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn start_failure_is_recorded_and_others_run() -> Result<(), Box<dyn std::error::Error>> {
    let replica = TestReplica::new()?;
    replica.db.execute_batch(LISTS_DDL)?;
    replica
        .server
        .refuse_next_subscribe("lists", SubscriptionError::Transport("503".into()));
    replica
        .server
        .push_batch("todos", vec![todo_insert("t1", "a", false, CREATED_AT)]);

    let registry = SyncRegistry::start(
        replica.database(),
        Arc::new(replica.server.clone()),
        &two_table_config(),
    )
    .await?;

    let failures = registry.start_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "lists");
    assert!(matches!(failures[0].1, EngineError::Subscription { .. }));
    assert!(registry.table("lists").is_none());

    registry.wait_up_to_date().await?;
    assert_eq!(replica.todo_count()?, 1);

    let outcomes = registry.stop().await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].1.is_ok());
    assert_eq!(replica.server.released("lists"), 0);
    Ok(())
}

#[tokio::test]
async fn failing_table_does_not_stop_the_others() -> Result<(), Box<dyn std::error::Error>> {
    let replica = TestReplica::new()?;
    replica.db.execute_batch(LISTS_DDL)?;
    let mut bogus = list_insert("l1", "groceries");
    bogus.headers.operation = Some("truncate".into());
    replica.server.push_batch("lists", vec![bogus]);

    let registry = SyncRegistry::start(
        replica.database(),
        Arc::new(replica.server.clone()),
        &two_table_config(),
    )
    .await?;

    let todos = registry.table("todos").expect("todos running");
    let lists = registry.table("lists").expect("lists running");
    todos.wait_up_to_date().await?;
    assert!(lists.wait_up_to_date().await.is_err());
    assert_eq!(lists.phase(), SyncPhase::Failed);

    // todos keeps applying live changes
    replica
        .server
        .push_batch("todos", vec![todo_insert("t9", "still here", false, CREATED_AT)]);
    todos.wait_for(|s| s.batches_applied >= 2).await?;
    assert!(replica.todo("t9")?.is_some());
    assert_eq!(todos.phase(), SyncPhase::Streaming);

    let outcomes = registry.stop().await;
    let lists_outcome = outcomes
        .iter()
        .find(|(table, _)| table == "lists")
        .map(|(_, outcome)| outcome);
    assert!(matches!(lists_outcome, Some(Err(e)) if e.is_unknown_operation()));
    assert_eq!(list_count(&replica)?, 0);
    Ok(())
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn json_config_with_column_renames() -> Result<(), Box<dyn std::error::Error>> {
    let replica = TestReplica::new()?;
    replica.db.execute_batch(
        "CREATE TABLE contacts (contact_id TEXT PRIMARY KEY NOT NULL, display_name TEXT)",
    )?;
    replica.server.push_batch(
        "people",
        vec![ChangeEvent::insert(row([
            ("id", Value::from("p1")),
            ("name", Value::from("Ada")),
        ]))],
    );

    let config = SyncConfig::from_json_str(&format!(
        r#"{{
            "base_url": "{TEST_BASE_URL}",
            "tables": [{{
                "table": "contacts",
                "primary_key": ["contact_id"],
                "url": "{TEST_BASE_URL}/people",
                "columns": {{"contact_id": "id", "display_name": "name"}}
            }}]
        }}"#
    ))?;

    let registry =
        SyncRegistry::start(replica.database(), Arc::new(replica.server.clone()), &config).await?;
    registry.wait_up_to_date().await?;

    let contact = replica
        .db
        .query_one("SELECT contact_id, display_name FROM contacts", &[])?
        .expect("contact synced");
    assert_eq!(contact["contact_id"], Value::from("p1"));
    assert_eq!(contact["display_name"], Value::from("Ada"));
    assert_eq!(replica.server.subscriptions("people").len(), 1);

    registry.stop().await;
    Ok(())
}
