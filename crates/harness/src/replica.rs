use std::sync::Arc;

use shapesync_core::{ChangeEvent, ColumnMapper, Cursor, Row, Value, row};
use shapesync_engine::{EngineError, TableSyncConfig, TableSyncController, TableSyncHandle};
use shapesync_storage::schema::init_sync_schema;
use shapesync_storage::{CursorStore, Database, SqliteDatabase, StorageError};

use crate::TestShapeServer;

pub const TODOS_DDL: &str = "CREATE TABLE IF NOT EXISTS todos (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    completed INTEGER NOT NULL,
    created_at INTEGER NOT NULL
)";

/// A local replica: a SQLite database with the demo `todos` table, wired to a
/// [`TestShapeServer`].
pub struct TestReplica {
    pub db: Arc<SqliteDatabase>,
    pub server: TestShapeServer,
}

impl TestReplica {
    pub fn new() -> Result<Self, StorageError> {
        Self::with_database(SqliteDatabase::open_in_memory()?, TestShapeServer::new())
    }

    /// Open (or reopen) an on-disk replica; used to simulate process restarts.
    pub fn open(path: &str, server: TestShapeServer) -> Result<Self, StorageError> {
        Self::with_database(SqliteDatabase::open(path)?, server)
    }

    fn with_database(db: SqliteDatabase, server: TestShapeServer) -> Result<Self, StorageError> {
        db.execute_batch(TODOS_DDL)?;
        init_sync_schema(&db)?;
        Ok(Self {
            db: Arc::new(db),
            server,
        })
    }

    pub fn database(&self) -> Arc<dyn Database> {
        self.db.clone()
    }

    /// The `todos` table as the demo application syncs it: keyed by `id`,
    /// booleans stored as integers and `created_at` as epoch milliseconds.
    pub fn todos_config() -> TableSyncConfig {
        TableSyncConfig::new("todos", &["id"])
            .with_url(&TestShapeServer::url("todos"))
            .with_column_mapper(ColumnMapper::sqlite_affinity(["created_at"]))
    }

    pub fn controller(&self, config: TableSyncConfig) -> Result<TableSyncController, EngineError> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| TestShapeServer::url(&config.table));
        TableSyncController::new(&url, config, self.database(), Arc::new(self.server.clone()))
    }

    /// Start syncing `todos` from its persisted cursor.
    pub async fn start_todos(&self) -> Result<TableSyncHandle, EngineError> {
        let cursor = self.cursor("todos")?;
        self.controller(Self::todos_config())?.start(cursor).await
    }

    pub fn cursor(&self, table: &str) -> Result<Option<Cursor>, StorageError> {
        CursorStore::load(self.db.as_ref(), table)
    }

    pub fn todo(&self, id: &str) -> Result<Option<Row>, StorageError> {
        self.db.query_one(
            "SELECT id, title, completed, created_at FROM todos WHERE id = ?1",
            &[Value::from(id)],
        )
    }

    pub fn todo_count(&self) -> Result<i64, StorageError> {
        let row = self.db.query_one("SELECT COUNT(*) AS n FROM todos", &[])?;
        Ok(row.and_then(|r| r["n"].as_integer()).unwrap_or(0))
    }
}

fn todo_key(id: &str) -> String {
    format!("\"public\".\"todos\"/\"{id}\"")
}

pub fn todo_insert(id: &str, title: &str, completed: bool, created_at: &str) -> ChangeEvent {
    ChangeEvent::insert(row([
        ("id", Value::from(id)),
        ("title", Value::from(title)),
        ("completed", Value::from(completed)),
        ("created_at", Value::from(created_at)),
    ]))
    .with_key(todo_key(id))
}

pub fn todo_update(id: &str, changes: Vec<(&str, Value)>) -> ChangeEvent {
    let mut value = row([("id", Value::from(id))]);
    value.extend(changes.into_iter().map(|(k, v)| (k.to_string(), v)));
    ChangeEvent::update(value).with_key(todo_key(id))
}

pub fn todo_delete(id: &str) -> ChangeEvent {
    ChangeEvent::delete(row([("id", id)])).with_key(todo_key(id))
}
