use shapesync_core::{Statement, Value};
use tracing::info;

use crate::error::StorageError;
use crate::traits::Database;

pub const SCHEMA_VERSION: i64 = 1;

pub const META_TABLE: &str = "_shapesync_meta";
pub const SHAPES_TABLE: &str = "_shapesync_shapes";

/// Ensure the sync bookkeeping tables exist at the supported version.
///
/// A database without the meta table is bootstrapped; a database recorded at
/// any other version is refused, since its cursor layout is unknown.
pub fn init_sync_schema(db: &dyn Database) -> Result<(), StorageError> {
    match schema_version(db)? {
        None => {
            info!(version = SCHEMA_VERSION, "initializing sync schema");
            db.run_in_transaction(&migration_1())
        }
        Some(SCHEMA_VERSION) => Ok(()),
        Some(found) => Err(StorageError::UnsupportedSchemaVersion {
            found,
            expected: SCHEMA_VERSION,
        }),
    }
}

/// The recorded schema version, or `None` if the sync tables were never created.
pub fn schema_version(db: &dyn Database) -> Result<Option<i64>, StorageError> {
    let exists = db
        .query_one(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[Value::from(META_TABLE)],
        )?
        .is_some();
    if !exists {
        return Ok(None);
    }

    let row = db.query_one(&format!("SELECT version FROM {META_TABLE}"), &[])?;
    match row.as_ref().and_then(|r| r.get("version")) {
        Some(Value::Integer(v)) => Ok(Some(*v)),
        Some(other) => Err(StorageError::Serialization(format!(
            "schema version is not an integer: {other:?}"
        ))),
        // Table created but never stamped: treat as an unknown version.
        None => Err(StorageError::UnsupportedSchemaVersion {
            found: -1,
            expected: SCHEMA_VERSION,
        }),
    }
}

fn migration_1() -> Vec<Statement> {
    vec![
        Statement::new(
            format!("CREATE TABLE {META_TABLE} (version INTEGER NOT NULL)"),
            vec![],
        ),
        Statement::new(
            format!(
                r#"CREATE TABLE {SHAPES_TABLE} (
                    tablename TEXT PRIMARY KEY NOT NULL,
                    shape_id TEXT,
                    "offset" TEXT NOT NULL
                )"#
            ),
            vec![],
        ),
        Statement::new(
            format!("INSERT INTO {META_TABLE} (version) VALUES (?1)"),
            vec![Value::Integer(SCHEMA_VERSION)],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteDatabase;

    #[test]
    fn bootstraps_fresh_database() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        assert_eq!(schema_version(&db).unwrap(), None);

        init_sync_schema(&db).unwrap();
        assert_eq!(schema_version(&db).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn init_is_repeatable() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        init_sync_schema(&db).unwrap();
        init_sync_schema(&db).unwrap();

        let rows = db.execute(&format!("SELECT version FROM {META_TABLE}"), &[]).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn refuses_unknown_version() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        init_sync_schema(&db).unwrap();
        db.execute(&format!("UPDATE {META_TABLE} SET version = 2"), &[])
            .unwrap();

        match init_sync_schema(&db) {
            Err(StorageError::UnsupportedSchemaVersion { found, expected }) => {
                assert_eq!(found, 2);
                assert_eq!(expected, SCHEMA_VERSION);
            }
            other => panic!("expected UnsupportedSchemaVersion, got {other:?}"),
        }
    }
}
