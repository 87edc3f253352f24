use shapesync_core::{Cursor, Offset, Statement, Value};

use crate::error::StorageError;
use crate::schema::SHAPES_TABLE;
use crate::traits::Database;

/// Persisted `(shape_id, offset)` per synced table.
///
/// Reads happen once at controller start. Writes are never executed here:
/// [`CursorStore::upsert_statement`] is folded into the transaction of the
/// batch it accounts for, so rows and cursor commit together or not at all.
pub struct CursorStore;

impl CursorStore {
    pub fn load(db: &dyn Database, table: &str) -> Result<Option<Cursor>, StorageError> {
        let row = db.query_one(
            &format!(r#"SELECT shape_id, "offset" FROM {SHAPES_TABLE} WHERE tablename = ?1"#),
            &[Value::from(table)],
        )?;
        let Some(row) = row else {
            return Ok(None);
        };

        let shape_id = match row.get("shape_id") {
            Some(Value::Text(id)) => Some(id.clone()),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(StorageError::Serialization(format!(
                    "shape_id for {table} is not text: {other:?}"
                )));
            }
        };
        let offset = match row.get("offset") {
            Some(Value::Text(offset)) => Offset::new(offset.clone()),
            // Older cursors may have stored a bare integer offset.
            Some(Value::Integer(n)) => Offset::new(n.to_string()),
            other => {
                return Err(StorageError::Serialization(format!(
                    "offset for {table} is not text: {other:?}"
                )));
            }
        };

        Ok(Some(Cursor {
            table: table.to_string(),
            shape_id,
            offset,
        }))
    }

    /// Load the cursor for `table`, or the "from the beginning" cursor when none is stored.
    pub fn load_or_initial(db: &dyn Database, table: &str) -> Result<Cursor, StorageError> {
        Ok(Self::load(db, table)?.unwrap_or_else(|| Cursor::initial(table)))
    }

    pub fn upsert_statement(table: &str, shape_id: Option<&str>, offset: &Offset) -> Statement {
        Statement::new(
            format!(
                r#"INSERT INTO {SHAPES_TABLE} (tablename, shape_id, "offset") VALUES (?1, ?2, ?3)
                 ON CONFLICT(tablename) DO UPDATE SET shape_id = excluded.shape_id, "offset" = excluded."offset""#
            ),
            vec![
                Value::from(table),
                Value::from(shape_id),
                Value::from(offset.as_str()),
            ],
        )
    }
}
