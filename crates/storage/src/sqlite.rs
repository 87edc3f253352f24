use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use rusqlite::types::ValueRef;
use tracing::debug;

use shapesync_core::{Row, Statement, Value};

use crate::error::StorageError;
use crate::traits::Database;

/// A single SQLite connection shared by every sync controller. The mutex is
/// the only lock; it is held for the duration of one call.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a batch of DDL or other argument-less SQL.
    pub fn execute_batch(&self, sql: &str) -> Result<(), StorageError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::ConnectionPoisoned)
    }
}

fn configure(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    Ok(())
}

fn to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Integer(n) => Sql::Integer(*n),
        Value::Real(f) => Sql::Real(*f),
        Value::Text(s) => Sql::Text(s.clone()),
        Value::Boolean(b) => Sql::Integer(i64::from(*b)),
        Value::Blob(bytes) => Sql::Blob(bytes.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Result<Value, StorageError> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Integer(n),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(bytes) => Value::Text(
            std::str::from_utf8(bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?
                .to_string(),
        ),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    })
}

fn bind(args: &[Value]) -> impl rusqlite::Params + '_ {
    rusqlite::params_from_iter(args.iter().map(to_sql))
}

impl Database for SqliteDatabase {
    fn execute(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(bind(args))?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (i, column) in columns.iter().enumerate() {
                record.insert(column.clone(), from_sql(row.get_ref(i)?)?);
            }
            result.push(record);
        }
        Ok(result)
    }

    fn run_in_transaction(&self, statements: &[Statement]) -> Result<(), StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for (index, statement) in statements.iter().enumerate() {
            match tx.execute(&statement.sql, bind(&statement.args)) {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, msg))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    // Dropping `tx` rolls back everything applied so far.
                    return Err(StorageError::ConstraintViolation(format!(
                        "statement {} of {}: {}",
                        index + 1,
                        statements.len(),
                        msg.unwrap_or_else(|| err.to_string())
                    )));
                }
                Err(e) => return Err(StorageError::Sqlite(e)),
            }
        }

        tx.commit()?;
        debug!(statements = statements.len(), "committed transaction");
        Ok(())
    }
}
