use shapesync_core::{Row, Statement, Value};

use crate::error::StorageError;

/// The embedded database as seen by the sync core.
///
/// Implementations are shared between every table's controller; each call to
/// [`Database::run_in_transaction`] must be all-or-nothing and must not
/// interleave with another transaction on the same database.
pub trait Database: Send + Sync {
    /// Run one statement outside of any batch. Returns the result rows (empty
    /// for statements that produce none).
    fn execute(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, StorageError>;

    /// Apply `statements` in order as one transaction. On error nothing is
    /// committed.
    fn run_in_transaction(&self, statements: &[Statement]) -> Result<(), StorageError>;

    fn query_one(&self, sql: &str, args: &[Value]) -> Result<Option<Row>, StorageError> {
        Ok(self.execute(sql, args)?.into_iter().next())
    }
}
