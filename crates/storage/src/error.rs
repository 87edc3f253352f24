use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("unsupported sync schema version {found} (expected {expected})")]
    UnsupportedSchemaVersion { found: i64, expected: i64 },

    #[error("database connection poisoned by a panicked writer")]
    ConnectionPoisoned,
}
