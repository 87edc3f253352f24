use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown operation {0}")]
    UnknownOperation(String),

    #[error("primary key column missing from change data: {column}")]
    MissingPrimaryKey { column: String },

    #[error("invalid value: {0}")]
    InvalidValue(String),
}
