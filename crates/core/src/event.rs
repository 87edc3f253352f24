use std::fmt;

use serde::{Deserialize, Serialize};

use crate::CoreError;
use crate::value::{Row, Value};

/// Control tag the stream sends once it has delivered everything up to the live edge.
pub const CONTROL_UP_TO_DATE: &str = "up-to-date";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(CoreError::UnknownOperation(s.to_string())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Headers {
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub control: Option<String>,
}

/// One message of a shape stream. Messages without an operation tag are
/// control or heartbeat messages and carry no row change.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeEvent {
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Row,
}

impl ChangeEvent {
    pub fn new(operation: Operation, value: Row) -> Self {
        Self {
            headers: Headers {
                operation: Some(operation.as_str().to_string()),
                control: None,
            },
            key: None,
            value,
        }
    }

    pub fn insert(value: Row) -> Self {
        Self::new(Operation::Insert, value)
    }

    pub fn update(value: Row) -> Self {
        Self::new(Operation::Update, value)
    }

    pub fn delete(value: Row) -> Self {
        Self::new(Operation::Delete, value)
    }

    pub fn control(tag: &str) -> Self {
        Self {
            headers: Headers {
                operation: None,
                control: Some(tag.to_string()),
            },
            key: None,
            value: Row::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// The raw operation tag, if any.
    pub fn operation_tag(&self) -> Option<&str> {
        self.headers.operation.as_deref()
    }

    /// `Ok(None)` for control messages, an error for tags that are not a known operation.
    pub fn operation(&self) -> Result<Option<Operation>, CoreError> {
        self.operation_tag().map(Operation::parse).transpose()
    }

    pub fn is_up_to_date_marker(&self) -> bool {
        self.headers.control.as_deref() == Some(CONTROL_UP_TO_DATE)
    }

    /// Parse a batch in the shape wire format (a JSON array of messages).
    pub fn parse_batch(json: &str) -> Result<Vec<ChangeEvent>, CoreError> {
        serde_json::from_str(json).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// Build a [`Row`] from column/value pairs.
pub fn row<I, K, V>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Opaque, monotonically advancing position within a shape stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offset(String);

impl Offset {
    pub const BEFORE_FIRST: &'static str = "-1";

    pub fn new(offset: impl Into<String>) -> Self {
        Self(offset.into())
    }

    pub fn before_first() -> Self {
        Self(Self::BEFORE_FIRST.to_string())
    }

    pub fn is_before_first(&self) -> bool {
        self.0 == Self::BEFORE_FIRST
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Offset {
    fn default() -> Self {
        Self::before_first()
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted resumption point for one synced table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub table: String,
    pub shape_id: Option<String>,
    pub offset: Offset,
}

impl Cursor {
    /// Cursor for a table that has never been synced.
    pub fn initial(table: &str) -> Self {
        Self {
            table: table.to_string(),
            shape_id: None,
            offset: Offset::before_first(),
        }
    }
}
