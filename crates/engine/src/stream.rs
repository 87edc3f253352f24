use async_trait::async_trait;
use shapesync_core::{ChangeEvent, Cursor, Offset};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("stream closed by the server")]
    Closed,

    /// The server no longer serves the shape the cursor refers to.
    #[error("shape {requested} is gone (server has {current})")]
    ShapeMismatch { requested: String, current: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Where a subscription starts reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub url: String,
    pub table: String,
    pub offset: Offset,
    pub shape_id: Option<String>,
}

impl SubscribeOptions {
    pub fn from_cursor(url: &str, cursor: &Cursor) -> Self {
        Self {
            url: url.to_string(),
            table: cursor.table.clone(),
            offset: cursor.offset.clone(),
            shape_id: cursor.shape_id.clone(),
        }
    }
}

/// Opens shape streams. This is the boundary to the replication transport.
#[async_trait]
pub trait ShapeSubscriber: Send + Sync {
    /// Resolves as soon as the subscription exists; it does not wait for data.
    async fn subscribe(
        &self,
        options: SubscribeOptions,
    ) -> Result<Box<dyn ShapeStream>, SubscriptionError>;
}

/// A live subscription to one shape.
///
/// Batches arrive in stream order. The position accessors describe the stream
/// after the most recently returned batch.
#[async_trait]
pub trait ShapeStream: Send {
    /// The next batch, or `Ok(None)` once the stream has ended.
    async fn next_batch(&mut self) -> Result<Option<Vec<ChangeEvent>>, SubscriptionError>;

    fn is_up_to_date(&self) -> bool;

    fn last_offset(&self) -> Offset;

    fn shape_id(&self) -> Option<String>;

    /// Release the underlying connection. Called exactly once by the owner.
    fn unsubscribe(&mut self);
}
