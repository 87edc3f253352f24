use std::sync::Arc;

use shapesync_core::{ChangeEvent, ColumnMapper, Cursor, Offset, TableRef, statement_for_event};
use shapesync_storage::{CursorStore, Database};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, trace};

use crate::config::TableSyncConfig;
use crate::error::EngineError;
use crate::stream::{ShapeStream, ShapeSubscriber, SubscribeOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Subscribing,
    Streaming,
    Draining,
    Cancelled,
    Failed,
}

impl SyncPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed)
    }
}

/// Snapshot of a controller, updated only after a batch has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub up_to_date: bool,
    pub offset: Offset,
    pub shape_id: Option<String>,
    pub batches_applied: u64,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            up_to_date: false,
            offset: Offset::before_first(),
            shape_id: None,
            batches_applied: 0,
        }
    }
}

/// Replicates one shape into one local table.
///
/// Each delivered batch becomes a single transaction: the row statements of
/// its events, in order, followed by the cursor upsert for the stream position
/// after the batch. Batches are applied one at a time; the next batch is not
/// requested until the previous transaction has committed.
pub struct TableSyncController {
    url: String,
    target: TableRef,
    primary_key: Vec<String>,
    mapper: ColumnMapper,
    db: Arc<dyn Database>,
    subscriber: Arc<dyn ShapeSubscriber>,
    cancel: CancellationToken,
    span: Span,
    status: watch::Sender<SyncStatus>,
}

impl TableSyncController {
    pub fn new(
        url: &str,
        config: TableSyncConfig,
        db: Arc<dyn Database>,
        subscriber: Arc<dyn ShapeSubscriber>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let (status, _) = watch::channel(SyncStatus::default());
        Ok(Self {
            url: url.to_string(),
            target: config.target(),
            mapper: config.resolve_mapper(),
            span: info_span!("table_sync", table = %config.table),
            primary_key: config.primary_key,
            db,
            subscriber,
            cancel: CancellationToken::new(),
            status,
        })
    }

    /// Stop this controller when `parent` is cancelled, in addition to
    /// [`TableSyncHandle::unsubscribe`].
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Emit this controller's logs under `span` instead of the default
    /// `table_sync` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Open the subscription at `start_cursor` (or the beginning of the shape)
    /// and spawn the apply loop. Resolves once the subscription exists.
    pub async fn start(self, start_cursor: Option<Cursor>) -> Result<TableSyncHandle, EngineError> {
        let cursor = start_cursor.unwrap_or_else(|| Cursor::initial(&self.target.table));
        self.status.send_modify(|s| {
            s.phase = SyncPhase::Subscribing;
            s.offset = cursor.offset.clone();
            s.shape_id = cursor.shape_id.clone();
        });
        info!(
            parent: &self.span,
            offset = %cursor.offset,
            shape_id = ?cursor.shape_id,
            "starting shape stream"
        );

        let options = SubscribeOptions::from_cursor(&self.url, &cursor);
        let stream = match self
            .subscriber
            .subscribe(options)
            .instrument(self.span.clone())
            .await
        {
            Ok(stream) => stream,
            Err(source) => {
                error!(parent: &self.span, error = %source, "failed to subscribe");
                self.status.send_modify(|s| s.phase = SyncPhase::Failed);
                return Err(EngineError::Subscription {
                    table: self.target.table.clone(),
                    source,
                });
            }
        };
        self.status.send_modify(|s| s.phase = SyncPhase::Streaming);

        let handle_status = self.status.subscribe();
        let cancel = self.cancel.clone();
        let table = self.target.table.clone();
        let span = self.span.clone();
        let task = tokio::spawn(self.run(stream).instrument(span));

        Ok(TableSyncHandle {
            table,
            cancel,
            status: handle_status,
            task: Some(task),
        })
    }

    async fn run(self, mut stream: Box<dyn ShapeStream>) -> Result<(), EngineError> {
        let result = self.stream_batches(stream.as_mut()).await;

        if result.is_ok() {
            self.status.send_modify(|s| s.phase = SyncPhase::Draining);
        }
        stream.unsubscribe();

        match &result {
            Ok(()) => {
                self.status.send_modify(|s| s.phase = SyncPhase::Cancelled);
                info!("shape stream stopped");
            }
            Err(e) => {
                self.status.send_modify(|s| s.phase = SyncPhase::Failed);
                error!(error = %e, "shape sync failed");
            }
        }
        result
    }

    async fn stream_batches(&self, stream: &mut dyn ShapeStream) -> Result<(), EngineError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                next = stream.next_batch() => next,
            };

            match next {
                Ok(Some(batch)) => self.apply_batch(&*stream, &batch)?,
                Ok(None) => {
                    info!("shape stream ended");
                    return Ok(());
                }
                Err(source) => {
                    return Err(EngineError::Subscription {
                        table: self.target.table.clone(),
                        source,
                    });
                }
            }
        }
    }

    fn apply_batch(&self, stream: &dyn ShapeStream, batch: &[ChangeEvent]) -> Result<(), EngineError> {
        debug!(events = batch.len(), "sync messages received");

        let mut statements = Vec::with_capacity(batch.len() + 1);
        for event in batch {
            if let Some(statement) =
                statement_for_event(&self.target, &self.mapper, &self.primary_key, event)?
            {
                trace!(sql = %statement.sql, args = ?statement.args, "applying change");
                statements.push(statement);
            }
        }

        let offset = stream.last_offset();
        let shape_id = stream.shape_id();
        let up_to_date = stream.is_up_to_date();
        statements.push(CursorStore::upsert_statement(
            &self.target.table,
            shape_id.as_deref(),
            &offset,
        ));

        self.db
            .run_in_transaction(&statements)
            .map_err(|source| EngineError::Transaction {
                table: self.target.table.clone(),
                source,
            })?;
        debug!(%offset, shape_id = ?shape_id, statements = statements.len(), "stored offset");

        let mut caught_up = false;
        self.status.send_modify(|s| {
            caught_up = up_to_date && !s.up_to_date;
            s.up_to_date = up_to_date;
            s.offset = offset;
            s.shape_id = shape_id;
            s.batches_applied += 1;
        });
        if caught_up {
            info!("caught up with the live edge");
        }
        Ok(())
    }
}

/// Handle to a running [`TableSyncController`].
pub struct TableSyncHandle {
    table: String,
    cancel: CancellationToken,
    status: watch::Receiver<SyncStatus>,
    task: Option<JoinHandle<Result<(), EngineError>>>,
}

impl TableSyncHandle {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Request a stop. Takes effect at the controller's next wait for data;
    /// an in-flight transaction still completes. Repeated calls are no-ops.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn phase(&self) -> SyncPhase {
        self.status.borrow().phase
    }

    pub fn is_up_to_date(&self) -> bool {
        self.status.borrow().up_to_date
    }

    pub fn last_offset(&self) -> Offset {
        self.status.borrow().offset.clone()
    }

    pub fn shape_id(&self) -> Option<String> {
        self.status.borrow().shape_id.clone()
    }

    /// Wait until the status satisfies `predicate` or the controller reaches a
    /// terminal phase, and return that status. Checks the current status first.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SyncStatus) -> bool,
    ) -> Result<SyncStatus, EngineError> {
        let mut status = self.status.clone();
        let current = status
            .wait_for(|s| predicate(s) || s.phase.is_terminal())
            .await
            .map_err(|_| EngineError::TaskAborted {
                table: self.table.clone(),
                reason: "status channel closed".into(),
            })?
            .clone();
        Ok(current)
    }

    /// Resolve once the table has caught up with the live edge, immediately if
    /// it already has. Fails if the controller stops first.
    pub async fn wait_up_to_date(&self) -> Result<(), EngineError> {
        let status = self.wait_for(|s| s.up_to_date).await?;
        if status.up_to_date {
            return Ok(());
        }
        Err(EngineError::NotUpToDate {
            table: self.table.clone(),
            phase: status.phase,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Wait for the controller to finish and return how it ended. The
    /// outcome is reported to the first caller; later calls return `Ok`.
    pub async fn join(&mut self) -> Result<(), EngineError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::TaskAborted {
                table: self.table.clone(),
                reason: e.to_string(),
            }),
        }
    }

    pub async fn stop(&mut self) -> Result<(), EngineError> {
        self.unsubscribe();
        self.join().await
    }
}

/// The subscription lives no longer than its handle: dropping the handle
/// cancels the controller, which then releases the stream on its own task.
impl Drop for TableSyncHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
