use std::collections::BTreeMap;
use std::sync::Arc;

use shapesync_storage::{CursorStore, Database, schema::init_sync_schema};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{SyncConfig, TableSyncConfig};
use crate::controller::{TableSyncController, TableSyncHandle};
use crate::error::EngineError;
use crate::stream::ShapeSubscriber;

/// Starts one [`TableSyncController`] per configured table.
pub struct SyncRegistry;

impl SyncRegistry {
    /// Bootstrap the sync schema, then start every table from its persisted
    /// cursor. A table that fails to start is recorded on the returned handle
    /// and does not prevent the others from running.
    pub async fn start(
        db: Arc<dyn Database>,
        subscriber: Arc<dyn ShapeSubscriber>,
        config: &SyncConfig,
    ) -> Result<RegistryHandle, EngineError> {
        config.validate()?;
        init_sync_schema(db.as_ref())?;

        let mut handle = RegistryHandle {
            shutdown: CancellationToken::new(),
            tables: BTreeMap::new(),
            start_failures: Vec::new(),
        };

        for table in &config.tables {
            match Self::start_table(&db, &subscriber, config, table, &handle.shutdown).await {
                Ok(table_handle) => {
                    handle.tables.insert(table.table.clone(), table_handle);
                }
                Err(e) => {
                    error!(table = %table.table, error = %e, "failed to start table sync");
                    handle.start_failures.push((table.table.clone(), e));
                }
            }
        }

        info!(
            started = handle.tables.len(),
            failed = handle.start_failures.len(),
            "sync registry started"
        );
        Ok(handle)
    }

    async fn start_table(
        db: &Arc<dyn Database>,
        subscriber: &Arc<dyn ShapeSubscriber>,
        config: &SyncConfig,
        table: &TableSyncConfig,
        shutdown: &CancellationToken,
    ) -> Result<TableSyncHandle, EngineError> {
        let cursor = CursorStore::load(db.as_ref(), &table.table)?;
        TableSyncController::new(
            &config.url_for(table),
            table.clone(),
            Arc::clone(db),
            Arc::clone(subscriber),
        )?
        .with_cancellation(shutdown)
        .start(cursor)
        .await
    }
}

pub struct RegistryHandle {
    shutdown: CancellationToken,
    tables: BTreeMap<String, TableSyncHandle>,
    start_failures: Vec<(String, EngineError)>,
}

impl RegistryHandle {
    pub fn table(&self, name: &str) -> Option<&TableSyncHandle> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSyncHandle> {
        self.tables.values()
    }

    /// Tables whose controller could not be started.
    pub fn start_failures(&self) -> &[(String, EngineError)] {
        &self.start_failures
    }

    /// Resolve once every running table has caught up.
    pub async fn wait_up_to_date(&self) -> Result<(), EngineError> {
        for handle in self.tables.values() {
            handle.wait_up_to_date().await?;
        }
        Ok(())
    }

    /// Cancel every controller and wait for each to release its subscription.
    /// Returns how each started table ended.
    pub async fn stop(self) -> Vec<(String, Result<(), EngineError>)> {
        self.shutdown.cancel();

        let mut outcomes = Vec::with_capacity(self.tables.len());
        for (name, mut handle) in self.tables {
            let outcome = handle.join().await;
            if let Err(e) = &outcome {
                error!(table = %name, error = %e, "table sync ended with error");
            }
            outcomes.push((name, outcome));
        }
        info!(tables = outcomes.len(), "sync registry stopped");
        outcomes
    }
}
