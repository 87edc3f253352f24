use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use shapesync_core::event::CONTROL_UP_TO_DATE;
use shapesync_core::{ChangeEvent, Offset};
use shapesync_engine::{ShapeStream, ShapeSubscriber, SubscribeOptions, SubscriptionError};
use tokio::sync::watch;

pub const TEST_BASE_URL: &str = "http://shapes.test/v1/shape";

struct ShapeLog {
    shape_id: String,
    batches: Vec<Vec<ChangeEvent>>,
    closed: bool,
}

#[derive(Default)]
struct ServerState {
    shapes: BTreeMap<String, ShapeLog>,
    generation: u64,
    subscriptions: BTreeMap<String, Vec<SubscribeOptions>>,
    released: BTreeMap<String, usize>,
    refuse_subscribe: BTreeMap<String, SubscriptionError>,
    fail_read: BTreeMap<String, SubscriptionError>,
}

impl ServerState {
    fn shape(&mut self, url: &str) -> &mut ShapeLog {
        let generation = &mut self.generation;
        self.shapes.entry(url.to_string()).or_insert_with(|| {
            *generation += 1;
            ShapeLog {
                shape_id: format!("shape-{generation}"),
                batches: Vec::new(),
                closed: false,
            }
        })
    }
}

/// In-memory stand-in for the shape replication service.
///
/// Each shape is an append-only log of batches. The batch at index `n` has
/// offset `"{n}_0"`; a subscription at offset `"{n}_0"` resumes with batch
/// `n + 1`. A stream reports up-to-date after delivering the last batch in the
/// log, and appends an `up-to-date` control message to that batch.
#[derive(Clone)]
pub struct TestShapeServer {
    state: Arc<Mutex<ServerState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for TestShapeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl TestShapeServer {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(ServerState::default())),
            changes: Arc::new(changes),
        }
    }

    pub fn url(table: &str) -> String {
        format!("{TEST_BASE_URL}/{table}")
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().expect("shape server state poisoned")
    }

    fn notify(&self) {
        self.changes.send_modify(|n| *n += 1);
    }

    /// Append a batch to the table's shape log and wake its streams.
    pub fn push_batch(&self, table: &str, events: Vec<ChangeEvent>) {
        self.lock().shape(&Self::url(table)).batches.push(events);
        self.notify();
    }

    pub fn shape_id(&self, table: &str) -> String {
        self.lock().shape(&Self::url(table)).shape_id.clone()
    }

    /// Replace the table's shape with a fresh, empty one under a new id.
    pub fn rotate_shape(&self, table: &str) -> String {
        let shape_id = {
            let mut state = self.lock();
            state.shapes.remove(&Self::url(table));
            state.shape(&Self::url(table)).shape_id.clone()
        };
        self.notify();
        shape_id
    }

    /// End the table's streams once they have delivered the current log.
    pub fn close(&self, table: &str) {
        self.lock().shape(&Self::url(table)).closed = true;
        self.notify();
    }

    pub fn refuse_next_subscribe(&self, table: &str, error: SubscriptionError) {
        self.lock().refuse_subscribe.insert(Self::url(table), error);
    }

    pub fn fail_next_read(&self, table: &str, error: SubscriptionError) {
        self.lock().fail_read.insert(Self::url(table), error);
        self.notify();
    }

    /// Every subscription opened for the table, oldest first.
    pub fn subscriptions(&self, table: &str) -> Vec<SubscribeOptions> {
        self.lock()
            .subscriptions
            .get(&Self::url(table))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `unsubscribe` calls made by the table's streams.
    pub fn released(&self, table: &str) -> usize {
        self.lock()
            .released
            .get(&Self::url(table))
            .copied()
            .unwrap_or(0)
    }
}

fn next_index(offset: &Offset) -> Result<usize, SubscriptionError> {
    if offset.is_before_first() {
        return Ok(0);
    }
    offset
        .as_str()
        .split_once('_')
        .and_then(|(n, _)| n.parse::<usize>().ok())
        .map(|n| n + 1)
        .ok_or_else(|| SubscriptionError::Transport(format!("malformed offset {offset}")))
}

#[async_trait]
impl ShapeSubscriber for TestShapeServer {
    async fn subscribe(
        &self,
        options: SubscribeOptions,
    ) -> Result<Box<dyn ShapeStream>, SubscriptionError> {
        let mut state = self.lock();
        state
            .subscriptions
            .entry(options.url.clone())
            .or_default()
            .push(options.clone());
        if let Some(error) = state.refuse_subscribe.remove(&options.url) {
            return Err(error);
        }

        let shape = state.shape(&options.url);
        if let Some(requested) = &options.shape_id {
            if *requested != shape.shape_id {
                return Err(SubscriptionError::ShapeMismatch {
                    requested: requested.clone(),
                    current: shape.shape_id.clone(),
                });
            }
        }
        let next = next_index(&options.offset)?;

        Ok(Box::new(ScriptedStream {
            url: options.url,
            shape_id: shape.shape_id.clone(),
            state: Arc::clone(&self.state),
            changes: self.changes.subscribe(),
            next,
            last_offset: options.offset,
            up_to_date: false,
        }))
    }
}

struct ScriptedStream {
    url: String,
    shape_id: String,
    state: Arc<Mutex<ServerState>>,
    changes: watch::Receiver<u64>,
    next: usize,
    last_offset: Offset,
    up_to_date: bool,
}

impl ScriptedStream {
    fn poll_log(&mut self) -> Option<Result<Option<Vec<ChangeEvent>>, SubscriptionError>> {
        let mut state = self.state.lock().expect("shape server state poisoned");
        if let Some(error) = state.fail_read.remove(&self.url) {
            return Some(Err(error));
        }

        let shape = state.shape(&self.url);
        if shape.shape_id != self.shape_id {
            return Some(Err(SubscriptionError::ShapeMismatch {
                requested: self.shape_id.clone(),
                current: shape.shape_id.clone(),
            }));
        }
        if self.next < shape.batches.len() {
            let mut batch = shape.batches[self.next].clone();
            self.last_offset = Offset::new(format!("{}_0", self.next));
            self.next += 1;
            self.up_to_date = self.next == shape.batches.len();
            if self.up_to_date {
                batch.push(ChangeEvent::control(CONTROL_UP_TO_DATE));
            }
            return Some(Ok(Some(batch)));
        }
        if !self.up_to_date {
            // Nothing left to deliver: announce the live edge once.
            self.up_to_date = true;
            return Some(Ok(Some(vec![ChangeEvent::control(CONTROL_UP_TO_DATE)])));
        }
        if shape.closed {
            return Some(Ok(None));
        }
        None
    }
}

#[async_trait]
impl ShapeStream for ScriptedStream {
    async fn next_batch(&mut self) -> Result<Option<Vec<ChangeEvent>>, SubscriptionError> {
        loop {
            self.changes.borrow_and_update();
            if let Some(result) = self.poll_log() {
                return result;
            }
            if self.changes.changed().await.is_err() {
                return Err(SubscriptionError::Closed);
            }
        }
    }

    fn is_up_to_date(&self) -> bool {
        self.up_to_date
    }

    fn last_offset(&self) -> Offset {
        self.last_offset.clone()
    }

    fn shape_id(&self) -> Option<String> {
        Some(self.shape_id.clone())
    }

    fn unsubscribe(&mut self) {
        let mut state = self.state.lock().expect("shape server state poisoned");
        *state.released.entry(self.url.clone()).or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapesync_core::row;

    fn options(table: &str, offset: &str, shape_id: Option<String>) -> SubscribeOptions {
        SubscribeOptions {
            url: TestShapeServer::url(table),
            table: table.to_string(),
            offset: Offset::new(offset),
            shape_id,
        }
    }

    #[tokio::test]
    async fn resumes_after_the_given_offset() {
        let server = TestShapeServer::new();
        server.push_batch("todos", vec![ChangeEvent::insert(row([("id", "a")]))]);
        server.push_batch("todos", vec![ChangeEvent::insert(row([("id", "b")]))]);

        let shape_id = server.shape_id("todos");
        let mut stream = server
            .subscribe(options("todos", "0_0", Some(shape_id)))
            .await
            .unwrap();
        let batch = stream.next_batch().await.unwrap().unwrap();

        assert_eq!(batch[0].value["id"].as_text(), Some("b"));
        assert!(batch[1].is_up_to_date_marker());
        assert_eq!(stream.last_offset(), Offset::new("1_0"));
        assert!(stream.is_up_to_date());
    }

    #[tokio::test]
    async fn stale_shape_id_is_rejected() {
        let server = TestShapeServer::new();
        let old = server.shape_id("todos");
        server.rotate_shape("todos");

        let err = server
            .subscribe(options("todos", "3_0", Some(old)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SubscriptionError::ShapeMismatch { .. }));
    }
}
