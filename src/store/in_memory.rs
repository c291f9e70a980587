use crate::store::{CoordinationStore, EventType, SessionState, StoreError, VersionedData, WatchedEvent, Watcher};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// InMemoryStore is a single-process CoordinationStore. All operations are linearized by one
/// mutex. It is meant for tests and demos: every call is recorded, connectivity can be toggled,
/// and faults can be queued per operation.
///
/// Methods that are not part of `CoordinationStore` (`create_node`, `put`, `delete_node`, ...)
/// play the role of another process mutating the store. They bypass connectivity and faults,
/// but do fire watches.
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    connected_tx: watch::Sender<bool>,
    // Keeps the channel open so `send()` always lands.
    connected_rx: watch::Receiver<bool>,
    client_timeout: Duration,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Operation {
    GetData,
    SetData,
    Exists,
    WaitForConnected,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoreCall {
    pub operation: Operation,
    pub path: Option<String>,
}

/// A fault consumed by the next call of an operation.
#[derive(Clone, Debug)]
pub enum Fault {
    /// Fail the call with this error.
    Fail(StoreError),
    /// Delete the node (firing its watches), then run the call normally.
    DeleteNode,
}

#[derive(Default)]
struct StoreState {
    nodes: HashMap<String, VersionedData>,
    watches: HashMap<String, Vec<Watcher>>,
    faults: HashMap<Operation, VecDeque<Fault>>,
    calls: Vec<StoreCall>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_client_timeout(Duration::from_secs(1))
    }

    pub fn with_client_timeout(client_timeout: Duration) -> Self {
        let (connected_tx, connected_rx) = watch::channel(true);
        InMemoryStore {
            state: Mutex::new(StoreState::default()),
            connected_tx,
            connected_rx,
            client_timeout,
        }
    }

    pub fn create_node(&self, path: &str, data: impl Into<Bytes>) -> Result<i64, StoreError> {
        self.create_node_at_version(path, data, 0)
    }

    /// Create a node whose history starts at `version`.
    pub fn create_node_at_version(&self, path: &str, data: impl Into<Bytes>, version: i64) -> Result<i64, StoreError> {
        let mut state = self.lock();
        if state.nodes.contains_key(path) {
            return Err(StoreError::NodeExists(path.to_string()));
        }
        state.nodes.insert(
            path.to_string(),
            VersionedData {
                data: data.into(),
                version,
            },
        );
        state.fire(path, EventType::NodeCreated);

        Ok(version)
    }

    /// Unconditional write.
    pub fn put(&self, path: &str, data: impl Into<Bytes>) -> Result<i64, StoreError> {
        self.lock().write(path, data.into(), None)
    }

    pub fn delete_node(&self, path: &str) -> Result<(), StoreError> {
        self.lock().delete(path)
    }

    pub fn node(&self, path: &str) -> Option<VersionedData> {
        self.lock().nodes.get(path).cloned()
    }

    /// Toggle connectivity. Watchers observe the session change as an `EventType::None` event.
    pub fn set_connected(&self, connected: bool) {
        let session_state = if connected {
            SessionState::SyncConnected
        } else {
            SessionState::Disconnected
        };
        let _ = self.connected_tx.send(connected);
        self.lock().fire_session(session_state);
    }

    pub fn expire_session(&self) {
        self.lock().fire_session(SessionState::Expired);
    }

    /// Report the session's credentials as rejected to every armed watcher.
    pub fn fail_auth(&self) {
        self.lock().fire_session(SessionState::AuthFailed);
    }

    pub fn inject(&self, operation: Operation, fault: Fault) {
        self.lock()
            .faults
            .entry(operation)
            .or_insert_with(VecDeque::new)
            .push_back(fault);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.lock().calls.iter().filter(|c| c.operation == operation).count()
    }

    /// Number of distinct watchers armed on `path`.
    pub fn armed_watches(&self, path: &str) -> usize {
        self.lock().watches.get(path).map(Vec::len).unwrap_or(0)
    }

    fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().expect("InMemoryStore mutex guard poison")
    }

    /// Record the call, apply a queued fault, and check connectivity.
    fn begin(&self, state: &mut StoreState, operation: Operation, path: &str) -> Result<(), StoreError> {
        state.calls.push(StoreCall {
            operation,
            path: Some(path.to_string()),
        });
        match state.faults.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(Fault::Fail(e)) => return Err(e),
            Some(Fault::DeleteNode) => {
                let _ = state.delete(path);
            }
            None => {}
        }
        if !self.is_connected() {
            return Err(StoreError::ConnectionLoss);
        }

        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreState {
    fn write(&mut self, path: &str, data: Bytes, expected_version: Option<i64>) -> Result<i64, StoreError> {
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| StoreError::NoNode(path.to_string()))?;
        if let Some(expected) = expected_version {
            if node.version != expected {
                return Err(StoreError::BadVersion {
                    path: path.to_string(),
                    expected,
                });
            }
        }
        node.version += 1;
        node.data = data;
        let new_version = node.version;
        self.fire(path, EventType::NodeDataChanged);

        Ok(new_version)
    }

    fn delete(&mut self, path: &str) -> Result<(), StoreError> {
        self.nodes
            .remove(path)
            .ok_or_else(|| StoreError::NoNode(path.to_string()))?;
        self.fire(path, EventType::NodeDeleted);

        Ok(())
    }

    fn arm(&mut self, path: &str, watcher: Watcher) {
        let armed = self.watches.entry(path.to_string()).or_insert_with(Vec::new);
        if !armed.iter().any(|w| w.id() == watcher.id()) {
            armed.push(watcher);
        }
    }

    // Data watches are one-shot.
    fn fire(&mut self, path: &str, event_type: EventType) {
        if let Some(watchers) = self.watches.remove(path) {
            for watcher in watchers {
                watcher.notify(WatchedEvent::node_event(event_type, path));
            }
        }
    }

    // Session events do not consume watches.
    fn fire_session(&mut self, session_state: SessionState) {
        for watcher in self.watches.values().flatten() {
            watcher.notify(WatchedEvent::session_event(session_state));
        }
    }
}

#[async_trait::async_trait]
impl CoordinationStore for InMemoryStore {
    async fn get_data(&self, path: &str) -> Result<VersionedData, StoreError> {
        let mut state = self.lock();
        self.begin(&mut state, Operation::GetData, path)?;
        state
            .nodes
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NoNode(path.to_string()))
    }

    async fn set_data(&self, path: &str, data: Bytes, expected_version: i64) -> Result<i64, StoreError> {
        let mut state = self.lock();
        self.begin(&mut state, Operation::SetData, path)?;
        state.write(path, data, Some(expected_version))
    }

    async fn exists(&self, path: &str, watcher: Option<Watcher>) -> Result<Option<i64>, StoreError> {
        let mut state = self.lock();
        self.begin(&mut state, Operation::Exists, path)?;
        if let Some(watcher) = watcher {
            state.arm(path, watcher);
        }

        Ok(state.nodes.get(path).map(|n| n.version))
    }

    async fn wait_for_connected(&self, timeout: Duration) -> Result<(), StoreError> {
        let fault = {
            let mut state = self.lock();
            state.calls.push(StoreCall {
                operation: Operation::WaitForConnected,
                path: None,
            });
            state
                .faults
                .get_mut(&Operation::WaitForConnected)
                .and_then(VecDeque::pop_front)
        };
        if let Some(Fault::Fail(e)) = fault {
            return Err(e);
        }

        let mut connected = self.connected_rx.clone();
        let wait = async move {
            while !*connected.borrow() {
                if connected.changed().await.is_err() {
                    return;
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| StoreError::Timeout)
    }

    fn client_timeout(&self) -> Duration {
        self.client_timeout
    }
}
