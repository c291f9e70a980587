use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// CoordinationStore is the strongly consistent store that owns the term nodes. It is treated
/// as a capability: the coordinator never manages connections or sessions itself.
///
/// Implementations must provide linearizable reads, version-checked conditional writes, and
/// one-shot watches. A watch registered through `exists()` fires at most once for a data
/// event (created, data changed, deleted) and must be registered again afterwards. Session
/// state changes are delivered to every registered watcher as `EventType::None` and do not
/// consume the watch.
#[async_trait::async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read a node's data and version.
    async fn get_data(&self, path: &str) -> Result<VersionedData, StoreError>;

    /// Write `data` iff the node's current version is `expected_version`.
    ///
    /// Returns the version assigned to the write.
    async fn set_data(&self, path: &str, data: Bytes, expected_version: i64) -> Result<i64, StoreError>;

    /// Return the node's version if it exists. If `watcher` is provided it is armed for the
    /// next data event on `path`, whether or not the node exists. Registering the same watcher
    /// twice on a path arms it once.
    async fn exists(&self, path: &str, watcher: Option<Watcher>) -> Result<Option<i64>, StoreError>;

    /// Block until the connection is (re)established, or `timeout` elapses.
    async fn wait_for_connected(&self, timeout: Duration) -> Result<(), StoreError>;

    /// The store client's own connection timeout.
    fn client_timeout(&self) -> Duration;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedData {
    pub data: Bytes,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("No node at {0}")]
    NoNode(String),
    #[error("Node already exists at {0}")]
    NodeExists(String),
    #[error("Version mismatch writing {path}, expected version {expected}")]
    BadVersion { path: String, expected: i64 },
    #[error("Connection to the store was lost")]
    ConnectionLoss,
    #[error("Store session expired")]
    SessionExpired,
    #[error("Not authorized")]
    AuthFailed,
    #[error("Timed out waiting for the store")]
    Timeout,
    #[error("Interrupted while waiting on the store")]
    Interrupted,
    #[error("Store failure: {0}")]
    Other(String),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventType {
    /// Session state change, not a change of any node.
    None,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    SyncConnected,
    Disconnected,
    AuthFailed,
    Expired,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WatchedEvent {
    pub event_type: EventType,
    pub session_state: SessionState,
    pub path: Option<String>,
}

impl WatchedEvent {
    pub fn node_event(event_type: EventType, path: &str) -> Self {
        WatchedEvent {
            event_type,
            session_state: SessionState::SyncConnected,
            path: Some(path.to_string()),
        }
    }

    pub fn session_event(session_state: SessionState) -> Self {
        WatchedEvent {
            event_type: EventType::None,
            session_state,
            path: None,
        }
    }
}

static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Watcher is the sending half of a watch registration. Stores hold on to clones of it and
/// `notify()` them; the owner consumes the events through the paired `WatchEvents`.
#[derive(Clone, Debug)]
pub struct Watcher {
    id: u64,
    tx: mpsc::UnboundedSender<WatchedEvent>,
}

pub struct WatchEvents {
    rx: mpsc::UnboundedReceiver<WatchedEvent>,
}

impl Watcher {
    pub fn new() -> (Watcher, WatchEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Watcher {
            id: NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        };

        (watcher, WatchEvents { rx })
    }

    /// Identity of the registration, shared by all clones.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns false if the receiving side is gone.
    pub fn notify(&self, event: WatchedEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl WatchEvents {
    pub async fn next(&mut self) -> Option<WatchedEvent> {
        self.rx.recv().await
    }
}
