mod api;
mod in_memory;

pub use api::CoordinationStore;
pub use api::EventType;
pub use api::SessionState;
pub use api::StoreError;
pub use api::VersionedData;
pub use api::WatchEvents;
pub use api::WatchedEvent;
pub use api::Watcher;
pub use in_memory::Fault;
pub use in_memory::InMemoryStore;
pub use in_memory::Operation;
pub use in_memory::StoreCall;
