mod coordinator;
mod store;
mod terms;

pub use coordinator::DiscardReason;
pub use coordinator::Lifecycle;
pub use coordinator::ListenerId;
pub use coordinator::RemovalOutcome;
pub use coordinator::ShardTermsConfig;
pub use coordinator::ShardTermsCoordinator;
pub use coordinator::ShardTermsOptions;
pub use coordinator::TermsError;
pub use coordinator::TermsListener;
pub use coordinator::WatchState;
pub use coordinator::UNREGISTERED_TERM;
pub use store::CoordinationStore;
pub use store::EventType;
pub use store::Fault;
pub use store::InMemoryStore;
pub use store::Operation;
pub use store::SessionState;
pub use store::StoreCall;
pub use store::StoreError;
pub use store::VersionedData;
pub use store::WatchEvents;
pub use store::WatchedEvent;
pub use store::Watcher;
pub use terms::decode_terms;
pub use terms::encode_terms;
pub use terms::MissingLeaderTerm;
pub use terms::ShardTerms;
pub use terms::TermsUpdate;
pub use terms::RECOVERING_TERM_SUFFIX;

// `crate::{root_mod}` holds no code, only `mod` and `pub use` statements. No `mod` is `pub`;
// types are exported through individual use statements.
