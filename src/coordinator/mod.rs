mod cache;
mod coordinator;
mod errors;
mod listeners;
mod options;
mod stop_signal;
mod terms_core;
mod watch;

pub use cache::Lifecycle;
pub use coordinator::DiscardReason;
pub use coordinator::RemovalOutcome;
pub use coordinator::ShardTermsCoordinator;
pub use coordinator::UNREGISTERED_TERM;
pub use errors::TermsError;
pub use listeners::ListenerId;
pub use listeners::TermsListener;
pub use options::ShardTermsConfig;
pub use options::ShardTermsOptions;
pub use watch::WatchState;
