use crate::store::StoreError;
use crate::terms::MissingLeaderTerm;

#[derive(Debug, thiserror::Error)]
pub enum TermsError {
    /// The coordinator was closed, or its store session expired. It must not be reused.
    #[error("Shard terms for {0} are closed")]
    Closed(String),

    #[error("Could not read initial shard terms")]
    InitialRead(#[source] StoreError),

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Malformed shard terms: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    LeaderTermNotFound(#[from] MissingLeaderTerm),

    #[error("Illegal options for shard terms: {0}")]
    InvalidOptions(String),
}
