use crate::coordinator::cache::{Lifecycle, TermsCache};
use crate::coordinator::listeners::ListenerRegistry;
use crate::coordinator::watch::WatchState;
use crate::coordinator::TermsError;
use crate::store::{CoordinationStore, StoreError, Watcher};
use crate::terms::{decode_terms, encode_terms, ShardTerms};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// TermsCore is the state shared by the coordinator's callers and its watch task.
pub(super) struct TermsCore<S: CoordinationStore> {
    pub(super) logger: slog::Logger,
    pub(super) collection: String,
    pub(super) znode_path: String,
    pub(super) cache: TermsCache,
    pub(super) listeners: ListenerRegistry,
    store: Arc<S>,
    watcher: Watcher,
    watch_state: Mutex<WatchState>,
    reconnect_timeout: Duration,
}

pub(super) enum SaveOutcome {
    Saved,
    /// Someone else wrote first. The cache has been refreshed.
    VersionConflict,
    /// The node is gone, or was re-created behind the version we hold.
    NoNode,
}

impl<S: CoordinationStore> TermsCore<S> {
    pub(super) fn new(
        logger: slog::Logger,
        collection: String,
        znode_path: String,
        store: Arc<S>,
        watcher: Watcher,
        reconnect_timeout: Duration,
    ) -> Self {
        TermsCore {
            logger,
            collection,
            znode_path,
            cache: TermsCache::new(),
            listeners: ListenerRegistry::new(),
            store,
            watcher,
            watch_state: Mutex::new(WatchState::Rearming),
            reconnect_timeout,
        }
    }

    /// Install `new_terms` if newer than the cached terms, then notify listeners.
    pub(super) fn set_new_terms(&self, new_terms: ShardTerms) -> bool {
        self.cache.install_if_newer(new_terms, |installed| {
            let dropped = self.listeners.notify(installed);
            if dropped > 0 {
                slog::debug!(self.logger, "{} listener(s) stopped listening at {:?}", dropped, installed);
            }
        })
    }

    /// Conditionally write `new_terms`, expecting the store to still be at `new_terms.version()`.
    pub(super) async fn save_terms(&self, new_terms: ShardTerms) -> Result<SaveOutcome, TermsError> {
        let data = encode_terms(&new_terms)?;
        match self.store.set_data(&self.znode_path, data, new_terms.version()).await {
            Ok(new_version) => {
                let saved = new_terms.with_version(new_version);
                slog::info!(self.logger, "Successful update of terms at {} to {:?}", self.znode_path, saved);
                self.set_new_terms(saved);
                Ok(SaveOutcome::Saved)
            }
            Err(StoreError::BadVersion { .. }) => {
                slog::info!(
                    self.logger,
                    "Failed to save terms, version is not a match, retrying version={}",
                    new_terms.version()
                );
                match self.read_and_install().await? {
                    // The cache never moves backwards, so expecting our version again can only
                    // fail again.
                    Some(store_version) if store_version < new_terms.version() => {
                        slog::error!(
                            self.logger,
                            "Shard terms node {} was re-created at version {}, behind our version {}",
                            self.znode_path,
                            store_version,
                            new_terms.version()
                        );
                        Ok(SaveOutcome::NoNode)
                    }
                    Some(_) => Ok(SaveOutcome::VersionConflict),
                    None => Ok(SaveOutcome::NoNode),
                }
            }
            Err(StoreError::NoNode(_)) => Ok(SaveOutcome::NoNode),
            Err(StoreError::Interrupted) => Err(self.interrupted("saving shard terms")),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the node and install what we find. A missing node keeps the last known terms.
    pub(super) async fn refresh_terms(&self) -> Result<(), TermsError> {
        self.read_and_install().await.map(|_| ())
    }

    /// Returns the version read from the store, or None if there is no node.
    async fn read_and_install(&self) -> Result<Option<i64>, TermsError> {
        let node = match self.store.get_data(&self.znode_path).await {
            Ok(node) => node,
            Err(StoreError::NoNode(_)) => {
                // We have likely been deleted.
                slog::warn!(self.logger, "No node found for shard terms at {}", self.znode_path);
                return Ok(None);
            }
            Err(StoreError::Interrupted) => return Err(self.interrupted("refreshing shard terms")),
            Err(e) => return Err(e.into()),
        };

        let values = decode_terms(&node.data)?;
        slog::info!(self.logger, "Refresh shard terms to version {}", node.version);
        self.set_new_terms(ShardTerms::new(values, node.version));

        Ok(Some(node.version))
    }

    /// Arm the one-shot watch on the term node. Retries until armed, unless watching becomes
    /// impossible: the coordinator is no longer active, or the store refused us for good.
    pub(super) async fn retry_register_watcher(&self) -> Result<(), TermsError> {
        self.transition_watch(WatchState::Rearming);
        while self.watching_allowed() {
            // exists() is cheaper than get_data() and also arms on a missing node.
            match self.store.exists(&self.znode_path, Some(self.watcher.clone())).await {
                Ok(_) => {
                    self.transition_watch(WatchState::Armed);
                    return Ok(());
                }
                Err(StoreError::AuthFailed) => {
                    self.stop_watching_for_good(&StoreError::AuthFailed);
                    return Ok(());
                }
                Err(StoreError::Interrupted) => return Err(self.interrupted("watching shard terms")),
                Err(e) => {
                    slog::warn!(
                        self.logger,
                        "Failed watching shard terms for collection {}, retrying! {}",
                        self.collection,
                        e
                    );
                    match self.store.wait_for_connected(self.reconnect_timeout).await {
                        Ok(()) | Err(StoreError::Timeout) => {}
                        Err(StoreError::Interrupted) => return Err(self.interrupted("watching shard terms")),
                        Err(e) => {
                            slog::warn!(self.logger, "Waiting for the store to reconnect failed: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Move the watch to `ClosedFatal`. External changes are no longer observed.
    pub(super) fn stop_watching_for_good(&self, cause: &StoreError) {
        self.transition_watch(WatchState::ClosedFatal);
        slog::error!(
            self.logger,
            "Failed watching shard terms for collection {} due to unrecoverable exception: {}",
            self.collection,
            cause
        );
    }

    pub(super) fn watch_state(&self) -> WatchState {
        *self.watch_state.lock().expect("TermsCore watch state poison")
    }

    /// `ClosedFatal` is terminal.
    pub(super) fn transition_watch(&self, next: WatchState) {
        let mut state = self.watch_state.lock().expect("TermsCore watch state poison");
        if *state != WatchState::ClosedFatal {
            *state = next;
        }
    }

    pub(super) fn watching_allowed(&self) -> bool {
        self.watch_state() != WatchState::ClosedFatal && self.cache.lifecycle() == Lifecycle::Active
    }

    pub(super) fn closed_error(&self) -> TermsError {
        TermsError::Closed(self.znode_path.clone())
    }

    fn interrupted(&self, doing: &str) -> TermsError {
        TermsError::Interrupted(format!("Error {} for collection: {}", doing, self.collection))
    }
}
