use crate::coordinator::cache::Lifecycle;
use crate::coordinator::terms_core::{SaveOutcome, TermsCore};
use crate::coordinator::listeners::{ListenerId, TermsListener};
use crate::coordinator::options::{ShardTermsConfig, ShardTermsOptionsValidated};
use crate::coordinator::stop_signal::{self, Stopper};
use crate::coordinator::watch::{WatchState, WatchTask};
use crate::coordinator::TermsError;
use crate::store::{CoordinationStore, Watcher};
use crate::terms::{ShardTerms, TermsUpdate};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Term reported for a replica that has not registered.
pub const UNREGISTERED_TERM: i64 = -1;

/// ShardTermsCoordinator keeps a local view of one shard's term node in sync with the store.
///
/// Mutators compute the next terms from the cached snapshot and write them with a version check.
/// Losing the race refreshes the cache and recomputes. External changes arrive through a watch
/// and are installed through the same path, so the cached version never goes backwards.
///
/// The coordinator must not be reused once closed, or once the store reports its session as
/// expired. Mutators then fail with `TermsError::Closed`; queries answer from whatever is cached.
pub struct ShardTermsCoordinator<S: CoordinationStore + 'static> {
    core: Arc<TermsCore<S>>,
    remove_max_attempts: u32,
    watch_stopper: Stopper,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RemovalOutcome {
    /// Our write removed the replica. The coordinator can still be used.
    Removed,
    /// Stop using this coordinator.
    Discard(DiscardReason),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiscardReason {
    /// The replica had no term to begin with.
    AlreadyAbsent,
    /// The term node is gone, and the replica's term with it.
    NodeMissing,
    /// Every attempt lost the write race.
    RetriesExhausted,
}

impl RemovalOutcome {
    pub fn should_discard(&self) -> bool {
        matches!(self, RemovalOutcome::Discard(_))
    }
}

impl<S: CoordinationStore + 'static> ShardTermsCoordinator<S> {
    /// Read the shard's term node and start watching it. A missing node is not an error: the
    /// coordinator starts from empty, unpersisted terms.
    pub async fn create(config: ShardTermsConfig, store: Arc<S>) -> Result<Self, TermsError> {
        let options = ShardTermsOptionsValidated::try_new(
            &config.collection,
            &config.shard,
            config.options,
            store.client_timeout(),
        )
        .map_err(TermsError::InvalidOptions)?;

        let logger = config.logger.new(slog::o!(
            "collection" => config.collection.clone(),
            "shard" => config.shard.clone(),
            "path" => options.znode_path.clone(),
        ));
        let (watcher, watch_events) = Watcher::new();
        let core = Arc::new(TermsCore::new(
            logger,
            config.collection,
            options.znode_path,
            store,
            watcher,
            options.reconnect_timeout,
        ));

        core.set_new_terms(ShardTerms::unpersisted());
        core.refresh_terms().await.map_err(|e| match e {
            TermsError::Store(e) => TermsError::InitialRead(e),
            e => e,
        })?;
        core.retry_register_watcher().await?;

        let (watch_stopper, stop_check) = stop_signal::new();
        tokio::spawn(WatchTask::new(core.clone(), watch_events, stop_check).run());

        slog::info!(core.logger, "Watching shard terms at {}", core.znode_path);
        Ok(ShardTermsCoordinator {
            core,
            remove_max_attempts: options.remove_max_attempts,
            watch_stopper,
        })
    }

    /// Ensure the leader's term is higher than the terms of `replicas_needing_recovery`.
    pub async fn ensure_terms_is_higher(
        &self,
        leader: &str,
        replicas_needing_recovery: &HashSet<String>,
    ) -> Result<(), TermsError> {
        slog::debug!(
            self.core.logger,
            "ensure_terms_is_higher leader={} replicas_needing_recovery={:?}",
            leader,
            replicas_needing_recovery
        );
        if replicas_needing_recovery.is_empty() {
            return Ok(());
        }

        self.force_update("ensure_terms_is_higher", |terms| {
            Ok(terms.increase_terms(leader, replicas_needing_recovery)?)
        })
        .await
    }

    /// Register a replica's term at 0. Does nothing if the replica already has a term.
    pub async fn register_term(&self, replica: &str) -> Result<(), TermsError> {
        self.force_update("register_term", |terms| Ok(terms.register_term(replica)))
            .await
    }

    /// Set a replica's term equal to the leader's, and clear its recovering flag. Only meant for
    /// forcing a leader.
    pub async fn set_term_equals_to_leader(&self, replica: &str) -> Result<(), TermsError> {
        self.force_update("set_term_equals_to_leader", |terms| {
            Ok(terms.set_term_equals_to_leader(replica))
        })
        .await
    }

    pub async fn set_term_to_zero(&self, replica: &str) -> Result<(), TermsError> {
        self.force_update("set_term_to_zero", |terms| Ok(terms.set_term_to_zero(replica)))
            .await
    }

    /// Mark `replica` as recovering.
    pub async fn start_recovering(&self, replica: &str) -> Result<(), TermsError> {
        self.force_update("start_recovering", |terms| Ok(terms.start_recovering(replica)))
            .await
    }

    /// Mark `replica` as done recovering.
    pub async fn done_recovering(&self, replica: &str) -> Result<(), TermsError> {
        self.force_update("done_recovering", |terms| Ok(terms.done_recovering(replica)))
            .await
    }

    /// When the first updates come in, all replicas have some data, so terms move from 0
    /// (registered) to 1 (have some data).
    pub async fn ensure_highest_terms_are_not_zero(&self) -> Result<(), TermsError> {
        self.force_update("ensure_highest_terms_are_not_zero", |terms| {
            Ok(terms.ensure_highest_terms_are_not_zero())
        })
        .await
    }

    /// Remove `replica`'s term (and recovering flag).
    ///
    /// Unlike the other mutators, this gives up after a bounded number of lost write races.
    /// Under sustained contention that bound is the only thing that keeps a remove from
    /// starving, and the other mutators have none.
    pub async fn remove_term(&self, replica: &str) -> Result<RemovalOutcome, TermsError> {
        let mut attempts = 0;
        loop {
            let current = self.active_snapshot()?;
            let new_terms = match current.remove_term(replica) {
                TermsUpdate::NoChange => return Ok(RemovalOutcome::Discard(DiscardReason::AlreadyAbsent)),
                TermsUpdate::Apply(new_terms) => new_terms,
            };

            match self.core.save_terms(new_terms).await? {
                SaveOutcome::Saved => return Ok(RemovalOutcome::Removed),
                SaveOutcome::NoNode => return Ok(RemovalOutcome::Discard(DiscardReason::NodeMissing)),
                SaveOutcome::VersionConflict => tokio::task::yield_now().await,
            }

            attempts += 1;
            if attempts >= self.remove_max_attempts {
                slog::warn!(
                    self.core.logger,
                    "Could not save terms to the store within {} tries",
                    attempts
                );
                return Ok(RemovalOutcome::Discard(DiscardReason::RetriesExhausted));
            }
        }
    }

    /// Remove the term of a core that is going away. Listeners are offered the current terms
    /// first, so listeners of cores that are already closed get dropped.
    pub async fn remove_term_for_core(&self, replica: &str) -> Result<RemovalOutcome, TermsError> {
        let core = &self.core;
        core.cache.with_current(|current| {
            let dropped = core.listeners.notify(current);
            slog::debug!(
                core.logger,
                "Removing term of {}, dropped {} listener(s), {} left",
                replica,
                dropped,
                core.listeners.len()
            );
        });

        self.remove_term(replica).await
    }

    /// Re-read the term node and install it if it is newer than what we have.
    pub async fn refresh_terms(&self) -> Result<(), TermsError> {
        if self.core.cache.lifecycle() != Lifecycle::Active {
            return Err(self.core.closed_error());
        }
        self.core.refresh_terms().await
    }

    /// Can this replica become leader?
    pub fn can_become_leader(&self, replica: &str) -> bool {
        self.shard_terms()
            .map_or(false, |terms| terms.can_become_leader(replica))
    }

    /// Should the leader skip sending updates to this replica? True unless the replica holds the
    /// highest term.
    pub fn skip_sending_updates_to(&self, replica: &str) -> bool {
        let terms = self.shard_terms();
        slog::debug!(self.core.logger, "skip_sending_updates_to {} {:?}", replica, terms);
        terms.map_or(true, |terms| !terms.have_highest_term_value(replica))
    }

    /// Did this replica register its term?
    pub fn registered(&self, replica: &str) -> bool {
        self.shard_terms()
            .map_or(false, |terms| terms.term(replica).is_some())
    }

    pub fn is_recovering(&self, replica: &str) -> bool {
        self.shard_terms()
            .map_or(false, |terms| terms.is_recovering(replica))
    }

    /// The replica's term, or `UNREGISTERED_TERM`.
    pub fn term(&self, replica: &str) -> i64 {
        self.shard_terms()
            .and_then(|terms| terms.term(replica))
            .unwrap_or(UNREGISTERED_TERM)
    }

    pub fn highest_term(&self) -> i64 {
        self.shard_terms().map_or(0, |terms| terms.max_term())
    }

    /// Latest snapshot, or None once closed.
    pub fn shard_terms(&self) -> Option<Arc<ShardTerms>> {
        self.core.cache.snapshot()
    }

    /// Copy of the latest replica to term mapping. Empty once closed.
    pub fn terms(&self) -> HashMap<String, i64> {
        self.shard_terms()
            .map(|terms| terms.values().clone())
            .unwrap_or_default()
    }

    /// Listeners are called the next time the shard's terms get updated. Once closed, the
    /// listener is closed right away instead.
    pub fn add_listener(&self, listener: Arc<dyn TermsListener>) -> ListenerId {
        self.core.listeners.add(listener)
    }

    /// Returns false if the listener was not registered (anymore).
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.listeners.remove(id).is_some()
    }

    pub fn num_listeners(&self) -> usize {
        self.core.listeners.len()
    }

    pub fn watch_state(&self) -> WatchState {
        self.core.watch_state()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.core.cache.lifecycle()
    }

    pub fn znode_path(&self) -> &str {
        &self.core.znode_path
    }

    /// Stop watching, close and drop every listener, and drop the cached terms. The
    /// coordinator must not be reused afterwards.
    pub fn close(&self) {
        self.watch_stopper.stop();
        self.core.cache.close();
        self.core.listeners.close_all();
        slog::info!(self.core.logger, "Closed shard terms at {}", self.core.znode_path);
    }

    /// The shared shape of every "force" mutator: compute, conditionally write, and on a lost
    /// race recompute from the refreshed terms. Retries without bound. A missing (or re-created)
    /// node abandons the mutation.
    async fn force_update<T>(&self, operation: &str, transform: T) -> Result<(), TermsError>
    where
        T: Fn(&ShardTerms) -> Result<TermsUpdate, TermsError>,
    {
        loop {
            let current = self.active_snapshot()?;
            let new_terms = match transform(&current)? {
                TermsUpdate::NoChange => return Ok(()),
                TermsUpdate::Apply(new_terms) => new_terms,
            };

            match self.core.save_terms(new_terms).await? {
                SaveOutcome::Saved => return Ok(()),
                SaveOutcome::VersionConflict => tokio::task::yield_now().await,
                SaveOutcome::NoNode => {
                    slog::error!(
                        self.core.logger,
                        "No node exists in the store to save terms to, {} gives up",
                        operation
                    );
                    return Ok(());
                }
            }
        }
    }

    fn active_snapshot(&self) -> Result<Arc<ShardTerms>, TermsError> {
        self.core
            .cache
            .active_snapshot()
            .ok_or_else(|| self.core.closed_error())
    }
}
