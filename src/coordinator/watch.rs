use crate::coordinator::cache::Lifecycle;
use crate::coordinator::terms_core::TermsCore;
use crate::coordinator::stop_signal::StopCheck;
use crate::coordinator::TermsError;
use crate::store::{CoordinationStore, EventType, SessionState, StoreError, WatchEvents, WatchedEvent};
use std::sync::Arc;

/// State of the one-shot watch on the term node.
///
/// ```text
///            arm ok                      data event
/// Rearming --------> Armed -----------------------------> Firing
///    ^  |                                                   |
///    |  | auth failure (refused re-arm or session event)    |
///    |  v                                                   |
///    | ClosedFatal                                          |
///    +------------------------------------------------------+
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WatchState {
    /// A notification is pending in the store.
    Armed,
    /// A notification was delivered; the watch is consumed.
    Firing,
    /// Registering the watch, possibly waiting for the store to reconnect.
    Rearming,
    /// The store refused the watch for good. External changes are no longer observed.
    ClosedFatal,
}

/// WatchTask is the single consumer of watch notifications. Notifications are handled one at a
/// time, in delivery order.
pub(super) struct WatchTask<S: CoordinationStore> {
    core: Arc<TermsCore<S>>,
    events: WatchEvents,
    stop_check: StopCheck,
}

impl<S: CoordinationStore + 'static> WatchTask<S> {
    pub(super) fn new(core: Arc<TermsCore<S>>, events: WatchEvents, stop_check: StopCheck) -> Self {
        WatchTask {
            core,
            events,
            stop_check,
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.stop_check.stopped() => return,
                event = self.events.next() => match event {
                    Some(event) => event,
                    None => return,
                },
            };
            if self.stop_check.should_stop() {
                return;
            }

            if let Err(e) = Self::handle(&self.core, event).await {
                slog::error!(self.core.logger, "Watching shard terms stopped by unexpected error: {}", e);
                self.core.transition_watch(WatchState::ClosedFatal);
            }

            if self.core.watch_state() == WatchState::ClosedFatal || self.core.cache.lifecycle() != Lifecycle::Active {
                slog::info!(self.core.logger, "No longer watching shard terms at {}", self.core.znode_path);
                return;
            }
        }
    }

    async fn handle(core: &TermsCore<S>, event: WatchedEvent) -> Result<(), TermsError> {
        match event.event_type {
            // Session events are not change events, and do not consume the watch.
            EventType::None => {
                match event.session_state {
                    SessionState::Expired => {
                        if core.cache.mark_session_expired() {
                            slog::warn!(
                                core.logger,
                                "Store session expired, shard terms at {} must not be reused",
                                core.znode_path
                            );
                        }
                    }
                    // Re-arming would be refused from now on.
                    SessionState::AuthFailed => core.stop_watching_for_good(&StoreError::AuthFailed),
                    SessionState::SyncConnected | SessionState::Disconnected => {}
                }
                Ok(())
            }
            EventType::NodeCreated | EventType::NodeDataChanged => {
                core.transition_watch(WatchState::Firing);
                core.retry_register_watcher().await?;
                // Some events may be missed while re-arming, so always refresh after re-arming.
                match core.refresh_terms().await {
                    Ok(()) => Ok(()),
                    Err(e @ TermsError::Interrupted(_)) => Err(e),
                    Err(e) => {
                        slog::warn!(core.logger, "Could not refresh terms: {}", e);
                        Ok(())
                    }
                }
            }
            // Nothing to read, but keep watching so a re-created node is noticed.
            EventType::NodeDeleted => {
                slog::info!(core.logger, "Shard terms node {} was deleted", core.znode_path);
                core.transition_watch(WatchState::Firing);
                core.retry_register_watcher().await
            }
            EventType::NodeChildrenChanged => Ok(()),
        }
    }
}
