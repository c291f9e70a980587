use crate::terms::ShardTerms;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Listener of a core for the shard's term changes.
pub trait TermsListener: Send + Sync {
    /// Invoked with the terms after every accepted update. Invocations are never concurrent.
    ///
    /// **Note**: there is no guarantee that versions are strictly monotonic across invocations.
    /// An invocation with a newer version *can* be followed by one with an older version, and
    /// implementations are required to be resilient to out-of-order invocations.
    ///
    /// Return true to keep receiving updates. A listener returning false is removed at once and
    /// is not closed.
    fn on_term_changed(&self, terms: &ShardTerms) -> bool;

    /// Invoked once when the coordinator closes.
    fn close(&self);
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct ListenerId(u64);

/// Membership can change from any thread. Notification passes are serialized by the caller
/// (the cache notify lock), not by the registry.
pub(super) struct ListenerRegistry {
    next_id: AtomicU64,
    members: Mutex<Members>,
}

struct Members {
    listeners: HashMap<ListenerId, Arc<dyn TermsListener>>,
    closed: bool,
}

impl ListenerRegistry {
    pub(super) fn new() -> Self {
        ListenerRegistry {
            next_id: AtomicU64::new(0),
            members: Mutex::new(Members {
                listeners: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Once the registry is closed, `listener` is closed at once instead of registered.
    pub(super) fn add(&self, listener: Arc<dyn TermsListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let rejected = {
            let mut members = self.lock();
            if members.closed {
                Some(listener)
            } else {
                members.listeners.insert(id, listener);
                None
            }
        };
        if let Some(listener) = rejected {
            listener.close();
        }
        id
    }

    pub(super) fn remove(&self, id: ListenerId) -> Option<Arc<dyn TermsListener>> {
        self.lock().listeners.remove(&id)
    }

    pub(super) fn len(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Offer `terms` to every listener and drop the ones that decline further updates.
    /// Listeners are invoked without holding the registry lock, so they may add or remove
    /// listeners themselves.
    ///
    /// Returns the number of listeners dropped.
    pub(super) fn notify(&self, terms: &ShardTerms) -> usize {
        let current: Vec<_> = self
            .lock()
            .listeners
            .iter()
            .map(|(id, listener)| (*id, listener.clone()))
            .collect();

        let declined: Vec<_> = current
            .into_iter()
            .filter(|(_, listener)| !listener.on_term_changed(terms))
            .map(|(id, _)| id)
            .collect();

        let mut members = self.lock();
        for id in declined.iter() {
            members.listeners.remove(id);
        }
        declined.len()
    }

    /// Remove every listener and close it. Listeners added afterwards are closed on arrival.
    pub(super) fn close_all(&self) {
        let drained: Vec<_> = {
            let mut members = self.lock();
            members.closed = true;
            members.listeners.drain().map(|(_, listener)| listener).collect()
        };
        for listener in drained {
            listener.close();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Members> {
        self.members.lock().expect("ListenerRegistry mutex guard poison")
    }
}
