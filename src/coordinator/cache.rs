use crate::terms::ShardTerms;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Lifecycle {
    Active,
    Closed,
    /// The store reported the session as expired. Treated like `Closed`, except that the last
    /// known terms stay readable.
    SessionExpired,
}

/// TermsCache holds the latest snapshot of the shard's terms.
///
/// Reads grab the current `Arc` and never wait on an install in progress for longer than the
/// pointer swap. The swap happens under the cell's write lock alone, which is released before
/// the caller's notification runs. Notification passes are serialized by `notify_lock`, taken
/// before the swap so passes run in install order. `close()` never takes `notify_lock`, so a
/// listener may close the coordinator from inside a notification.
pub(super) struct TermsCache {
    cell: RwLock<Cell>,
    notify_lock: Mutex<()>,
}

struct Cell {
    lifecycle: Lifecycle,
    terms: Option<Arc<ShardTerms>>,
}

impl TermsCache {
    pub(super) fn new() -> Self {
        TermsCache {
            cell: RwLock::new(Cell {
                lifecycle: Lifecycle::Active,
                terms: None,
            }),
            notify_lock: Mutex::new(()),
        }
    }

    pub(super) fn snapshot(&self) -> Option<Arc<ShardTerms>> {
        self.read().terms.clone()
    }

    pub(super) fn lifecycle(&self) -> Lifecycle {
        self.read().lifecycle
    }

    /// Snapshot to compute a mutation from, or None if the cache must not be used anymore.
    pub(super) fn active_snapshot(&self) -> Option<Arc<ShardTerms>> {
        let cell = self.read();
        match cell.lifecycle {
            Lifecycle::Active => cell.terms.clone(),
            Lifecycle::Closed | Lifecycle::SessionExpired => None,
        }
    }

    /// Install `new_terms` iff the cache is active and either empty or holding an older version.
    /// `on_installed` runs after the swap, outside the cell lock, serialized against every other
    /// notification pass.
    ///
    /// CAS: Return true if we installed `new_terms`.
    pub(super) fn install_if_newer<F>(&self, new_terms: ShardTerms, on_installed: F) -> bool
    where
        F: FnOnce(&ShardTerms),
    {
        let _serialized = self.notify_lock.lock().expect("TermsCache notify lock poison");

        let installed = {
            let mut cell = self.cell.write().expect("TermsCache cell lock poison");
            if cell.lifecycle != Lifecycle::Active {
                return false;
            }
            let is_newer = cell
                .terms
                .as_ref()
                .map_or(true, |current| new_terms.version() > current.version());
            if is_newer {
                let new_terms = Arc::new(new_terms);
                cell.terms.replace(new_terms.clone());
                Some(new_terms)
            } else {
                None
            }
        };

        match installed {
            Some(terms) => {
                on_installed(terms.as_ref());
                true
            }
            None => false,
        }
    }

    /// Run `f` with the current terms, serialized against notification passes.
    pub(super) fn with_current<F>(&self, f: F) -> bool
    where
        F: FnOnce(&ShardTerms),
    {
        let _serialized = self.notify_lock.lock().expect("TermsCache notify lock poison");
        match self.snapshot() {
            Some(current) => {
                f(current.as_ref());
                true
            }
            None => false,
        }
    }

    /// Drop the terms for good. A notification pass already running finishes with the terms it
    /// was handed; no install starts afterwards.
    pub(super) fn close(&self) {
        let mut cell = self.cell.write().expect("TermsCache cell lock poison");
        cell.lifecycle = Lifecycle::Closed;
        cell.terms = None;
    }

    /// Returns false if the cache was no longer active.
    pub(super) fn mark_session_expired(&self) -> bool {
        let mut cell = self.cell.write().expect("TermsCache cell lock poison");
        if cell.lifecycle != Lifecycle::Active {
            return false;
        }
        cell.lifecycle = Lifecycle::SessionExpired;
        true
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Cell> {
        self.cell.read().expect("TermsCache cell lock poison")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use std::collections::HashMap;
    use std::thread;

    fn version(v: i64) -> ShardTerms {
        ShardTerms::new(HashMap::new(), v)
    }

    #[test]
    fn only_strictly_newer_versions_are_installed() {
        let cache = TermsCache::new();
        let mut notified = vec![];

        assert!(cache.install_if_newer(version(3), |t| notified.push(t.version())));
        assert!(!cache.install_if_newer(version(3), |t| notified.push(t.version())));
        assert!(!cache.install_if_newer(version(2), |t| notified.push(t.version())));
        assert!(cache.install_if_newer(version(4), |t| notified.push(t.version())));

        assert_eq!(notified, vec![3, 4]);
        assert_eq!(cache.snapshot().map(|t| t.version()), Some(4));
    }

    #[test]
    fn concurrent_installs_are_monotonic() {
        let cache = Arc::new(TermsCache::new());
        let notified = Arc::new(Mutex::new(vec![]));

        let mut versions: Vec<i64> = (0..400).collect();
        versions.shuffle(&mut rand::thread_rng());

        let handles: Vec<_> = versions
            .chunks(50)
            .map(|chunk| {
                let chunk = chunk.to_vec();
                let cache = cache.clone();
                let notified = notified.clone();
                thread::spawn(move || {
                    let mut observed = vec![];
                    for v in chunk {
                        cache.install_if_newer(version(v), |t| notified.lock().unwrap().push(t.version()));
                        observed.push(cache.snapshot().unwrap().version());
                    }
                    // Any single reader sees a non-decreasing sequence.
                    assert!(observed.windows(2).all(|w| w[0] <= w[1]), "{:?}", observed);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let notified = notified.lock().unwrap();
        assert!(notified.windows(2).all(|w| w[0] < w[1]), "{:?}", notified);
        assert_eq!(notified.last(), Some(&399));
    }

    #[test]
    fn closed_cache_rejects_installs() {
        let cache = TermsCache::new();
        assert!(cache.install_if_newer(version(1), |_| {}));
        cache.close();

        assert_eq!(cache.lifecycle(), Lifecycle::Closed);
        assert!(cache.snapshot().is_none());
        assert!(!cache.install_if_newer(version(2), |_| panic!("Closed cache must not notify")));
        assert!(!cache.mark_session_expired());
    }

    #[test]
    fn close_from_inside_notification() {
        let cache = Arc::new(TermsCache::new());
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        let closer = cache.clone();
        thread::spawn(move || {
            let installed = closer.install_if_newer(version(1), |_| closer.close());
            let _ = done_tx.send(installed);
        });

        let installed = done_rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .expect("Closing from a notification must not block");
        assert!(installed);
        assert_eq!(cache.lifecycle(), Lifecycle::Closed);
        assert!(!cache.install_if_newer(version(2), |_| panic!("Closed cache must not notify")));
    }

    #[test]
    fn expired_cache_keeps_last_terms_readable() {
        let cache = TermsCache::new();
        assert!(cache.install_if_newer(version(1), |_| {}));
        assert!(cache.mark_session_expired());

        assert_eq!(cache.snapshot().map(|t| t.version()), Some(1));
        assert!(cache.active_snapshot().is_none());
        assert!(!cache.install_if_newer(version(2), |_| {}));
    }
}
