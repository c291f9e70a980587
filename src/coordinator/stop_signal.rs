use tokio::sync::watch;

/// Stops the watch task when `stop()` is called or when dropped.
pub(super) struct Stopper {
    stop_signal: watch::Sender<bool>,
}

pub(super) struct StopCheck {
    stop_signal: watch::Receiver<bool>,
}

impl Stopper {
    pub(super) fn stop(&self) {
        let _ = self.stop_signal.send(true);
    }
}

impl Drop for Stopper {
    fn drop(&mut self) {
        self.stop();
    }
}

impl StopCheck {
    pub(super) fn should_stop(&self) -> bool {
        *self.stop_signal.borrow()
    }

    /// Resolves once stopped. A dropped `Stopper` counts as stopped.
    pub(super) async fn stopped(&mut self) {
        while !*self.stop_signal.borrow() {
            if self.stop_signal.changed().await.is_err() {
                return;
            }
        }
    }
}

pub(super) fn new() -> (Stopper, StopCheck) {
    let (tx, rx) = watch::channel(false);

    (Stopper { stop_signal: tx }, StopCheck { stop_signal: rx })
}
