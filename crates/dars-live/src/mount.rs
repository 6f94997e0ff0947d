use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Write access to a consumer's published state from its background task.
pub(crate) struct Guarded<S> {
    state: Arc<watch::Sender<S>>,
    cancel: CancellationToken,
}

impl<S> Guarded<S> {
    /// Apply `f` unless the owner has unmounted. `f` returns whether it
    /// changed anything; watchers are only woken when it did.
    pub(crate) fn modify(&self, f: impl FnOnce(&mut S) -> bool) -> bool {
        self.state
            .send_if_modified(|state| !self.cancel.is_cancelled() && f(state))
    }
}

/// A running background task bound to one piece of published state.
pub(crate) struct Mount {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Mount {
    pub(crate) fn spawn<S, F, Fut>(state: &Arc<watch::Sender<S>>, run: F) -> Self
    where
        S: Send + Sync + 'static,
        F: FnOnce(Guarded<S>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let work = run(Guarded {
            state: state.clone(),
            cancel: cancel.clone(),
        });
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = work => {}
            }
        });
        Self { cancel, task }
    }

    /// Stop the task. No write from it lands after this returns.
    pub(crate) fn stop<S>(self, state: &watch::Sender<S>) {
        // Cancelling under the state lock orders us after any in-flight write.
        state.send_if_modified(|_| {
            self.cancel.cancel();
            false
        });
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}
