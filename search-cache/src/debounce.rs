use futures::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Trailing-edge debouncer.
///
/// Every call to [`Debouncer::schedule`] supersedes the previous one, so only
/// the last scheduled task runs once the delay has passed without another
/// call. Each schedule hands its task a ticket; a task that takes locks of its
/// own should re-check [`Debouncer::is_current`] under those locks, since a
/// cancel can land between the timer firing and the task running.
pub struct Debouncer {
    delay: Duration,
    epoch: Arc<AtomicU64>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            epoch: Arc::new(AtomicU64::new(0)),
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `task` to run after the delay, cancelling any pending task
    pub fn schedule<F, Fut>(&self, task: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ticket = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let epoch = Arc::clone(&self.epoch);
        let delay = self.delay;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if epoch.load(Ordering::SeqCst) != ticket {
                log::debug!("Debounce ticket {} superseded before firing", ticket);
                return;
            }
            task(ticket).await;
        });

        if let Some(previous) = self.lock_pending().replace(handle) {
            previous.abort();
        }
        log::debug!("Debounce ticket {} scheduled in {:?}", ticket, delay);
        ticket
    }

    /// Cancel the pending task, returns whether one was still waiting
    pub fn cancel(&self) -> bool {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        match self.lock_pending().take() {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                if was_pending {
                    log::debug!("Pending debounce cancelled");
                }
                was_pending
            }
            None => false,
        }
    }

    /// Whether `ticket` belongs to the most recent, uncancelled schedule
    pub fn is_current(&self, ticket: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == ticket
    }

    pub fn is_pending(&self) -> bool {
        self.lock_pending()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
