use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Single-shot timer backing the human-handoff window.
///
/// Arming spawns one task that sleeps for the full timeout and then runs the
/// expiry action exactly once. Cancelling aborts the sleeping task, so a
/// cancelled timer can never run its action. Callers that rearm must cancel
/// the previous timer first; at most one expiry action may run per handoff.
#[derive(Debug)]
pub struct HandoffTimer {
    task: JoinHandle<()>,
}

impl HandoffTimer {
    /// Arms the timer; `on_expire` runs once after `timeout` unless cancelled.
    pub fn start<F>(timeout: Duration, on_expire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_expire.await;
        });
        Self { task }
    }

    /// Stops the timer before it fires.
    pub fn cancel(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_expiry(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_exactly_once_after_the_timeout() {
        let fired = Arc::new(AtomicUsize::new(0));
        let _timer = HandoffTimer::start(Duration::from_secs(120), counting_expiry(&fired));

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = HandoffTimer::start(Duration::from_secs(120), counting_expiry(&fired));
        timer.cancel();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_cancels_the_first_timer() {
        let first_fired = Arc::new(AtomicUsize::new(0));
        let second_fired = Arc::new(AtomicUsize::new(0));

        let first = HandoffTimer::start(Duration::from_secs(120), counting_expiry(&first_fired));
        tokio::time::sleep(Duration::from_secs(60)).await;

        first.cancel();
        let _second = HandoffTimer::start(Duration::from_secs(120), counting_expiry(&second_fired));

        // Past the first deadline, before the second.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(first_fired.load(Ordering::SeqCst), 0);
        assert_eq!(second_fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(first_fired.load(Ordering::SeqCst), 0);
        assert_eq!(second_fired.load(Ordering::SeqCst), 1);
    }
}
