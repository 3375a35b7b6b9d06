//! C4: per-account pre-expiry refresh timers. Fires at `expiryMs - 10min`
//! (floored at zero) and calls back into [`crate::auth_manager`]'s single
//! -flight refresh; re-arms 60s later on failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const PRE_EXPIRY_MARGIN_MS: i64 = 10 * 60 * 1000;
const RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Holds the currently-scheduled timer task for one account, if any.
/// Scheduling cancels whatever was previously armed.
#[derive(Default)]
pub struct RefreshTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `expiry_ms` is an absolute unix-epoch millisecond deadline. `refresh`
    /// is the callback to invoke when the timer fires; it returns whether
    /// the refresh succeeded.
    pub async fn schedule<F, Fut>(self: &Arc<Self>, expiry_ms: i64, refresh: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = bool> + Send,
    {
        self.cancel().await;
        let delay = delay_until(expiry_ms);
        let refresh = Arc::new(refresh);
        let weak_self = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            loop {
                let ok = (refresh)().await;
                if ok {
                    return;
                }
                tokio::time::sleep(RETRY_BACKOFF).await;
                if weak_self.upgrade().is_none() {
                    return;
                }
            }
        });
        *self.handle.lock().await = Some(handle);
    }

    pub async fn cancel(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }
}

/// `max(0, expiryMs - 10min - now)`, as a sleep duration.
fn delay_until(expiry_ms: i64) -> Duration {
    let now_ms = now_unix_ms();
    let fire_at = (expiry_ms - PRE_EXPIRY_MARGIN_MS).max(now_ms);
    Duration::from_millis((fire_at - now_ms).max(0) as u64)
}

pub fn now_unix_ms() -> i64 {
    let now = time::OffsetDateTime::now_utc();
    (now.unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floors_delay_at_zero_for_already_expired() {
        let past = now_unix_ms() - 1_000_000;
        assert_eq!(delay_until(past), Duration::from_millis(0));
    }

    #[test]
    fn schedules_ten_minutes_before_expiry() {
        let future = now_unix_ms() + PRE_EXPIRY_MARGIN_MS + 5_000;
        let delay = delay_until(future);
        assert!(delay >= Duration::from_millis(4_000) && delay <= Duration::from_millis(5_500));
    }

    #[tokio::test]
    async fn cancel_aborts_pending_timer() {
        let timer = Arc::new(RefreshTimer::new());
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = fired.clone();
        timer
            .schedule(now_unix_ms() + 50, move || {
                let fired = fired_clone.clone();
                async move {
                    fired.store(true, std::sync::atomic::Ordering::SeqCst);
                    true
                }
            })
            .await;
        timer.cancel().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
