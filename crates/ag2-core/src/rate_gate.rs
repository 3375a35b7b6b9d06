//! C1: a single-lane gate enforcing a minimum interval between consecutive
//! `wait()` admissions. FIFO ordering falls out of `tokio::sync::Mutex`'s
//! own waiter queue — whoever calls `wait()` first acquires the lock first.
//! A failing operation downstream of `wait()` never touches the gate, so
//! the lane can't be broken by caller failure (P1).

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

pub struct RateGate {
    min_gap: Duration,
    last_admission: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_gap_ms: u64) -> Self {
        Self {
            min_gap: Duration::from_millis(min_gap_ms),
            last_admission: Mutex::new(None),
        }
    }

    /// The private upstream's default gap (spec §4.1).
    pub fn for_upstream() -> Self {
        Self::new(500)
    }

    /// Blocks until it is this caller's turn, then records the admission.
    pub async fn wait(&self) {
        let mut guard = self.last_admission.lock().await;
        let now = Instant::now();
        if let Some(last) = *guard {
            let target = last + self.min_gap;
            if target > now {
                sleep(target - now).await;
            }
        }
        *guard = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread")]
    async fn consecutive_admissions_respect_gap() {
        let gate = Arc::new(RateGate::new(30));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.wait().await;
                Instant::now()
            }));
        }
        let mut timestamps = Vec::new();
        for handle in handles {
            timestamps.push(handle.await.unwrap());
        }
        timestamps.sort();
        for pair in timestamps.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(30));
        }
    }

    #[tokio::test]
    async fn gate_remains_usable_after_simulated_failure() {
        let gate = RateGate::new(10);
        gate.wait().await;
        // Simulate the operation after wait() failing — the gate is never told,
        // so a subsequent waiter is still admitted `min_gap` later.
        let before = Instant::now();
        gate.wait().await;
        assert!(Instant::now().duration_since(before) >= Duration::from_millis(10));
    }
}
