//! Concurrency gate for market data requests
//!
//! Bounds the number of in-flight fetches across all validations sharing the
//! gate, so simultaneous symbol validations stay under upstream rate limits.

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Fixed-size gate; clones share the same permits
#[derive(Debug, Clone)]
pub struct FetchGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl FetchGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a slot; the slot is released when the permit drops
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.permits).acquire_owned().await
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_clamped() {
        assert_eq!(FetchGate::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let gate = FetchGate::new(2);
        let permit = gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 1);
        drop(permit);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_clone_shares_permits() {
        let gate = FetchGate::new(3);
        let other = gate.clone();
        let _permit = other.acquire().await.unwrap();
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn test_bounds_concurrency() {
        let gate = FetchGate::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _permit = gate.acquire().await.unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
