use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const ACQUIRE_RETRY_PAUSE: Duration = Duration::from_millis(100);

/// Fixed-size permit pool bounding how many transfers are in flight at once.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    permits: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// Holding one authorizes one transfer; dropping it returns it to the pool.
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl AdmissionController {
    pub fn new(workers: usize) -> Self {
        let capacity = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Waits for a free permit. Failures of the underlying semaphore are
    /// retried, so this only returns once a permit is held.
    pub async fn acquire(&self) -> Permit {
        loop {
            match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => {
                    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    self.peak.fetch_max(now, Ordering::SeqCst);
                    return Permit {
                        _permit: permit,
                        in_flight: Arc::clone(&self.in_flight),
                    };
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to acquire admission permit, retrying");
                    tokio::time::sleep(ACQUIRE_RETRY_PAUSE).await;
                }
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits ever held at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(Self::default_workers())
    }
}

impl Permit {
    pub fn release(self) {}
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
