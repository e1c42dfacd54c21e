//! Resource guard — scoped ownership of the single stay-awake lease.
//!
//! At most one lease is outstanding per guard. Acquiring while a lease is
//! held releases the old one first (replace, never stack), and every lease
//! is released exactly once: by its `Drop`, or by the acquisition that
//! replaced it.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::LeaseError;

/// Platform stay-awake primitive.
pub trait WakeLock: Send + Sync {
    /// Acquire the lock; the platform drops it on its own after `timeout`.
    fn acquire(&self, timeout: Duration);
    fn release(&self);
}

/// Wake lock for hosts without a platform lock (daemons, containers).
pub struct ProcessWakeLock;

impl WakeLock for ProcessWakeLock {
    fn acquire(&self, timeout: Duration) {
        debug!(timeout_secs = timeout.as_secs(), "Wake lock acquired");
    }

    fn release(&self) {
        debug!("Wake lock released");
    }
}

/// Owner of the lease slot.
pub struct ResourceGuard {
    lock: Arc<dyn WakeLock>,
    ceiling: Duration,
    held: Arc<Mutex<Option<Uuid>>>,
}

impl ResourceGuard {
    pub fn new(lock: Arc<dyn WakeLock>, ceiling: Duration) -> Self {
        Self {
            lock,
            ceiling,
            held: Arc::new(Mutex::new(None)),
        }
    }

    /// Acquire a lease for `min(requested, ceiling)`, replacing any held one.
    pub fn acquire(&self, requested: Duration) -> Lease {
        let duration = requested.min(self.ceiling);
        let id = Uuid::new_v4();

        let mut slot = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(stale) = slot.take() {
            debug!(lease = %stale, "Releasing lease replaced by new acquisition");
            self.lock.release();
        }
        self.lock.acquire(duration);
        *slot = Some(id);
        drop(slot);

        debug!(lease = %id, duration_secs = duration.as_secs_f64(), "Lease acquired");
        Lease {
            id,
            duration,
            deadline: Instant::now() + duration,
            lock: Arc::clone(&self.lock),
            held: Arc::clone(&self.held),
        }
    }

    /// Run `body` under a fresh lease, bounded by the lease duration.
    ///
    /// The lease is released on every exit path, including timeout and panic.
    pub async fn with_lease<F>(&self, requested: Duration, body: F) -> Result<F::Output, LeaseError>
    where
        F: Future,
    {
        let lease = self.acquire(requested);
        lease.run(body).await
    }

    /// Whether a lease is currently outstanding.
    pub fn is_held(&self) -> bool {
        self.held.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

/// An acquired lease. Released on drop unless already replaced.
pub struct Lease {
    id: Uuid,
    duration: Duration,
    deadline: Instant,
    lock: Arc<dyn WakeLock>,
    held: Arc<Mutex<Option<Uuid>>>,
}

impl Lease {
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Drive `body` until it completes or the lease runs out.
    ///
    /// On expiry `body` is dropped, which cancels everything it owns.
    pub async fn run<F>(&self, body: F) -> Result<F::Output, LeaseError>
    where
        F: Future,
    {
        match tokio::time::timeout_at(self.deadline, body).await {
            Ok(output) => Ok(output),
            Err(_) => {
                warn!(lease = %self.id, after_secs = self.duration.as_secs_f64(), "Lease expired, cancelling work");
                Err(LeaseError::Expired {
                    after: self.duration,
                })
            }
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut slot = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if *slot == Some(self.id) {
            *slot = None;
            self.lock.release();
            debug!(lease = %self.id, "Lease released");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// Wake lock that refuses to be acquired twice without a release.
    #[derive(Default)]
    struct CountingLock {
        acquired: AtomicUsize,
        released: AtomicUsize,
        held: AtomicBool,
        double_acquire: AtomicBool,
        last_timeout: Mutex<Option<Duration>>,
    }

    impl WakeLock for CountingLock {
        fn acquire(&self, timeout: Duration) {
            if self.held.swap(true, Ordering::SeqCst) {
                self.double_acquire.store(true, Ordering::SeqCst);
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            *self.last_timeout.lock().unwrap() = Some(timeout);
        }

        fn release(&self) {
            self.held.store(false, Ordering::SeqCst);
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn guard(ceiling: Duration) -> (ResourceGuard, Arc<CountingLock>) {
        let lock = Arc::new(CountingLock::default());
        (ResourceGuard::new(lock.clone(), ceiling), lock)
    }

    #[tokio::test]
    async fn normal_return_releases_once() {
        let (guard, lock) = guard(Duration::from_secs(60));
        let value = guard.with_lease(Duration::from_secs(5), async { 42 }).await;
        assert_eq!(value, Ok(42));
        assert_eq!(lock.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(lock.released.load(Ordering::SeqCst), 1);
        assert!(!guard.is_held());

        guard.with_lease(Duration::from_secs(5), async {}).await.unwrap();
        assert!(!lock.double_acquire.load(Ordering::SeqCst));
        assert_eq!(lock.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_releases_once() {
        let (guard, lock) = guard(Duration::from_secs(60));
        let result = guard
            .with_lease(Duration::from_millis(20), tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert!(matches!(result, Err(LeaseError::Expired { .. })));
        assert_eq!(lock.released.load(Ordering::SeqCst), 1);
        assert!(!guard.is_held());
    }

    #[tokio::test]
    async fn error_result_still_releases() {
        let (guard, lock) = guard(Duration::from_secs(60));
        let result = guard
            .with_lease(Duration::from_secs(1), async { Err::<(), _>("boom") })
            .await;
        assert_eq!(result, Ok(Err("boom")));
        assert_eq!(lock.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn requested_duration_is_capped() {
        let (guard, lock) = guard(Duration::from_secs(300));
        let lease = guard.acquire(Duration::from_secs(3600));
        assert_eq!(lease.duration(), Duration::from_secs(300));
        assert_eq!(*lock.last_timeout.lock().unwrap(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn nested_acquisition_replaces_without_double_release() {
        let (guard, lock) = guard(Duration::from_secs(300));
        let first = guard.acquire(Duration::from_secs(10));
        let second = guard.acquire(Duration::from_secs(10));
        assert_eq!(lock.released.load(Ordering::SeqCst), 1);
        assert!(!lock.double_acquire.load(Ordering::SeqCst));

        drop(first);
        assert_eq!(lock.released.load(Ordering::SeqCst), 1);
        assert!(guard.is_held());

        drop(second);
        assert_eq!(lock.released.load(Ordering::SeqCst), 2);
        assert!(!guard.is_held());
    }

    #[tokio::test]
    async fn panic_in_body_releases() {
        let (guard, lock) = guard(Duration::from_secs(60));
        let guard = Arc::new(guard);
        let task_guard = Arc::clone(&guard);
        let handle = tokio::spawn(async move {
            task_guard
                .with_lease(Duration::from_secs(5), async { panic!("branch crashed") })
                .await
        });
        assert!(handle.await.is_err());
        assert_eq!(lock.released.load(Ordering::SeqCst), 1);
        assert!(!guard.is_held());
    }
}
