//! The connection pool.
//!
//! Leases are bounded by a semaphore with `max_active` permits. A leased
//! [`Pooled`] handle owns its permit and gives the connection back in `Drop`,
//! so a handle is released exactly once on every exit path of the code that
//! used it.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, warn};

use crate::config::{ExhaustionPolicy, PoolConfig};
use crate::connection::ConnectionInfo;
use crate::manager::Manager;
use crate::PoolError;

/// A connection together with its bookkeeping.
struct Slot<C> {
    conn: C,
    info: ConnectionInfo,
}

struct Shared<M: Manager> {
    manager: M,
    config: PoolConfig,
    /// One permit per leasable handle
    active: Arc<Semaphore>,
    /// One permit per concurrent open
    opens: Semaphore,
    /// Idle connections, most recently released at the back
    idle: Mutex<VecDeque<Slot<M::Connection>>>,
    closed: AtomicBool,
    opened_total: AtomicU64,
    closed_total: AtomicU64,
}

impl<M: Manager> Shared<M> {
    fn release(&self, slot: Slot<M::Connection>, broken: bool) {
        let rejected = {
            let mut idle = self.idle.lock();
            if broken || self.closed.load(Ordering::Acquire) || idle.len() >= self.config.max_idle {
                Some(slot)
            } else {
                idle.push_back(slot);
                None
            }
        };

        if let Some(slot) = rejected {
            self.close_slot(slot);
        }
    }

    fn close_slot(&self, slot: Slot<M::Connection>) {
        let id = slot.info.id;
        if let Err(e) = self.manager.close(slot.conn) {
            warn!(conn = %id, error = %e, "Failed to close connection");
        }
        self.closed_total.fetch_add(1, Ordering::Relaxed);
        debug!(conn = %id, uses = slot.info.uses, "Closed connection");
    }
}

/// Pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Handles currently leased
    pub active: usize,
    /// Connections waiting for reuse
    pub idle: usize,
    /// Connections opened since creation
    pub opened: u64,
    /// Connections closed since creation
    pub closed: u64,
}

/// Bounded pool of connections opened by a [`Manager`].
pub struct Pool<M: Manager> {
    shared: Arc<Shared<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: Manager> Pool<M> {
    /// Creates a pool. No connection is opened until the first `acquire`.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                manager,
                active: Arc::new(Semaphore::new(config.max_active)),
                opens: Semaphore::new(config.max_concurrent_opens),
                idle: Mutex::new(VecDeque::with_capacity(config.max_idle)),
                closed: AtomicBool::new(false),
                opened_total: AtomicU64::new(0),
                closed_total: AtomicU64::new(0),
                config,
            }),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Returns the manager.
    pub fn manager(&self) -> &M {
        &self.shared.manager
    }

    /// Leases a handle, reusing an idle connection when one is available.
    pub async fn acquire(&self) -> Result<Pooled<M>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let active = Arc::clone(&self.shared.active);
        let permit = match self.shared.config.exhaustion {
            ExhaustionPolicy::Fail => active.try_acquire_owned().map_err(|e| match e {
                TryAcquireError::NoPermits => PoolError::Exhausted {
                    max_active: self.shared.config.max_active,
                },
                TryAcquireError::Closed => PoolError::Closed,
            })?,
            ExhaustionPolicy::Wait => active
                .acquire_owned()
                .await
                .map_err(|_| PoolError::Closed)?,
        };

        let reused = self.shared.idle.lock().pop_back();
        let mut slot = match reused {
            Some(slot) => slot,
            // The permit is dropped on failure, freeing the lease.
            None => self.open_slot().await?,
        };
        slot.info.record_use();

        debug!(conn = %slot.info.id, uses = slot.info.uses, "Leased connection");

        Ok(Pooled {
            slot: Some(slot),
            shared: Arc::clone(&self.shared),
            broken: false,
            _permit: permit,
        })
    }

    async fn open_slot(&self) -> Result<Slot<M::Connection>, PoolError> {
        let _opening = self
            .shared
            .opens
            .acquire()
            .await
            .map_err(|_| PoolError::Closed)?;

        let conn = self.shared.manager.open().await.map_err(|e| {
            warn!(error = %e, "Failed to open connection");
            PoolError::Open(e.to_string())
        })?;

        let info = ConnectionInfo::new();
        self.shared.opened_total.fetch_add(1, Ordering::Relaxed);
        debug!(conn = %info.id, "Opened connection");

        Ok(Slot { conn, info })
    }

    /// Returns the pool counters.
    pub fn status(&self) -> PoolStatus {
        let shared = &self.shared;
        PoolStatus {
            active: shared.config.max_active - shared.active.available_permits(),
            idle: shared.idle.lock().len(),
            opened: shared.opened_total.load(Ordering::Relaxed),
            closed: shared.closed_total.load(Ordering::Relaxed),
        }
    }

    /// Returns true once `shutdown` has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Closes idle connections and fails pending and future acquires.
    ///
    /// Handles still leased are closed when they are released.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.active.close();
        self.shared.opens.close();

        let drained: Vec<_> = self.shared.idle.lock().drain(..).collect();
        debug!(idle = drained.len(), "Shutting down pool");
        for slot in drained {
            self.shared.close_slot(slot);
        }
    }
}

/// A leased connection. Dereferences to the connection.
pub struct Pooled<M: Manager> {
    slot: Option<Slot<M::Connection>>,
    shared: Arc<Shared<M>>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl<M: Manager> Pooled<M> {
    /// Returns the bookkeeping of the leased connection.
    pub fn info(&self) -> &ConnectionInfo {
        &self.slot().info
    }

    /// Closes the connection on release instead of returning it to the idle set.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Returns true if the handle was marked broken.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Releases the handle. Equivalent to dropping it.
    pub fn release(self) {}

    fn slot(&self) -> &Slot<M::Connection> {
        self.slot.as_ref().expect("slot is present until drop")
    }
}

impl<M: Manager> Deref for Pooled<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        &self.slot().conn
    }
}

impl<M: Manager> DerefMut for Pooled<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.slot.as_mut().expect("slot is present until drop").conn
    }
}

impl<M: Manager> Drop for Pooled<M> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            // Runs before the permit field is dropped, so a waiter woken by the
            // permit finds this connection idle.
            self.shared.release(slot, self.broken);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::{sleep, timeout};

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("refused")]
    struct Refused;

    #[derive(Default)]
    struct CountingManager {
        next: AtomicU64,
        closed: AtomicUsize,
        fail: AtomicBool,
        open_delay_ms: u64,
        opening: AtomicUsize,
        peak_opening: AtomicUsize,
    }

    #[async_trait]
    impl Manager for CountingManager {
        type Connection = u64;
        type Error = Refused;

        async fn open(&self) -> Result<u64, Refused> {
            let now = self.opening.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_opening.fetch_max(now, Ordering::SeqCst);
            if self.open_delay_ms > 0 {
                sleep(Duration::from_millis(self.open_delay_ms)).await;
            }
            self.opening.fetch_sub(1, Ordering::SeqCst);

            if self.fail.load(Ordering::SeqCst) {
                return Err(Refused);
            }
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }

        fn close(&self, _conn: u64) -> Result<(), Refused> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(max_active: usize, max_idle: usize, exhaustion: ExhaustionPolicy) -> PoolConfig {
        PoolConfig {
            max_active,
            max_idle,
            max_concurrent_opens: 2,
            exhaustion,
        }
    }

    #[tokio::test]
    async fn test_idle_connection_reused() {
        let pool = Pool::new(CountingManager::default(), PoolConfig::default()).unwrap();

        let first = pool.acquire().await.unwrap();
        let id = first.info().id;
        drop(first);

        let second = pool.acquire().await.unwrap();
        assert_eq!(second.info().id, id);
        assert_eq!(second.info().uses, 2);
        assert_eq!(pool.status().opened, 1);
    }

    #[tokio::test]
    async fn test_fail_policy_reports_exhaustion() {
        let pool = Pool::new(
            CountingManager::default(),
            config(1, 1, ExhaustionPolicy::Fail),
        )
        .unwrap();

        let held = pool.acquire().await.unwrap();
        assert!(matches!(
            pool.acquire().await,
            Err(PoolError::Exhausted { max_active: 1 })
        ));

        held.release();
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_policy_resumes_after_release() {
        let pool = Pool::new(
            CountingManager::default(),
            config(1, 1, ExhaustionPolicy::Wait),
        )
        .unwrap();

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|h| *h) })
        };

        sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let id = *held;
        drop(held);

        let got = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken")
            .unwrap()
            .unwrap();
        assert_eq!(got, id);
    }

    #[tokio::test]
    async fn test_open_failure_frees_the_lease() {
        let manager = CountingManager::default();
        manager.fail.store(true, Ordering::SeqCst);
        let pool = Pool::new(manager, config(1, 1, ExhaustionPolicy::Fail)).unwrap();

        for _ in 0..3 {
            assert!(matches!(pool.acquire().await, Err(PoolError::Open(_))));
        }
        assert_eq!(pool.status().active, 0);

        pool.manager().fail.store(false, Ordering::SeqCst);
        let handle = timeout(Duration::from_secs(1), pool.acquire())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pool.status().active, 1);
        drop(handle);
        assert_eq!(pool.status().active, 0);
    }

    #[tokio::test]
    async fn test_idle_ceiling_closes_surplus() {
        let pool = Pool::new(
            CountingManager::default(),
            config(4, 1, ExhaustionPolicy::Fail),
        )
        .unwrap();

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        drop(a);
        drop(b);

        let status = pool.status();
        assert_eq!(status.idle, 1);
        assert_eq!(status.closed, 1);
        assert_eq!(pool.manager().closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_broken_handle_not_recycled() {
        let pool = Pool::new(CountingManager::default(), PoolConfig::default()).unwrap();

        let mut handle = pool.acquire().await.unwrap();
        handle.mark_broken();
        drop(handle);

        assert_eq!(pool.status().idle, 0);
        assert_eq!(pool.manager().closed.load(Ordering::SeqCst), 1);

        let next = pool.acquire().await.unwrap();
        assert_eq!(next.info().uses, 1);
        assert_eq!(pool.status().opened, 2);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let pool = Pool::new(CountingManager::default(), PoolConfig::default()).unwrap();

        let idle = pool.acquire().await.unwrap();
        let leased = pool.acquire().await.unwrap();
        drop(idle);

        pool.shutdown();
        assert_eq!(pool.manager().closed.load(Ordering::SeqCst), 1);
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));

        drop(leased);
        assert_eq!(pool.manager().closed.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().idle, 0);
    }

    #[tokio::test]
    async fn test_concurrent_opens_bounded() {
        let manager = CountingManager {
            open_delay_ms: 20,
            ..Default::default()
        };
        let pool = Pool::new(manager, config(8, 8, ExhaustionPolicy::Wait)).unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    let handle = pool.acquire().await.unwrap();
                    sleep(Duration::from_millis(5)).await;
                    drop(handle);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(pool.manager().peak_opening.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_handle_never_leased_twice() {
        let pool = Pool::new(
            CountingManager::default(),
            config(3, 3, ExhaustionPolicy::Wait),
        )
        .unwrap();
        let leased = Arc::new(Mutex::new(HashSet::new()));

        let tasks: Vec<_> = (0..24)
            .map(|_| {
                let pool = pool.clone();
                let leased = Arc::clone(&leased);
                tokio::spawn(async move {
                    let handle = pool.acquire().await.unwrap();
                    assert!(leased.lock().insert(*handle), "handle leased twice");
                    sleep(Duration::from_millis(2)).await;
                    leased.lock().remove(&*handle);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let status = pool.status();
        assert_eq!(status.active, 0);
        assert!(status.opened <= 3);
    }
}
