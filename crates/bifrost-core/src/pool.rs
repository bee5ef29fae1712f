use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(debug_assertions)]
use std::collections::HashSet;

/// Counters for one pool. `active` is derived (`acquires - releases`);
/// `hit_rate` is the fraction of acquires served without constructing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolStats {
    pub acquires: u64,
    pub releases: u64,
    pub creates: u64,
    pub active: u64,
    pub hit_rate: f64,
}

/// Typed free-list pool.
///
/// [`ObjectPool::acquire`] hands out a [`Pooled`] guard that returns the
/// object on drop, so an object is released exactly once on every
/// control-flow path no matter which task ends up owning the guard. Debug
/// builds additionally keep a ledger of active tickets: releasing an
/// untracked ticket is flagged, [`ObjectPool::check_active`] answers
/// liveness, and tickets still active at shutdown are reported as leaks.
pub struct ObjectPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct PoolInner<T> {
    free: Mutex<Vec<T>>,
    make: Box<dyn Fn() -> T + Send + Sync>,
    reset: Option<Box<dyn Fn(&mut T) + Send + Sync>>,
    acquires: AtomicU64,
    releases: AtomicU64,
    creates: AtomicU64,
    next_ticket: AtomicU64,
    #[cfg(debug_assertions)]
    active: Mutex<HashSet<u64>>,
}

impl<T: Send + 'static> ObjectPool<T> {
    pub fn new(make: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::build(Box::new(make), None)
    }

    /// Pool that runs `reset` on each object as it comes back, so stale
    /// payloads never leak into the next acquire.
    pub fn with_reset(
        make: impl Fn() -> T + Send + Sync + 'static,
        reset: impl Fn(&mut T) + Send + Sync + 'static,
    ) -> Self {
        Self::build(Box::new(make), Some(Box::new(reset)))
    }

    fn build(
        make: Box<dyn Fn() -> T + Send + Sync>,
        reset: Option<Box<dyn Fn(&mut T) + Send + Sync>>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                make,
                reset,
                acquires: AtomicU64::new(0),
                releases: AtomicU64::new(0),
                creates: AtomicU64::new(0),
                next_ticket: AtomicU64::new(0),
                #[cfg(debug_assertions)]
                active: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Places `n` freshly constructed objects into the free list, bypassing
    /// the acquire/create bookkeeping.
    pub fn prewarm(&self, n: usize) {
        let mut free = self.inner.free.lock().unwrap();
        free.reserve(n);
        for _ in 0..n {
            free.push((self.inner.make)());
        }
    }

    pub fn acquire(&self) -> Pooled<T> {
        self.inner.acquires.fetch_add(1, Ordering::Relaxed);
        let value = match self.inner.free.lock().unwrap().pop() {
            Some(value) => value,
            None => {
                self.inner.creates.fetch_add(1, Ordering::Relaxed);
                (self.inner.make)()
            }
        };
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        #[cfg(debug_assertions)]
        self.inner.active.lock().unwrap().insert(ticket);
        Pooled {
            value: Some(value),
            ticket,
            pool: self.inner.clone(),
        }
    }

    /// Debug-build predicate: is this ticket still checked out?
    #[cfg(debug_assertions)]
    pub fn check_active(&self, ticket: u64) -> bool {
        self.inner.active.lock().unwrap().contains(&ticket)
    }

    pub fn stats(&self) -> PoolStats {
        let acquires = self.inner.acquires.load(Ordering::Relaxed);
        let releases = self.inner.releases.load(Ordering::Relaxed);
        let creates = self.inner.creates.load(Ordering::Relaxed);
        let hit_rate = if acquires == 0 {
            1.0
        } else {
            1.0 - creates as f64 / acquires as f64
        };
        PoolStats {
            acquires,
            releases,
            creates,
            active: acquires.saturating_sub(releases),
            hit_rate,
        }
    }
}

impl<T> PoolInner<T> {
    fn release(&self, ticket: u64, mut value: T) {
        #[cfg(debug_assertions)]
        if !self.active.lock().unwrap().remove(&ticket) {
            tracing::warn!(ticket, "release of object not tracked as active");
            return;
        }
        #[cfg(not(debug_assertions))]
        let _ = ticket;
        if let Some(reset) = &self.reset {
            reset(&mut value);
        }
        self.releases.fetch_add(1, Ordering::Relaxed);
        self.free.lock().unwrap().push(value);
    }
}

/// Guard over a pooled object. Dropping it returns the object to its pool.
pub struct Pooled<T> {
    value: Option<T>,
    ticket: u64,
    pool: Arc<PoolInner<T>>,
}

impl<T> Pooled<T> {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("pooled value present until drop")
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("pooled value present until drop")
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(self.ticket, value);
        }
    }
}
