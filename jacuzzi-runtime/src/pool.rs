//! Bounded object pool.
//!
//! At most `max_size` objects are checked out at once; the bound is a
//! semaphore, so `acquire` waits for a slot instead of failing. Returned
//! objects are kept (up to `max_idle`) and handed out again LIFO.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, trace};

use crate::config::PoolConfig;
use crate::error::{PoolError, RuntimeResult};

type Factory<T> = Box<dyn Fn() -> Result<T, String> + Send + Sync>;

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects created by the factory.
    pub created: u64,
    /// Acquisitions served from the idle list.
    pub reused: u64,
    /// Objects dropped instead of returned.
    pub discarded: u64,
    /// Objects waiting in the idle list.
    pub idle: usize,
    /// Objects currently checked out.
    pub in_use: usize,
}

struct PoolInner<T> {
    factory: Factory<T>,
    idle: Mutex<Vec<T>>,
    slots: Arc<Semaphore>,
    config: PoolConfig,
    closed: AtomicBool,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl<T> PoolInner<T> {
    fn give_back(&self, object: T) {
        if self.closed.load(Ordering::Acquire) {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.config.max_idle {
            idle.push(object);
        } else {
            drop(idle);
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A bounded pool of reusable objects.
pub struct ObjectPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for ObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> ObjectPool<T> {
    /// Creates a pool that builds objects with `factory`.
    ///
    /// # Errors
    /// Returns `RuntimeError::InvalidConfig` if the configuration is invalid.
    pub fn new<F, E>(config: PoolConfig, factory: F) -> RuntimeResult<Self>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                factory: Box::new(move || factory().map_err(|e| e.to_string())),
                idle: Mutex::new(Vec::with_capacity(config.max_idle)),
                slots: Arc::new(Semaphore::new(config.max_size)),
                config,
                closed: AtomicBool::new(false),
                created: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        })
    }

    /// Checks out an object, waiting for a free slot.
    ///
    /// # Errors
    /// Returns `PoolError::Closed` if the pool is closed, or
    /// `PoolError::Factory` if a new object could not be built.
    pub async fn acquire(&self) -> Result<Pooled<T>, PoolError> {
        let permit = Arc::clone(&self.inner.slots)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        self.checkout(permit)
    }

    /// Checks out an object if a slot is free right now.
    ///
    /// # Errors
    /// Returns `PoolError::Exhausted` if every slot is taken, `PoolError::Closed`
    /// if the pool is closed, or `PoolError::Factory` on build failure.
    pub fn try_acquire(&self) -> Result<Pooled<T>, PoolError> {
        let permit = Arc::clone(&self.inner.slots)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => PoolError::Exhausted {
                    max_size: self.inner.config.max_size,
                },
                TryAcquireError::Closed => PoolError::Closed,
            })?;
        self.checkout(permit)
    }

    fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<Pooled<T>, PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let reused = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let object = if let Some(object) = reused {
            self.inner.reused.fetch_add(1, Ordering::Relaxed);
            trace!("pool reused idle object");
            object
        } else {
            let object = (self.inner.factory)().map_err(|message| PoolError::Factory { message })?;
            self.inner.created.fetch_add(1, Ordering::Relaxed);
            trace!("pool created object");
            object
        };

        Ok(Pooled {
            object: Some(object),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Closes the pool. Waiting and future acquisitions fail and idle objects are dropped.
    ///
    /// Objects still checked out are dropped when returned.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.slots.close();
        let idle = std::mem::take(&mut *self.inner.idle.lock().unwrap_or_else(PoisonError::into_inner));
        debug!(dropped = idle.len(), "pool closed");
    }

    /// Returns whether the pool was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let idle = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        PoolStats {
            created: self.inner.created.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
            idle,
            in_use: self
                .inner
                .config
                .max_size
                .saturating_sub(self.inner.slots.available_permits()),
        }
    }
}

/// An object checked out of an [`ObjectPool`]; returned to the pool on drop.
pub struct Pooled<T> {
    object: Option<T>,
    pool: Arc<PoolInner<T>>,
    // Released after `object` has been handed back.
    _permit: OwnedSemaphorePermit,
}

impl<T> Pooled<T> {
    /// Drops the object instead of returning it, e.g. after it broke.
    pub fn discard(mut self) {
        if self.object.take().is_some() {
            self.pool.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.object.as_ref().expect("pooled object present until drop")
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.object.as_mut().expect("pooled object present until drop")
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            self.pool.give_back(object);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.object).finish()
    }
}
