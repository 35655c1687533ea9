//! Named concurrency slots.
//!
//! Each category has a fixed number of slots backed by a [`Semaphore`].
//! Holding a [`Slot`] means holding one of them; dropping it gives the slot
//! back, so every exit path (including `?` and panics) releases.

use crate::error::{ErrorKind, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

/// Category name to capacity, shared cheaply between tasks.
///
/// Categories that were never registered are unlimited: every acquisition
/// succeeds immediately with an empty [`Slot`].
///
/// # Examples
///
/// ```
/// use tome_limit::Limiter;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = Limiter::new([("download", 3)]);
/// let cancel = CancellationToken::new();
/// let slot = limiter.acquire("download", &cancel).await?;
/// assert_eq!(limiter.available("download"), Some(2));
/// drop(slot);
/// assert_eq!(limiter.available("download"), Some(3));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct Limiter {
    categories: Arc<HashMap<String, Category>>,
}

struct Category {
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

/// A held slot, released when dropped.
#[must_use = "the slot is released as soon as it is dropped"]
#[derive(Debug)]
pub struct Slot {
    permit: Option<OwnedSemaphorePermit>,
}
impl Slot {
    /// `false` for slots handed out for unregistered categories.
    pub fn is_limited(&self) -> bool {
        self.permit.is_some()
    }
}

impl Limiter {
    pub fn new<S: Into<String>>(limits: impl IntoIterator<Item = (S, usize)>) -> Self {
        let categories = limits
            .into_iter()
            .map(|(name, capacity)| {
                let category = Category {
                    capacity,
                    semaphore: Arc::new(Semaphore::new(capacity)),
                };
                (name.into(), category)
            })
            .collect();
        Self {
            categories: Arc::new(categories),
        }
    }

    pub fn capacity(&self, category: &str) -> Option<usize> {
        self.categories.get(category).map(|c| c.capacity)
    }

    /// Slots currently free, or `None` for an unregistered category.
    pub fn available(&self, category: &str) -> Option<usize> {
        self.categories.get(category).map(|c| c.semaphore.available_permits())
    }

    /// Wait for a slot until one frees up or `cancel` fires.
    pub async fn acquire(&self, category: &str, cancel: &CancellationToken) -> Result<Slot> {
        let Some(semaphore) = self.semaphore(category) else {
            return Ok(Slot { permit: None });
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled(category.to_string())),
            permit = semaphore.acquire_owned() => {
                let permit = permit.map_err(|_| ErrorKind::Closed(category.to_string()))?;
                tracing::trace!(category, "limiter slot acquired");
                Ok(Slot { permit: Some(permit) })
            },
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self, category: &str) -> Result<Slot> {
        let Some(semaphore) = self.semaphore(category) else {
            return Ok(Slot { permit: None });
        };
        match semaphore.try_acquire_owned() {
            Ok(permit) => Ok(Slot { permit: Some(permit) }),
            Err(TryAcquireError::NoPermits) => exn::bail!(ErrorKind::Busy(category.to_string())),
            Err(TryAcquireError::Closed) => exn::bail!(ErrorKind::Closed(category.to_string())),
        }
    }

    /// Wait for a slot, giving up after `timeout`.
    pub async fn acquire_timeout(&self, category: &str, timeout: Duration, cancel: &CancellationToken) -> Result<Slot> {
        match tokio::time::timeout(timeout, self.acquire(category, cancel)).await {
            Ok(slot) => slot,
            Err(_) => {
                tracing::debug!(category, ?timeout, "gave up waiting for limiter slot");
                exn::bail!(ErrorKind::Timeout(category.to_string()))
            },
        }
    }

    fn semaphore(&self, category: &str) -> Option<Arc<Semaphore>> {
        self.categories.get(category).map(|c| Arc::clone(&c.semaphore))
    }
}
