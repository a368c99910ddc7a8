//! Admission control for file downloads.
//!
//! The [`ConcurrencyGate`] bounds how many downloads are in flight across an
//! entire walk. Permits are guards: dropping a [`Permit`] returns it to the
//! gate, so a permit can't leak on error or panic paths.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, Result};

/// A unit of admission. Released when dropped.
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
}

impl Permit {
    /// Give the permit back. Equivalent to dropping it.
    pub fn release(self) {}
}

/// Counting gate shared by every download of one walk.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    cancel: CancellationToken,
}

impl ConcurrencyGate {
    /// Create a gate with `capacity` permits (at least one).
    pub fn new(capacity: usize, cancel: CancellationToken) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            cancel,
        }
    }

    /// Wait for a permit.
    ///
    /// Returns [`FetchError::Cancelled`] as soon as the gate's token fires,
    /// whether or not a permit was about to become free.
    pub async fn acquire(&self) -> Result<Permit> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FetchError::Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit
                .map(|p| Permit { _permit: p })
                .map_err(|_| FetchError::Cancelled),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
