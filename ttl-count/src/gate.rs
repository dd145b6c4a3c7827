use std::num::NonZeroUsize;

use tracing::error;

/// A fixed pool of capacity tokens, one per live admission.
///
/// The gate only does bookkeeping. Waiting for a token is done by
/// [`crate::RequestCounter`], which holds the gate and the
/// [`crate::AdmissionList`] under a single lock so that "head expired" and
/// "token released" are always observed together.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    capacity: usize,
    outstanding: usize,
}

impl AdmissionGate {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: capacity.get(),
            outstanding: 0,
        }
    }

    /// Create a gate that already has `outstanding` tokens handed out.
    ///
    /// Used when restoring admissions from a snapshot. `outstanding` may exceed
    /// capacity (e.g. capacity was lowered between runs); no further token is
    /// granted until enough of them are released.
    pub fn with_outstanding(capacity: NonZeroUsize, outstanding: usize) -> Self {
        Self {
            capacity: capacity.get(),
            outstanding,
        }
    }

    /// Take a token if one is free.
    pub fn try_acquire(&mut self) -> bool {
        if self.outstanding < self.capacity {
            self.outstanding += 1;
            true
        } else {
            false
        }
    }

    /// Return `n` tokens to the pool.
    ///
    /// Releasing more tokens than are outstanding indicates a bookkeeping bug;
    /// the excess is refused rather than creating capacity from nothing.
    pub fn release(&mut self, n: usize) {
        if n > self.outstanding {
            error!(
                requested = n,
                outstanding = self.outstanding,
                "refusing to release more tokens than are outstanding"
            );
        }
        self.outstanding = self.outstanding.saturating_sub(n);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.outstanding)
    }
}
