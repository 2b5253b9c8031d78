// SPDX-License-Identifier: GPL-3.0-only

//! Private memory of one coprocessor context
//!
//! A kernel only ever computes on bytes held in its local store. Staging
//! buffers are carved out of a fixed budget and returned to it on drop, so a
//! program that would not fit the real core fails the same way here.

use crate::constants::{DMA_QUADWORD, align_up};
use crate::errors::LocalStoreError;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Budgeted allocator for one context's local memory
#[derive(Debug, Clone)]
pub struct LocalStore {
    capacity: usize,
    used: Arc<AtomicUsize>,
}

impl LocalStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.capacity
            .saturating_sub(self.used.load(Ordering::Acquire))
    }

    /// Reserve a zeroed, quadword-granular buffer
    pub fn alloc(&self, len: usize) -> Result<LocalBuffer, LocalStoreError> {
        let charged = align_up(len, DMA_QUADWORD);
        let mut used = self.used.load(Ordering::Acquire);
        loop {
            let next = used + charged;
            if next > self.capacity {
                return Err(LocalStoreError::Exhausted {
                    requested: charged,
                    available: self.capacity.saturating_sub(used),
                    capacity: self.capacity,
                });
            }
            match self
                .used
                .compare_exchange(used, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => used = actual,
            }
        }

        Ok(LocalBuffer {
            data: vec![0u8; len],
            charged,
            used: Arc::clone(&self.used),
        })
    }
}

/// Staging buffer living in a local store
#[derive(Debug)]
pub struct LocalBuffer {
    data: Vec<u8>,
    charged: usize,
    used: Arc<AtomicUsize>,
}

impl Deref for LocalBuffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for LocalBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for LocalBuffer {
    fn drop(&mut self) {
        self.used.fetch_sub(self.charged, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_enforced_and_returned() {
        let store = LocalStore::new(64);
        let a = store.alloc(40).unwrap();
        assert_eq!(store.available(), 16);
        assert!(matches!(
            store.alloc(17),
            Err(LocalStoreError::Exhausted { requested: 32, .. })
        ));
        drop(a);
        assert_eq!(store.available(), 64);
        assert_eq!(store.alloc(64).unwrap().len(), 64);
    }
}
