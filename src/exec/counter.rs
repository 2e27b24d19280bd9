//! Invocation sequence numbers.

use std::sync::{Arc, Mutex, PoisonError};

/// Hands out invocation indices: `0, 1, 2, …` in call order.
///
/// Clones share the same sequence, so every command built from one factory
/// chain gets a distinct index, even when run from several threads.
#[derive(Debug, Clone, Default)]
pub struct InvocationCounter {
    next: Arc<Mutex<u64>>,
}

impl InvocationCounter {
    /// Creates a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next index and advances the sequence.
    pub fn next_index(&self) -> u64 {
        // A poisoned lock still holds a valid number.
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        let index = *next;
        *next += 1;
        index
    }
}
