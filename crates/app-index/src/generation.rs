//! Pass generations for fencing stale completions.
//!
//! Every sync pass runs under a [`PassToken`]. Shutting the index down moves
//! the active generation forward, so a pass that was already in flight
//! finishes its external work but sees a stale token and discards its
//! results instead of persisting or publishing them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tracks the active pass generation.
#[derive(Debug, Clone, Default)]
pub struct PassGeneration {
    active: Arc<AtomicU64>,
}

impl PassGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new generation and returns its token.
    pub fn begin(&self) -> PassToken {
        let generation = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        PassToken {
            active: self.active.clone(),
            generation,
        }
    }

    /// Invalidates every outstanding token.
    pub fn fence(&self) -> u64 {
        self.active.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }
}

/// Handle held by one pass.
#[derive(Debug, Clone)]
pub struct PassToken {
    active: Arc<AtomicU64>,
    generation: u64,
}

impl PassToken {
    /// A token that never goes stale, for driving an indexer directly.
    pub fn detached() -> Self {
        Self {
            active: Arc::new(AtomicU64::new(0)),
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn is_current(&self) -> bool {
        self.active.load(Ordering::SeqCst) == self.generation
    }
}
