// THEORY:
// The task gate is the single slot that physical actuation must pass through. It is a
// shared atomic flag with a test-and-set acquisition that never blocks: a caller
// either gets the slot immediately or is told it is busy.
//
// Ownership of the slot is represented by a `GatePass`. Releasing the gate is the
// pass being dropped, so release happens on every exit path of whoever holds it:
// normal completion, an error return, a panic unwinding through the worker, or a
// message carrying the pass being discarded because nobody is left to receive it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Single-slot, non-blocking mutual exclusion.
#[derive(Debug, Clone, Default)]
pub struct TaskGate {
    held: Arc<AtomicBool>,
}

/// Proof of holding the gate. Dropping it releases the gate.
#[derive(Debug)]
#[must_use = "dropping the pass releases the gate immediately"]
pub struct GatePass {
    held: Arc<AtomicBool>,
}

impl TaskGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the slot if it is free. Returns `None` at once if it is held.
    pub fn try_acquire(&self) -> Option<GatePass> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GatePass {
                held: Arc::clone(&self.held),
            })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl GatePass {
    /// Releases the gate now. Equivalent to dropping the pass.
    pub fn release(self) {}
}

impl Drop for GatePass {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}
