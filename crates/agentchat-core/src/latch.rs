use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Re-entrancy guard with drop semantics: a second caller while the latch is
/// held is turned away rather than queued.
#[derive(Debug, Clone, Default)]
pub struct Latch {
    held: Arc<AtomicBool>,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<LatchGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LatchGuard {
                held: self.held.clone(),
            })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases the latch on drop.
#[derive(Debug)]
pub struct LatchGuard {
    held: Arc<AtomicBool>,
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}
