use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Readiness flag for the load balancer. Ready once startup finished, not ready
/// again as soon as shutdown begins.
#[derive(Clone, Default)]
pub struct ReadinessState {
    ready: Arc<AtomicBool>,
    draining: Arc<AtomicBool>,
}

impl ReadinessState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn start_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.is_draining()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draining_overrides_ready() {
        let state = ReadinessState::new();
        assert!(!state.is_ready());

        state.mark_ready();
        assert!(state.is_ready());

        state.clone().start_draining();
        assert!(!state.is_ready());
        assert!(state.is_draining());
    }
}
