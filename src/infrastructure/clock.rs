//! Monotonic clock source.
//!
//! Windows and bans are measured with `Instant`, so wall-clock adjustments
//! never shrink or extend a window. Tests drive time with `MockClock`
//! (`test-helpers` feature).

use crate::application::ports::Clock;
use std::sync::Arc;
use std::time::Instant;

/// Production clock backed by `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }

    /// A system clock behind the `Clock` port, ready to hand to a registry.
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
