//! Test doubles for infrastructure adapters.
//!
//! A manually driven clock and a log-capturing layer, so admission
//! behaviour can be tested without sleeping.

pub mod clock;
pub mod layer;

pub use clock::MockClock;
pub use layer::{CapturedEvent, MockCaptureLayer};
