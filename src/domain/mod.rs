//! Domain layer - pure admission logic, free of I/O and shared state.
//!
//! This layer contains the core concepts and invariants of the admission guard:
//! - Rate and ban rules, and their per-route composition
//! - Bounded sliding-window counters
//! - The ban state machine
//! - Admission decisions
//!
//! All types in this layer are pure and take time as an argument.

pub mod ban;
pub mod decision;
pub mod rule;
pub mod window;
