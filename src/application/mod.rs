//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - Client registry (per-client state behind a storage port)
//! - Rate-limit evaluator and admission engine (decision making)
//! - Metrics
//! - Idle-client sweeper
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod engine;
pub mod evaluator;
pub mod metrics;
pub mod ports;
pub mod registry;
pub mod sweeper;
