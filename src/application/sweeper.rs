//! Periodic removal of idle clients.
//!
//! The registry never shrinks on its own. A sweeper calls
//! `AdmissionEngine::purge_stale` on an interval; purging only drops state
//! that can no longer affect a decision, so sweeping never changes outcomes.

use crate::application::engine::AdmissionEngine;
use crate::application::ports::Storage;
use crate::application::registry::ClientState;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "async")]
use tokio::time::{interval, MissedTickBehavior};

/// Error returned when sweeper configuration validation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SweeperConfigError {
    /// Sweep interval must be greater than zero
    #[error("sweep interval must be greater than 0")]
    ZeroInterval,
}

/// Configuration for idle-client sweeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    /// How often to sweep
    pub interval: Duration,
}

impl SweeperConfig {
    /// Create a sweeper config with the specified interval.
    ///
    /// # Errors
    /// Returns `SweeperConfigError::ZeroInterval` if `interval` is zero.
    pub fn new(interval: Duration) -> Result<Self, SweeperConfigError> {
        if interval.is_zero() {
            return Err(SweeperConfigError::ZeroInterval);
        }
        Ok(Self { interval })
    }
}

/// Sweeps idle clients out of an engine's registry.
pub struct Sweeper<S>
where
    S: Storage<String, ClientState> + Clone,
{
    engine: AdmissionEngine<S>,
    config: SweeperConfig,
}

impl<S> Sweeper<S>
where
    S: Storage<String, ClientState> + Clone,
{
    /// Create a new sweeper.
    pub fn new(engine: AdmissionEngine<S>, config: SweeperConfig) -> Self {
        Self { engine, config }
    }

    /// Run one sweep, returning the number of clients removed.
    pub fn sweep_once(&self) -> usize {
        self.engine.purge_stale()
    }

    /// Get the sweeper configuration.
    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Start sweeping periodically on the current tokio runtime.
    ///
    /// The task runs until the returned handle is aborted.
    #[cfg(feature = "async")]
    pub fn start(self) -> tokio::task::JoinHandle<()>
    where
        S: Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing is idle yet.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                self.sweep_once();
            }
        })
    }
}
