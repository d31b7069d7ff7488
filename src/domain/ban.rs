//! Report-driven ban state machine.
//!
//! A client is `Clear` until `count` reports land inside the ban window; it
//! is then `Banned` until the triggering report's timestamp plus the ban
//! duration. Unbanning happens lazily, on the next evaluation after expiry.

use crate::domain::decision::Breach;
use crate::domain::rule::BanRule;
use crate::domain::window::{ceil_secs, SlidingWindow};
use std::time::Instant;

/// Transition observed by a ban evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanTransition {
    /// No state change
    None,
    /// The client just became banned
    Banned,
    /// An expired ban was lifted
    Lifted,
}

/// Per-client ban state: the report window and the active ban, if any.
#[derive(Debug, Clone, Default)]
pub struct BanState {
    reports: SlidingWindow,
    active_until: Option<Instant>,
}

impl BanState {
    /// Create ban state sized for `rule`, or a no-op state when banning is disabled.
    pub fn new(rule: Option<&BanRule>) -> Self {
        let capacity = rule.map_or(0, |rule| rule.count() as usize);
        Self {
            reports: SlidingWindow::with_capacity(capacity),
            active_until: None,
        }
    }

    /// Record a report. Reports accumulate even while a ban is active.
    pub fn report(&mut self, now: Instant) {
        self.reports.record(now);
    }

    /// Evaluate the ban at `now`, applying any pending transition.
    ///
    /// Returns the breach while the client is banned, including the instant
    /// the ban starts.
    pub fn evaluate(&mut self, rule: &BanRule, now: Instant) -> (Option<Breach>, BanTransition) {
        let mut transition = BanTransition::None;

        if let Some(until) = self.active_until {
            if now < until {
                return (Some(self.breach(rule, until, now)), transition);
            }
            self.active_until = None;
            transition = BanTransition::Lifted;
        }

        if self.reports.count_within(rule.window(), now) >= rule.count() as usize {
            let until = self
                .reports
                .newest()
                .and_then(|last| last.checked_add(rule.duration()));
            if let Some(until) = until {
                if now < until {
                    self.active_until = Some(until);
                    return (Some(self.breach(rule, until, now)), BanTransition::Banned);
                }
            }
        }

        (None, transition)
    }

    fn breach(&self, rule: &BanRule, until: Instant, now: Instant) -> Breach {
        Breach {
            retry_after: ceil_secs(until.saturating_duration_since(now)),
            count: rule.count(),
            window: rule.window(),
        }
    }

    /// Whether a ban is active at `now`, without applying transitions.
    pub fn is_banned(&self, now: Instant) -> bool {
        self.active_until.is_some_and(|until| now < until)
    }

    /// Expiry of the active ban, if one has been set and not yet lifted.
    pub fn banned_until(&self) -> Option<Instant> {
        self.active_until
    }

    /// The retained reports.
    pub fn reports(&self) -> &SlidingWindow {
        &self.reports
    }

    /// True when this state can no longer ban the client.
    pub(crate) fn is_stale(&self, rule: Option<&BanRule>, now: Instant) -> bool {
        if self.is_banned(now) {
            return false;
        }
        rule.map_or(true, |rule| self.reports.is_stale(rule.window(), now))
    }
}
