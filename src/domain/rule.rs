//! Rate limiting and ban rules, and how they compose per route.
//!
//! Rules are validated once, when they are constructed. Everything downstream
//! (windows, evaluator, engine) can assume `count > 0` and non-zero durations.

use ahash::AHashMap;
use std::time::Duration;
use thiserror::Error;

/// Longest accepted rule window or ban duration (ten years).
///
/// Windows and durations are added to `Instant`s on the request path; the
/// bound keeps that addition from overflowing.
pub const MAX_RULE_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Error returned when a rule is constructed with an invalid threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuleError {
    /// The rule's count must be greater than zero
    #[error("rule count must be greater than 0")]
    ZeroCount,
    /// The rule's window must be greater than zero
    #[error("rule window must be greater than 0")]
    ZeroWindow,
    /// A ban rule's duration must be greater than zero
    #[error("ban duration must be greater than 0")]
    ZeroDuration,
    /// The rule's window exceeds `MAX_RULE_DURATION`
    #[error("rule window must not exceed {} seconds", MAX_RULE_DURATION.as_secs())]
    WindowTooLong,
    /// A ban rule's duration exceeds `MAX_RULE_DURATION`
    #[error("ban duration must not exceed {} seconds", MAX_RULE_DURATION.as_secs())]
    DurationTooLong,
}

fn check_window(window: Duration) -> Result<(), RuleError> {
    if window.is_zero() {
        return Err(RuleError::ZeroWindow);
    }
    if window > MAX_RULE_DURATION {
        return Err(RuleError::WindowTooLong);
    }
    Ok(())
}

/// A request threshold: at most `count` accepted requests per trailing `window`.
///
/// # Example
/// ```
/// use gatekeeper::RateRule;
/// use std::time::Duration;
///
/// let rule = RateRule::new(100, Duration::from_secs(10)).unwrap();
/// assert_eq!(rule.count(), 100);
///
/// assert!(RateRule::new(0, Duration::from_secs(10)).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateRule {
    count: u32,
    window: Duration,
}

impl RateRule {
    /// Create a new rate rule.
    ///
    /// # Errors
    /// Returns `RuleError::ZeroCount` or `RuleError::ZeroWindow` for zero
    /// thresholds, and `RuleError::WindowTooLong` past `MAX_RULE_DURATION`.
    pub fn new(count: u32, window: Duration) -> Result<Self, RuleError> {
        if count == 0 {
            return Err(RuleError::ZeroCount);
        }
        check_window(window)?;
        Ok(Self { count, window })
    }

    /// Create a rate rule with a window expressed in whole seconds.
    pub fn per_secs(count: u32, window_secs: u64) -> Result<Self, RuleError> {
        Self::new(count, Duration::from_secs(window_secs))
    }

    /// Maximum number of accepted requests within the window.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Length of the trailing window.
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// A ban threshold: `count` reports within `window` ban the client for `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BanRule {
    count: u32,
    window: Duration,
    duration: Duration,
}

impl BanRule {
    /// Create a new ban rule.
    ///
    /// # Errors
    /// Returns a `RuleError` if any of the thresholds is zero or longer than
    /// `MAX_RULE_DURATION`.
    pub fn new(count: u32, window: Duration, duration: Duration) -> Result<Self, RuleError> {
        if count == 0 {
            return Err(RuleError::ZeroCount);
        }
        check_window(window)?;
        if duration.is_zero() {
            return Err(RuleError::ZeroDuration);
        }
        if duration > MAX_RULE_DURATION {
            return Err(RuleError::DurationTooLong);
        }
        Ok(Self {
            count,
            window,
            duration,
        })
    }

    /// Create a ban rule from whole seconds.
    pub fn per_secs(count: u32, window_secs: u64, duration_secs: u64) -> Result<Self, RuleError> {
        Self::new(
            count,
            Duration::from_secs(window_secs),
            Duration::from_secs(duration_secs),
        )
    }

    /// Number of reports that triggers a ban.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Trailing window in which reports are counted.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// How long a ban lasts, measured from the report that triggered it.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// How a route's rules combine with the global rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Composition {
    /// Evaluated in addition to the global rules
    #[default]
    Overlay,
    /// Replaces the global rules for the route
    Standalone,
}

/// An ordered set of rate rules sharing one event stream.
///
/// Rules are kept tightest-first (shortest window, then smallest count) so
/// that when several rules breach at once the most specific one is reported.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleSet {
    rules: Vec<RateRule>,
    mode: Composition,
}

impl RuleSet {
    /// Create a rule set with the given composition mode.
    pub fn new(rules: impl IntoIterator<Item = RateRule>, mode: Composition) -> Self {
        let mut rules: Vec<RateRule> = rules.into_iter().collect();
        rules.sort_by_key(|rule| (rule.window, rule.count));
        rules.dedup();
        Self { rules, mode }
    }

    /// Create an overlay rule set.
    pub fn overlay(rules: impl IntoIterator<Item = RateRule>) -> Self {
        Self::new(rules, Composition::Overlay)
    }

    /// Create a standalone rule set.
    pub fn standalone(rules: impl IntoIterator<Item = RateRule>) -> Self {
        Self::new(rules, Composition::Standalone)
    }

    /// The rules, tightest first.
    pub fn rules(&self) -> &[RateRule] {
        &self.rules
    }

    /// The composition mode.
    pub fn mode(&self) -> Composition {
        self.mode
    }

    /// Whether this set replaces the global rules.
    pub fn is_standalone(&self) -> bool {
        self.mode == Composition::Standalone
    }

    /// Whether the set has no rules (rate limiting disabled for its scope).
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Buffer capacity needed to evaluate every rule in the set.
    pub fn max_count(&self) -> usize {
        self.rules
            .iter()
            .map(|rule| rule.count as usize)
            .max()
            .unwrap_or(0)
    }

    /// Longest window in the set.
    pub fn max_window(&self) -> Duration {
        self.rules
            .iter()
            .map(|rule| rule.window)
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

/// Route-level annotation, stored in a side-table keyed by route identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePolicy {
    /// Exempt from every rate and ban check
    Bypass,
    /// Route-specific rules, overlaid on or replacing the global rules
    Specific(RuleSet),
}

/// Side-table of route annotations keyed by route identifier.
///
/// Routes without an entry are evaluated against the global rules only.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: AHashMap<String, RoutePolicy>,
}

impl RouteTable {
    /// Create an empty route table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotate a route, returning the previous annotation if there was one.
    pub fn insert(&mut self, route: impl Into<String>, policy: RoutePolicy) -> Option<RoutePolicy> {
        self.routes.insert(route.into(), policy)
    }

    /// Look up a route's annotation.
    pub fn get(&self, route: &str) -> Option<&RoutePolicy> {
        self.routes.get(route)
    }

    /// Whether the route is exempt from all checks.
    pub fn is_bypass(&self, route: &str) -> bool {
        matches!(self.routes.get(route), Some(RoutePolicy::Bypass))
    }

    /// Longest window of any route-specific rule.
    pub fn max_window(&self) -> Duration {
        self.routes
            .values()
            .filter_map(|policy| match policy {
                RoutePolicy::Specific(set) => Some(set.max_window()),
                RoutePolicy::Bypass => None,
            })
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Number of annotated routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is annotated.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
