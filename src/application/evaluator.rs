//! Multi-rule rate limit evaluation.
//!
//! All rules of a scope observe the same event stream, so they are evaluated
//! against one shared window. The first breaching rule is reported; every true
//! breach blocks the request regardless of rule order.

use crate::domain::decision::Breach;
use crate::domain::rule::RateRule;
use crate::domain::window::SlidingWindow;
use std::time::Instant;

/// Evaluate `rules` in order against `window` and return the first breach.
///
/// A rule is breached when at least `count` accepted requests are already
/// inside its window. The caller records the request only when this returns
/// `None`.
///
/// # Example
/// ```
/// use gatekeeper::{evaluate, RateRule, SlidingWindow};
/// use std::time::Instant;
///
/// let rules = [RateRule::per_secs(2, 1).unwrap()];
/// let mut window = SlidingWindow::with_capacity(2);
/// let now = Instant::now();
///
/// for _ in 0..2 {
///     assert!(evaluate(&window, &rules, now).is_none());
///     window.record(now);
/// }
///
/// let breach = evaluate(&window, &rules, now).unwrap();
/// assert_eq!(breach.count, 2);
/// assert_eq!(breach.retry_after, 1);
/// ```
pub fn evaluate(window: &SlidingWindow, rules: &[RateRule], now: Instant) -> Option<Breach> {
    rules.iter().find_map(|rule| {
        if window.count_within(rule.window(), now) >= rule.count() as usize {
            Some(Breach {
                retry_after: window.retry_after(rule.window(), now),
                count: rule.count(),
                window: rule.window(),
            })
        } else {
            None
        }
    })
}
