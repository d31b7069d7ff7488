//! Bounded sliding-window counter.
//!
//! A `SlidingWindow` retains at most `capacity` timestamps, oldest first.
//! Timestamps are recorded at "now" from a monotonic clock, so the buffer is
//! always sorted and the in-window entries form a suffix of it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Ring buffer of event timestamps with prune-free counting.
///
/// An entry is inside a window of length `w` at time `now` while
/// `now - entry < w`.
///
/// # Example
/// ```
/// use gatekeeper::SlidingWindow;
/// use std::time::{Duration, Instant};
///
/// let mut window = SlidingWindow::with_capacity(2);
/// let now = Instant::now();
///
/// window.record(now);
/// window.record(now);
/// window.record(now); // evicts the oldest entry
///
/// assert_eq!(window.len(), 2);
/// assert_eq!(window.count_within(Duration::from_secs(1), now), 2);
/// assert_eq!(window.count_within(Duration::from_secs(1), now + Duration::from_secs(1)), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SlidingWindow {
    entries: VecDeque<Instant>,
    capacity: usize,
}

impl SlidingWindow {
    /// Create a window that retains at most `capacity` entries.
    ///
    /// A zero-capacity window ignores every record.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record an event, evicting the oldest entry when full.
    pub fn record(&mut self, now: Instant) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(now);
    }

    /// Index of the first entry still inside the window.
    fn first_within(&self, window: Duration, now: Instant) -> usize {
        self.entries
            .partition_point(|&entry| now.saturating_duration_since(entry) >= window)
    }

    /// Number of retained entries inside the trailing window.
    pub fn count_within(&self, window: Duration, now: Instant) -> usize {
        self.entries.len() - self.first_within(window, now)
    }

    /// Earliest retained entry inside the trailing window.
    pub fn oldest_within(&self, window: Duration, now: Instant) -> Option<Instant> {
        self.entries.get(self.first_within(window, now)).copied()
    }

    /// Whole seconds until the oldest in-window entry leaves the window.
    ///
    /// Rounded up, and zero when nothing is inside the window.
    pub fn retry_after(&self, window: Duration, now: Instant) -> u64 {
        self.oldest_within(window, now)
            .map(|oldest| match oldest.checked_add(window) {
                Some(expiry) => ceil_secs(expiry.saturating_duration_since(now)),
                None => ceil_secs(window),
            })
            .unwrap_or(0)
    }

    /// Most recently recorded entry.
    pub fn newest(&self) -> Option<Instant> {
        self.entries.back().copied()
    }

    /// True when no retained entry is inside the window.
    pub fn is_stale(&self, window: Duration, now: Instant) -> bool {
        self.newest()
            .map_or(true, |newest| now.saturating_duration_since(newest) >= window)
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the window holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Round a duration up to whole seconds.
pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}
