//! Admission decisions and the breach records they carry.

use std::fmt;
use std::time::Duration;

/// A breached threshold, as reported by the ban state machine or the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breach {
    /// Whole seconds until the denial is expected to lift
    pub retry_after: u64,
    /// Threshold count of the breached rule
    pub count: u32,
    /// Window of the breached rule
    pub window: Duration,
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyKind {
    /// The client is serving a ban
    Ban,
    /// The client exceeded a rate rule
    RateLimit,
}

impl DenyKind {
    /// HTTP status code conventionally used for this denial.
    pub fn status_code(&self) -> u16 {
        match self {
            DenyKind::Ban => 403,
            DenyKind::RateLimit => 429,
        }
    }
}

/// A denied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Why the request was denied
    pub kind: DenyKind,
    /// The client the decision applies to
    pub client: String,
    /// Whole seconds until the denial is expected to lift
    pub retry_after: u64,
    /// Threshold count of the breached rule
    pub count: u32,
    /// Window of the breached rule
    pub window: Duration,
}

impl Denial {
    pub(crate) fn new(kind: DenyKind, client: &str, breach: Breach) -> Self {
        Self {
            kind,
            client: client.to_owned(),
            retry_after: breach.retry_after,
            count: breach.count,
            window: breach.window,
        }
    }

    /// HTTP status code for this denial (403 for bans, 429 for rate limits).
    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    /// Human-readable explanation suitable for a response body.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let window = self.window.as_secs_f64();
        match self.kind {
            DenyKind::Ban => write!(
                f,
                "{} banned for {}s ({} reports in {}s)",
                self.client, self.retry_after, self.count, window
            ),
            DenyKind::RateLimit => write!(
                f,
                "{} rate limited for {}s ({} requests in {}s)",
                self.client, self.retry_after, self.count, window
            ),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Let the request through
    Allow,
    /// Short-circuit the request
    Deny(Denial),
}

impl Decision {
    /// Check if this decision is Allow.
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Check if this decision is a ban.
    pub fn is_ban(&self) -> bool {
        matches!(self, Decision::Deny(denial) if denial.kind == DenyKind::Ban)
    }

    /// Check if this decision is a rate limit.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Decision::Deny(denial) if denial.kind == DenyKind::RateLimit)
    }

    /// The denial, if any.
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Decision::Allow => None,
            Decision::Deny(denial) => Some(denial),
        }
    }
}
