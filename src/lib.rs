//! # gatekeeper
//!
//! Request admission guard for HTTP services: per-client sliding-window rate
//! limiting and report-driven temporary banning.
//!
//! Every request is attributed to a client (a header value or the peer IP).
//! The guard keeps a bounded history of accepted requests and of reported
//! misbehaviour for each client, and decides per request:
//!
//! - **Banned** clients are refused with `403 Forbidden` until the ban expires.
//! - Clients over a **rate rule** are refused with `429 Too Many Requests`.
//! - Everyone else proceeds, and the request is counted.
//!
//! Both refusals carry a `Retry-After` header in whole seconds.
//!
//! ## Quick Start
//!
//! ```rust
//! use gatekeeper::{BanRule, Gatekeeper, RateRule};
//! use http::{Request, StatusCode};
//!
//! let gate = Gatekeeper::builder()
//!     .with_ban_rule(BanRule::per_secs(3, 60, 600).unwrap())
//!     .with_rate_rule(RateRule::per_secs(2, 1).unwrap())
//!     .with_client_header("x-client-id")
//!     .build()
//!     .unwrap();
//!
//! let request = || Request::builder().header("x-client-id", "alice").body(()).unwrap();
//!
//! assert!(gate.check(None, &request(), None).is_none());
//! assert!(gate.check(None, &request(), None).is_none());
//!
//! let refusal = gate.check(None, &request(), None).unwrap();
//! assert_eq!(refusal.status(), StatusCode::TOO_MANY_REQUESTS);
//! ```
//!
//! ## Rules
//!
//! - A [`RateRule`] allows at most `count` accepted requests in any trailing
//!   `window`. Several rules may be combined; the tightest breached rule is
//!   reported.
//! - A [`BanRule`] bans a client for `duration` once `count` reports arrive
//!   within `window`. Reports come from the application through
//!   [`Gatekeeper::report`], e.g. after a failed login.
//!
//! Windows and ban durations must be non-zero and at most
//! [`MAX_RULE_DURATION`].
//!
//! Refused requests are never counted, so a client hammering the guard
//! regains access as soon as its accepted requests age out.
//!
//! ## Route Composition
//!
//! Routes can be annotated in a side-table keyed by route identifier:
//!
//! - **bypass**: exempt from every check, never counted
//! - **overlay**: route rules apply in addition to the global rules
//! - **standalone**: route rules replace the global rules for the route
//!
//! ```rust
//! use gatekeeper::{Gatekeeper, RateRule};
//!
//! let gate = Gatekeeper::builder()
//!     .with_rate_rule(RateRule::per_secs(100, 10).unwrap())
//!     .with_bypass("/health")
//!     .with_overlay("/login", [RateRule::per_secs(1, 2).unwrap()])
//!     .with_standalone("/export", [RateRule::per_secs(40, 5).unwrap()])
//!     .build()
//!     .unwrap();
//!
//! let login = gate.guard("/login", |_req: http::Request<()>| http::Response::new("ok".to_string()));
//! let peer = Some("192.0.2.1:50000".parse().unwrap());
//!
//! assert_eq!(login.call(http::Request::new(()), peer).status(), 200);
//! assert_eq!(login.call(http::Request::new(()), peer).status(), 429);
//! ```
//!
//! Requests whose method is listed in `with_excluded_methods` (e.g. `HEAD`,
//! `OPTIONS`) are not counted, but are still refused while the client is
//! banned.
//!
//! ## Observability
//!
//! Decisions are logged through `tracing` (`warn` when a client is banned,
//! `info` when a ban lifts, `debug` for individual denials) and counted in
//! [`Metrics`]:
//!
//! ```rust
//! # use gatekeeper::Gatekeeper;
//! # let gate = Gatekeeper::builder().build().unwrap();
//! let snapshot = gate.metrics().snapshot();
//! println!(
//!     "allowed={} rate_limited={} banned={} denial_rate={:.1}%",
//!     snapshot.requests_allowed,
//!     snapshot.requests_rate_limited,
//!     snapshot.requests_banned,
//!     snapshot.denial_rate() * 100.0,
//! );
//! ```
//!
//! ## Memory Management
//!
//! Per-client memory is bounded: a client's rate history holds at most the
//! largest rule `count` timestamps, and its report history at most the ban
//! `count`. The number of clients is not bounded on its own. Call
//! [`Gatekeeper::purge_stale`] periodically, or enable the `async` feature
//! and let `GatekeeperBuilder::with_idle_sweep` do it on a background task.
//! Purging only removes clients whose state can no longer affect a decision.
//!
//! ## Features
//!
//! - `serde` (default): [`GatekeeperConfig`], a declarative configuration
//! - `async`: background idle-client sweeping on tokio
//! - `test-helpers`: `MockClock` and `MockCaptureLayer` for downstream tests

// Domain layer - pure admission logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    ban::{BanState, BanTransition},
    decision::{Breach, Decision, Denial, DenyKind},
    rule::{
        BanRule, Composition, RateRule, RoutePolicy, RouteTable, RuleError, RuleSet,
        MAX_RULE_DURATION,
    },
    window::SlidingWindow,
};

pub use application::{
    engine::{AdmissionEngine, AdmissionPolicy},
    evaluator::evaluate,
    metrics::{Metrics, MetricsSnapshot},
    ports::{Clock, Storage},
    registry::{ClientRegistry, ClientState, ClientTemplate},
    sweeper::{Sweeper, SweeperConfig, SweeperConfigError},
};

pub use infrastructure::{
    clock::SystemClock,
    gate::{denial_response, BuildError, Gatekeeper, GatekeeperBuilder, Guarded, UNKNOWN_CLIENT},
    storage::ShardedStorage,
};

#[cfg(feature = "serde")]
pub use infrastructure::config::{BanRuleConfig, GatekeeperConfig, RateRuleConfig, RouteConfig};
