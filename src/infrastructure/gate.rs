//! HTTP integration.
//!
//! `Gatekeeper` wraps an `AdmissionEngine` with the request-side concerns:
//! resolving a client identifier from an `http::Request`, mapping denials to
//! `403`/`429` responses with a `Retry-After` header, and wrapping handlers
//! for routes.

use crate::application::{
    engine::{AdmissionEngine, AdmissionPolicy},
    metrics::Metrics,
    ports::{Clock, Storage},
    registry::ClientState,
    sweeper::SweeperConfigError,
};
use crate::domain::decision::{Decision, Denial};
use crate::domain::rule::{BanRule, RateRule, RoutePolicy, RouteTable, RuleError, RuleSet};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::storage::ShardedStorage;

use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{Method, Request, Response, StatusCode};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[cfg(feature = "async")]
use crate::application::sweeper::{Sweeper, SweeperConfig};

#[cfg(feature = "async")]
use std::sync::Mutex;

#[cfg(feature = "async")]
use std::time::Duration;

/// Client identifier used when neither a header nor a peer address is available.
pub const UNKNOWN_CLIENT: &str = "unknown";

type DefaultStorage = Arc<ShardedStorage<String, ClientState>>;

/// Error returned when building a `Gatekeeper` fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A rule threshold was invalid
    #[error("invalid rule: {0}")]
    Rule(#[from] RuleError),
    /// A route was given route-specific rules, but the list was empty
    #[error("route `{0}` has no rate limit rules")]
    EmptyRouteRules(String),
    /// A route was annotated more than once
    #[error("route `{0}` is configured more than once")]
    DuplicateRoute(String),
    /// A route was marked as bypassed and given rules at the same time
    #[error("route `{0}` cannot both bypass checks and carry rate limit rules")]
    BypassWithRules(String),
    /// The client header name is empty or not a valid header name
    #[error("invalid client header name `{0}`")]
    InvalidClientHeader(String),
    /// An excluded method is not a valid HTTP method token
    #[error("invalid HTTP method `{0}`")]
    InvalidMethod(String),
    /// Sweeper configuration validation failed
    #[error("sweeper configuration error: {0}")]
    Sweeper(#[from] SweeperConfigError),
}

/// Builder for constructing a `Gatekeeper`.
///
/// Defaults: no ban rule, no global rate rules, no route annotations, client
/// identified by peer IP address, no excluded methods, system clock.
#[must_use]
pub struct GatekeeperBuilder {
    ban_rule: Option<BanRule>,
    rate_rules: Vec<RateRule>,
    routes: Vec<(String, RoutePolicy)>,
    client_header: Option<String>,
    excluded_methods: Vec<String>,
    clock: Option<Arc<dyn Clock>>,
    #[cfg(feature = "async")]
    sweep_interval: Option<Duration>,
}

impl GatekeeperBuilder {
    /// Enable banning with the given rule.
    pub fn with_ban_rule(mut self, rule: BanRule) -> Self {
        self.ban_rule = Some(rule);
        self
    }

    /// Add a global rate rule.
    pub fn with_rate_rule(mut self, rule: RateRule) -> Self {
        self.rate_rules.push(rule);
        self
    }

    /// Add several global rate rules.
    ///
    /// # Example
    /// ```
    /// use gatekeeper::{Gatekeeper, RateRule};
    ///
    /// let gate = Gatekeeper::builder()
    ///     .with_rate_rules([
    ///         RateRule::per_secs(20, 1).unwrap(),
    ///         RateRule::per_secs(100, 10).unwrap(),
    ///     ])
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(gate.engine().policy().global().rules().len(), 2);
    /// ```
    pub fn with_rate_rules(mut self, rules: impl IntoIterator<Item = RateRule>) -> Self {
        self.rate_rules.extend(rules);
        self
    }

    /// Annotate a route.
    pub fn with_route(mut self, route: impl Into<String>, policy: RoutePolicy) -> Self {
        self.routes.push((route.into(), policy));
        self
    }

    /// Add route-specific rules evaluated in addition to the global rules.
    pub fn with_overlay(self, route: impl Into<String>, rules: impl IntoIterator<Item = RateRule>) -> Self {
        self.with_route(route, RoutePolicy::Specific(RuleSet::overlay(rules)))
    }

    /// Add route-specific rules that replace the global rules for the route.
    pub fn with_standalone(
        self,
        route: impl Into<String>,
        rules: impl IntoIterator<Item = RateRule>,
    ) -> Self {
        self.with_route(route, RoutePolicy::Specific(RuleSet::standalone(rules)))
    }

    /// Exempt a route from every rate and ban check.
    pub fn with_bypass(self, route: impl Into<String>) -> Self {
        self.with_route(route, RoutePolicy::Bypass)
    }

    /// Identify clients by this request header instead of the peer address.
    ///
    /// Requests without the header fall back to the peer address.
    pub fn with_client_header(mut self, name: impl Into<String>) -> Self {
        self.client_header = Some(name.into());
        self
    }

    /// Exempt these HTTP methods from rate counting (matched case-insensitively).
    ///
    /// Banned clients are still refused.
    pub fn with_excluded_methods<I, M>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        self.excluded_methods
            .extend(methods.into_iter().map(Into::into));
        self
    }

    /// Set a custom clock (for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Purge idle clients on a background task every `interval`.
    ///
    /// `build()` must then be called from within a tokio runtime.
    #[cfg(feature = "async")]
    pub fn with_idle_sweep(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Build the gatekeeper.
    ///
    /// # Errors
    /// Returns `BuildError` if the configuration is invalid.
    pub fn build(self) -> Result<Gatekeeper, BuildError> {
        let client_header = self
            .client_header
            .map(|name| {
                HeaderName::from_bytes(name.trim().as_bytes())
                    .map_err(|_| BuildError::InvalidClientHeader(name))
            })
            .transpose()?;

        let mut excluded = BTreeSet::new();
        for method in self.excluded_methods {
            let upper = method.trim().to_ascii_uppercase();
            if Method::from_bytes(upper.as_bytes()).is_err() {
                return Err(BuildError::InvalidMethod(method));
            }
            excluded.insert(upper);
        }

        let mut routes = RouteTable::new();
        for (route, policy) in self.routes {
            if let RoutePolicy::Specific(set) = &policy {
                if set.is_empty() {
                    return Err(BuildError::EmptyRouteRules(route));
                }
            }
            if routes.get(&route).is_some() {
                return Err(BuildError::DuplicateRoute(route));
            }
            routes.insert(route, policy);
        }

        let global = RuleSet::overlay(self.rate_rules);
        info!(
            rate_rules = global.rules().len(),
            ban = self.ban_rule.is_some(),
            routes = routes.len(),
            excluded_methods = excluded.len(),
            client_header = client_header.as_ref().map(HeaderName::as_str),
            "gatekeeper configured"
        );

        let policy = AdmissionPolicy::new(global, self.ban_rule, routes, excluded);
        let clock = self.clock.unwrap_or_else(SystemClock::shared);
        let engine = AdmissionEngine::new(Arc::new(ShardedStorage::new()), clock, policy);

        #[cfg(feature = "async")]
        let sweeper_handle = match self.sweep_interval {
            Some(interval) => {
                let config = SweeperConfig::new(interval)?;
                Some(Sweeper::new(engine.clone(), config).start())
            }
            None => None,
        };

        Ok(Gatekeeper {
            engine,
            client_header,
            #[cfg(feature = "async")]
            sweeper_handle: Arc::new(Mutex::new(sweeper_handle)),
        })
    }
}

/// Request-admission guard for HTTP services.
///
/// Cheap to clone; clones share client state, metrics and the sweeper.
#[derive(Clone)]
pub struct Gatekeeper<S = DefaultStorage>
where
    S: Storage<String, ClientState> + Clone,
{
    engine: AdmissionEngine<S>,
    client_header: Option<HeaderName>,
    #[cfg(feature = "async")]
    sweeper_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl<S> Gatekeeper<S>
where
    S: Storage<String, ClientState> + Clone,
{
    /// Resolve the identifier used to track the client behind `request`.
    ///
    /// Order: the configured client header (when present and non-blank), then
    /// the peer IP from `peer`, then a `SocketAddr` in the request
    /// extensions, then `"unknown"`.
    pub fn resolve_client_id<B>(&self, request: &Request<B>, peer: Option<SocketAddr>) -> String {
        let from_header = self.client_header.as_ref().and_then(|name| {
            request
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        });
        if let Some(id) = from_header {
            return id.to_owned();
        }

        peer.or_else(|| request.extensions().get::<SocketAddr>().copied())
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_owned())
    }

    /// Decide whether `request` may reach the handler for `route`.
    pub fn decide<B>(&self, route: Option<&str>, request: &Request<B>, peer: Option<SocketAddr>) -> Decision {
        let client = self.resolve_client_id(request, peer);
        self.engine
            .decide(&client, route, request.method().as_str())
    }

    /// Check a request, returning the refusal response if it is denied.
    ///
    /// `None` means the request may proceed and has been counted.
    pub fn check<B>(
        &self,
        route: Option<&str>,
        request: &Request<B>,
        peer: Option<SocketAddr>,
    ) -> Option<Response<String>> {
        match self.decide(route, request, peer) {
            Decision::Allow => None,
            Decision::Deny(denial) => Some(denial_response(&denial)),
        }
    }

    /// Wrap a handler so every call goes through `check` for `route` first.
    pub fn guard<H>(&self, route: impl Into<String>, handler: H) -> Guarded<H, S> {
        Guarded {
            gate: self.clone(),
            route: route.into(),
            handler,
        }
    }

    /// Report the client behind `request` (e.g. after a failed login).
    ///
    /// Returns whether the client is banned afterwards.
    pub fn report<B>(&self, request: &Request<B>, peer: Option<SocketAddr>) -> bool {
        let client = self.resolve_client_id(request, peer);
        self.engine.report(&client)
    }

    /// Report a client by identifier.
    pub fn report_client(&self, client: &str) -> bool {
        self.engine.report(client)
    }

    /// Remove clients whose state can no longer influence a decision.
    pub fn purge_stale(&self) -> usize {
        self.engine.purge_stale()
    }

    /// Get a reference to the admission engine.
    pub fn engine(&self) -> &AdmissionEngine<S> {
        &self.engine
    }

    /// Get a reference to the metrics.
    pub fn metrics(&self) -> &Metrics {
        self.engine.metrics()
    }

    /// Number of clients currently tracked.
    pub fn client_count(&self) -> usize {
        self.engine.registry().len()
    }

    /// Stop the background sweeper, if one was started.
    #[cfg(feature = "async")]
    pub fn stop_sweeper(&self) {
        let handle = match self.sweeper_handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Gatekeeper<DefaultStorage> {
    /// Create a builder for configuring the gatekeeper.
    pub fn builder() -> GatekeeperBuilder {
        GatekeeperBuilder {
            ban_rule: None,
            rate_rules: Vec::new(),
            routes: Vec::new(),
            client_header: None,
            excluded_methods: Vec::new(),
            clock: None,
            #[cfg(feature = "async")]
            sweep_interval: None,
        }
    }

    /// Create a gatekeeper over a custom storage backend.
    ///
    /// Clients are identified by peer address; no sweeper is started.
    pub fn with_storage<ST>(storage: ST, policy: AdmissionPolicy, clock: Arc<dyn Clock>) -> Gatekeeper<ST>
    where
        ST: Storage<String, ClientState> + Clone,
    {
        Gatekeeper {
            engine: AdmissionEngine::new(storage, clock, policy),
            client_header: None,
            #[cfg(feature = "async")]
            sweeper_handle: Arc::new(Mutex::new(None)),
        }
    }
}

/// A handler wrapped by `Gatekeeper::guard`.
#[derive(Clone)]
pub struct Guarded<H, S = DefaultStorage>
where
    S: Storage<String, ClientState> + Clone,
{
    gate: Gatekeeper<S>,
    route: String,
    handler: H,
}

impl<H, S> Guarded<H, S>
where
    S: Storage<String, ClientState> + Clone,
{
    /// Run the handler if the request is admitted, otherwise return the refusal.
    pub fn call<B>(&self, request: Request<B>, peer: Option<SocketAddr>) -> Response<String>
    where
        H: Fn(Request<B>) -> Response<String>,
    {
        match self.gate.check(Some(&self.route), &request, peer) {
            Some(refusal) => refusal,
            None => (self.handler)(request),
        }
    }

    /// The route this handler is guarded as.
    pub fn route(&self) -> &str {
        &self.route
    }
}

/// Build the refusal response for a denial.
///
/// `403 Forbidden` for bans, `429 Too Many Requests` for rate limits, both
/// with `Retry-After` in whole seconds and the denial message as a plain-text
/// body.
pub fn denial_response(denial: &Denial) -> Response<String> {
    let mut response = Response::new(denial.message());
    *response.status_mut() =
        StatusCode::from_u16(denial.status_code()).unwrap_or(StatusCode::TOO_MANY_REQUESTS);
    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(denial.retry_after));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
