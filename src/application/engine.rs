//! Admission engine: the per-request decision.
//!
//! Combines the ban state machine and the rate evaluator over the registry,
//! and resolves which rules apply to a route (global, overlay, standalone or
//! bypass).

use crate::application::evaluator::evaluate;
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, Storage};
use crate::application::registry::{ClientRegistry, ClientState, ClientTemplate};
use crate::domain::ban::BanTransition;
use crate::domain::decision::{Breach, Decision, Denial, DenyKind};
use crate::domain::rule::{BanRule, RoutePolicy, RouteTable, RuleSet};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Immutable rule configuration consulted on every decision.
#[derive(Debug, Clone, Default)]
pub struct AdmissionPolicy {
    global: RuleSet,
    ban: Option<BanRule>,
    routes: RouteTable,
    excluded_methods: BTreeSet<String>,
}

impl AdmissionPolicy {
    /// Create a policy. Method names are matched case-insensitively.
    pub fn new(
        global: RuleSet,
        ban: Option<BanRule>,
        routes: RouteTable,
        excluded_methods: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            global,
            ban,
            routes,
            excluded_methods: excluded_methods
                .into_iter()
                .map(|method| method.to_ascii_uppercase())
                .collect(),
        }
    }

    /// The global rate rules.
    pub fn global(&self) -> &RuleSet {
        &self.global
    }

    /// The ban rule, if banning is enabled.
    pub fn ban_rule(&self) -> Option<&BanRule> {
        self.ban.as_ref()
    }

    /// The route annotations.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Whether requests with this method are exempt from counting.
    pub fn is_excluded(&self, method: &str) -> bool {
        self.excluded_methods
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(method))
    }
}

/// Decides whether each request may proceed.
///
/// Cheap to clone; clones share the registry and metrics.
#[derive(Clone)]
pub struct AdmissionEngine<S>
where
    S: Storage<String, ClientState> + Clone,
{
    registry: ClientRegistry<S>,
    metrics: Metrics,
    policy: Arc<AdmissionPolicy>,
}

impl<S> AdmissionEngine<S>
where
    S: Storage<String, ClientState> + Clone,
{
    /// Create an engine over the given storage and clock.
    pub fn new(storage: S, clock: Arc<dyn Clock>, policy: AdmissionPolicy) -> Self {
        let template = ClientTemplate::new(&policy.global, policy.ban, &policy.routes);
        Self {
            registry: ClientRegistry::new(storage, clock, template),
            metrics: Metrics::new(),
            policy: Arc::new(policy),
        }
    }

    /// Decide whether `client` may proceed with a `method` request on `route`.
    ///
    /// Bans are checked before rate rules. The request is counted only when
    /// it is allowed. Bypassed routes and excluded methods are never counted;
    /// an excluded method is still refused while the client is banned.
    ///
    /// # Performance
    /// One sharded map lookup and work bounded by the buffer capacities; the
    /// check and the record happen under the same shard lock.
    pub fn decide(&self, client: &str, route: Option<&str>, method: &str) -> Decision {
        let route_policy = route.and_then(|id| self.policy.routes.get(id).map(|p| (id, p)));

        if let Some((_, RoutePolicy::Bypass)) = route_policy {
            self.metrics.record_allowed();
            return Decision::Allow;
        }

        let excluded = self.policy.is_excluded(method);
        if excluded && self.policy.ban.is_none() {
            self.metrics.record_allowed();
            return Decision::Allow;
        }

        let policy = &self.policy;
        let decision = self.registry.with_client(client, |state, now| {
            if let Some(rule) = &policy.ban {
                let (breach, transition) = state.ban.evaluate(rule, now);
                log_transition(client, transition, breach.as_ref());
                if let Some(breach) = breach {
                    return Decision::Deny(Denial::new(DenyKind::Ban, client, breach));
                }
            }

            if excluded {
                return Decision::Allow;
            }

            let breach = match route_policy {
                Some((id, RoutePolicy::Specific(set))) if set.is_standalone() => {
                    let window = state.route_window_mut(id, set.max_count());
                    let breach = evaluate(window, set.rules(), now);
                    if breach.is_none() {
                        window.record(now);
                    }
                    breach
                }
                Some((id, RoutePolicy::Specific(set))) => {
                    evaluate(&state.rate, policy.global.rules(), now).or_else(|| {
                        let window = state.route_window_mut(id, set.max_count());
                        let breach = evaluate(window, set.rules(), now);
                        if breach.is_none() {
                            window.record(now);
                            state.rate.record(now);
                        }
                        breach
                    })
                }
                _ => {
                    let breach = evaluate(&state.rate, policy.global.rules(), now);
                    if breach.is_none() {
                        state.rate.record(now);
                    }
                    breach
                }
            };

            match breach {
                Some(breach) => {
                    debug!(
                        client,
                        route,
                        retry_after = breach.retry_after,
                        count = breach.count,
                        window_secs = breach.window.as_secs_f64(),
                        "request rate limited"
                    );
                    Decision::Deny(Denial::new(DenyKind::RateLimit, client, breach))
                }
                None => Decision::Allow,
            }
        });

        match &decision {
            Decision::Allow => self.metrics.record_allowed(),
            Decision::Deny(denial) => match denial.kind {
                DenyKind::Ban => self.metrics.record_banned(),
                DenyKind::RateLimit => self.metrics.record_rate_limited(),
            },
        }

        decision
    }

    /// Register a ban-relevant event (e.g. a failed login) for `client`.
    ///
    /// Independent of request admission: the report is recorded even while
    /// the client is banned. Returns whether the client is banned afterwards.
    /// Without a ban rule this is a no-op returning `false`.
    pub fn report(&self, client: &str) -> bool {
        let Some(rule) = self.policy.ban else {
            return false;
        };

        let banned = self.registry.with_client(client, |state, now| {
            state.ban.report(now);
            let (breach, transition) = state.ban.evaluate(&rule, now);
            log_transition(client, transition, breach.as_ref());
            breach.is_some()
        });

        self.metrics.record_report();
        debug!(client, banned, "client reported");
        banned
    }

    /// Remove clients whose state can no longer influence a decision.
    ///
    /// Never called implicitly. Returns the number of clients removed.
    pub fn purge_stale(&self) -> usize {
        let removed = self.registry.purge_stale();
        if removed > 0 {
            self.metrics.record_purged(removed);
            debug!(removed, remaining = self.registry.len(), "purged idle clients");
        }
        removed
    }

    /// Get a reference to the registry.
    pub fn registry(&self) -> &ClientRegistry<S> {
        &self.registry
    }

    /// Get a reference to the metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Get a reference to the rule configuration.
    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }
}

fn log_transition(client: &str, transition: BanTransition, breach: Option<&Breach>) {
    match (transition, breach) {
        (BanTransition::Banned, Some(breach)) => warn!(
            client,
            retry_after = breach.retry_after,
            count = breach.count,
            window_secs = breach.window.as_secs_f64(),
            "client banned"
        ),
        (BanTransition::Lifted, _) => info!(client, "ban lifted"),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::RateRule;
    use crate::infrastructure::mocks::{MockCaptureLayer, MockClock};
    use crate::infrastructure::storage::ShardedStorage;
    use std::time::{Duration, Instant};
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;

    type TestEngine = AdmissionEngine<Arc<ShardedStorage<String, ClientState>>>;

    fn policy() -> AdmissionPolicy {
        let mut routes = RouteTable::new();
        routes.insert("/bypass", RoutePolicy::Bypass);
        routes.insert(
            "/specific",
            RoutePolicy::Specific(RuleSet::overlay([RateRule::per_secs(1, 2).unwrap()])),
        );
        routes.insert(
            "/standalone",
            RoutePolicy::Specific(RuleSet::standalone([RateRule::per_secs(40, 5).unwrap()])),
        );
        AdmissionPolicy::new(
            RuleSet::overlay([
                RateRule::per_secs(20, 1).unwrap(),
                RateRule::per_secs(100, 10).unwrap(),
            ]),
            BanRule::per_secs(3, 10, 10).ok(),
            routes,
            vec!["head".to_string()],
        )
    }

    fn engine() -> (TestEngine, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new(Instant::now()));
        let engine = AdmissionEngine::new(Arc::new(ShardedStorage::new()), clock.clone(), policy());
        (engine, clock)
    }

    #[test]
    fn test_global_rule_allows_exactly_count() {
        let (engine, clock) = engine();

        for _ in 0..20 {
            assert!(engine.decide("10.0.1.1", Some("/ping"), "GET").is_allow());
        }
        let decision = engine.decide("10.0.1.1", Some("/ping"), "GET");
        assert!(decision.is_rate_limited());
        let denial = decision.denial().unwrap();
        assert_eq!(denial.count, 20);
        assert_eq!(denial.retry_after, 1);

        clock.advance(Duration::from_secs(1));
        assert!(engine.decide("10.0.1.1", Some("/ping"), "GET").is_allow());
    }

    #[test]
    fn test_denied_requests_are_not_counted() {
        let (engine, clock) = engine();

        for _ in 0..20 {
            engine.decide("c", None, "GET");
        }
        for _ in 0..50 {
            assert!(engine.decide("c", None, "GET").is_rate_limited());
        }

        clock.advance(Duration::from_secs(1));
        let recorded = engine.registry().with_client("c", |state, _| state.rate.len());
        assert_eq!(recorded, 20);
        assert!(engine.decide("c", None, "GET").is_allow());
    }

    #[test]
    fn test_overlay_adds_to_global() {
        let (engine, clock) = engine();

        assert!(engine.decide("a", Some("/specific"), "GET").is_allow());
        let decision = engine.decide("a", Some("/specific"), "GET");
        assert!(decision.is_rate_limited());
        assert_eq!(decision.denial().unwrap().count, 1);

        // Other routes are unaffected by the overlay.
        assert!(engine.decide("a", Some("/ping"), "GET").is_allow());

        clock.advance(Duration::from_secs(2));
        assert!(engine.decide("a", Some("/specific"), "GET").is_allow());
    }

    #[test]
    fn test_overlay_still_counts_globally() {
        let (engine, _clock) = engine();

        for _ in 0..20 {
            engine.decide("a", Some("/ping"), "GET");
        }
        let decision = engine.decide("a", Some("/specific"), "GET");
        assert!(decision.is_rate_limited());
        assert_eq!(decision.denial().unwrap().count, 20);
        // The overlay window was not touched by the global denial.
        let touched = engine
            .registry()
            .with_client("a", |state, _| state.route_window("/specific").is_some());
        assert!(!touched);
    }

    #[test]
    fn test_standalone_ignores_global() {
        let (engine, clock) = engine();

        for _ in 0..40 {
            assert!(engine.decide("s", Some("/standalone"), "GET").is_allow());
        }
        let decision = engine.decide("s", Some("/standalone"), "GET");
        assert!(decision.is_rate_limited());
        assert_eq!(decision.denial().unwrap().count, 40);

        // Global counters were never touched.
        assert!(engine.decide("s", Some("/ping"), "GET").is_allow());

        clock.advance(Duration::from_secs(5));
        assert!(engine.decide("s", Some("/standalone"), "GET").is_allow());
    }

    #[test]
    fn test_bypass_never_denies() {
        let (engine, _clock) = engine();

        while engine.decide("b", Some("/ping"), "GET").is_allow() {}
        for _ in 0..3 {
            engine.report("b");
        }

        for _ in 0..100 {
            assert!(engine.decide("b", Some("/bypass"), "GET").is_allow());
        }
        assert!(engine.decide("b", Some("/ping"), "GET").is_ban());
    }

    #[test]
    fn test_excluded_methods_are_not_counted() {
        let (engine, _clock) = engine();

        for _ in 0..30 {
            assert!(engine.decide("h", Some("/ping"), "HEAD").is_allow());
        }
        let recorded = engine.registry().with_client("h", |state, _| state.rate.len());
        assert_eq!(recorded, 0);
    }

    #[test]
    fn test_excluded_method_match_ignores_case() {
        let policy = AdmissionPolicy::new(
            RuleSet::overlay(Vec::new()),
            None,
            RouteTable::new(),
            ["head".to_string(), "Options".to_string()],
        );

        assert!(policy.is_excluded("HEAD"));
        assert!(policy.is_excluded("head"));
        assert!(policy.is_excluded("oPtIoNs"));
        assert!(!policy.is_excluded("GET"));
        assert!(!policy.is_excluded("HEADER"));

        assert!(!AdmissionPolicy::default().is_excluded("HEAD"));
    }

    #[test]
    fn test_excluded_method_refused_while_banned() {
        let (engine, _clock) = engine();

        for _ in 0..3 {
            engine.report("h");
        }
        assert!(engine.decide("h", None, "head").is_ban());
    }

    #[test]
    fn test_ban_lifecycle() {
        let (engine, clock) = engine();

        assert!(!engine.report("10.0.0.1"));
        assert!(!engine.report("10.0.0.1"));
        assert!(engine.decide("10.0.0.1", Some("/ping"), "GET").is_allow());

        assert!(engine.report("10.0.0.1"));
        let decision = engine.decide("10.0.0.1", Some("/ping"), "GET");
        assert!(decision.is_ban());
        assert_eq!(decision.denial().unwrap().retry_after, 10);
        assert_eq!(decision.denial().unwrap().status_code(), 403);

        // Other clients are unaffected.
        assert!(engine.decide("10.0.0.2", Some("/ping"), "GET").is_allow());

        clock.advance(Duration::from_secs(9));
        assert!(engine.decide("10.0.0.1", Some("/ping"), "GET").is_ban());

        clock.advance(Duration::from_secs(1));
        assert!(engine.decide("10.0.0.1", Some("/ping"), "GET").is_allow());
    }

    #[test]
    fn test_ban_takes_precedence_over_rate_limit() {
        let (engine, _clock) = engine();

        while engine.decide("x", None, "GET").is_allow() {}
        for _ in 0..3 {
            engine.report("x");
        }
        assert!(engine.decide("x", None, "GET").is_ban());
    }

    #[test]
    fn test_report_without_ban_rule_is_noop() {
        let clock = Arc::new(MockClock::new(Instant::now()));
        let engine: TestEngine = AdmissionEngine::new(
            Arc::new(ShardedStorage::new()),
            clock,
            AdmissionPolicy::default(),
        );

        assert!(!engine.report("anyone"));
        assert!(engine.registry().is_empty());
        assert_eq!(engine.metrics().reports_recorded(), 0);
        // No rules at all: everything is allowed.
        for _ in 0..1000 {
            assert!(engine.decide("anyone", None, "GET").is_allow());
        }
    }

    #[test]
    fn test_metrics_follow_decisions() {
        let (engine, _clock) = engine();

        for _ in 0..25 {
            engine.decide("m", None, "GET");
        }
        for _ in 0..3 {
            engine.report("m");
        }
        engine.decide("m", None, "GET");
        engine.decide("m", Some("/bypass"), "GET");

        let snapshot = engine.metrics().snapshot();
        assert_eq!(snapshot.requests_allowed, 21);
        assert_eq!(snapshot.requests_rate_limited, 5);
        assert_eq!(snapshot.requests_banned, 1);
        assert_eq!(snapshot.reports_recorded, 3);
    }

    #[test]
    fn test_purge_stale_records_metrics() {
        let (engine, clock) = engine();

        engine.decide("gone", None, "GET");
        clock.advance(Duration::from_secs(10));
        assert_eq!(engine.purge_stale(), 1);
        assert_eq!(engine.metrics().clients_purged(), 1);
        assert!(engine.registry().is_empty());
    }

    #[test]
    fn test_ban_transitions_are_logged() {
        let capture = MockCaptureLayer::new();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let (engine, clock) = engine();

        tracing::subscriber::with_default(subscriber, || {
            for _ in 0..3 {
                engine.report("10.0.0.9");
            }
            clock.advance(Duration::from_secs(10));
            engine.decide("10.0.0.9", None, "GET");
        });

        let events = capture.get_captured();
        let banned: Vec<_> = events
            .iter()
            .filter(|e| e.level == Level::WARN && e.message.contains("client banned"))
            .collect();
        assert_eq!(banned.len(), 1);
        assert_eq!(banned[0].field("client"), Some("10.0.0.9"));
        assert!(events
            .iter()
            .any(|e| e.level == Level::INFO && e.message.contains("ban lifted")));
    }
}
