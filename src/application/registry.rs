//! Central registry of per-client admission state.
//!
//! The registry maps client identifiers to their state, creating it lazily
//! on first access. Buffer capacities are fixed by a `ClientTemplate` built
//! once from the immutable rule configuration.

use crate::application::ports::{Clock, Storage};
use crate::domain::ban::BanState;
use crate::domain::rule::{BanRule, RuleSet, RouteTable};
use crate::domain::window::SlidingWindow;
use ahash::AHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Buffer sizing and retention horizon shared by every client.
#[derive(Debug, Clone, Default)]
pub struct ClientTemplate {
    rate_capacity: usize,
    ban_rule: Option<BanRule>,
    rate_horizon: Duration,
    route_horizon: Duration,
}

impl ClientTemplate {
    /// Derive the template from the global rules, the ban rule and the route table.
    pub fn new(global: &RuleSet, ban_rule: Option<BanRule>, routes: &RouteTable) -> Self {
        Self {
            rate_capacity: global.max_count(),
            ban_rule,
            rate_horizon: global.max_window(),
            route_horizon: routes.max_window(),
        }
    }

    /// Capacity of each client's global rate window.
    pub fn rate_capacity(&self) -> usize {
        self.rate_capacity
    }

    /// Longest window of the global rules.
    pub fn rate_horizon(&self) -> Duration {
        self.rate_horizon
    }

    /// Longest window of any route-specific rule.
    pub fn route_horizon(&self) -> Duration {
        self.route_horizon
    }
}

/// State tracked for each client.
#[derive(Debug, Clone)]
pub struct ClientState {
    /// Accepted requests counted against the global rules
    pub rate: SlidingWindow,
    /// Reports and the active ban, if any
    pub ban: BanState,
    routes: AHashMap<String, SlidingWindow>,
}

impl ClientState {
    /// Create empty client state sized by the template.
    pub fn new(template: &ClientTemplate) -> Self {
        Self {
            rate: SlidingWindow::with_capacity(template.rate_capacity),
            ban: BanState::new(template.ban_rule.as_ref()),
            routes: AHashMap::new(),
        }
    }

    /// The window counting accepted requests on a route with its own rules.
    ///
    /// Created on first use with the given capacity.
    pub fn route_window_mut(&mut self, route: &str, capacity: usize) -> &mut SlidingWindow {
        self.routes
            .entry(route.to_owned())
            .or_insert_with(|| SlidingWindow::with_capacity(capacity))
    }

    /// The route window, if the client has hit that route.
    pub fn route_window(&self, route: &str) -> Option<&SlidingWindow> {
        self.routes.get(route)
    }

    /// True when dropping this state cannot change any future decision.
    pub fn is_stale(&self, template: &ClientTemplate, now: Instant) -> bool {
        self.ban.is_stale(template.ban_rule.as_ref(), now)
            && self.rate.is_stale(template.rate_horizon, now)
            && self
                .routes
                .values()
                .all(|window| window.is_stale(template.route_horizon, now))
    }
}

/// Registry managing all client state.
///
/// Uses the Storage port for concurrent access. In production, use
/// `Arc<ShardedStorage>`, which serializes access per shard so that the
/// check and the subsequent record of a decision happen atomically.
#[derive(Clone)]
pub struct ClientRegistry<S>
where
    S: Storage<String, ClientState> + Clone,
{
    storage: S,
    clock: Arc<dyn Clock>,
    template: Arc<ClientTemplate>,
}

impl<S> ClientRegistry<S>
where
    S: Storage<String, ClientState> + Clone,
{
    /// Create a new registry with storage, clock, and the client template.
    pub fn new(storage: S, clock: Arc<dyn Clock>, template: ClientTemplate) -> Self {
        Self {
            storage,
            clock,
            template: Arc::new(template),
        }
    }

    /// Access or create a client's state with a callback.
    ///
    /// The callback receives exclusive access to the state and the current
    /// timestamp. Repeated calls for the same id see the same state.
    pub fn with_client<F, R>(&self, client: &str, f: F) -> R
    where
        F: FnOnce(&mut ClientState, Instant) -> R,
    {
        let now = self.clock.now();
        let template = &self.template;
        self.storage.with_entry_mut(
            client.to_owned(),
            || ClientState::new(template),
            |state| f(state, now),
        )
    }

    /// Remove clients whose state can no longer influence a decision.
    ///
    /// Returns the number of clients removed.
    pub fn purge_stale(&self) -> usize {
        let now = self.clock.now();
        let template = &self.template;
        let mut removed = 0;
        self.storage.retain(|_, state| {
            let stale = state.is_stale(template, now);
            if stale {
                removed += 1;
            }
            !stale
        });
        removed
    }

    /// Get the current time from the registry's clock.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Get the client template.
    pub fn template(&self) -> &ClientTemplate {
        &self.template
    }

    /// Check whether a client is tracked.
    pub fn contains(&self, client: &str) -> bool {
        self.storage.contains(&client.to_owned())
    }

    /// Get the number of tracked clients.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Clear all tracked state.
    pub fn clear(&self) {
        self.storage.clear();
    }

    /// Iterate over all client states with a callback.
    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(&String, &ClientState),
    {
        self.storage.for_each(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::{RateRule, RoutePolicy};
    use crate::infrastructure::mocks::MockClock;
    use crate::infrastructure::storage::ShardedStorage;

    fn template() -> ClientTemplate {
        let global = RuleSet::overlay([
            RateRule::per_secs(20, 1).unwrap(),
            RateRule::per_secs(100, 10).unwrap(),
        ]);
        let mut routes = RouteTable::new();
        routes.insert(
            "/export",
            RoutePolicy::Specific(RuleSet::standalone([RateRule::per_secs(5, 30).unwrap()])),
        );
        ClientTemplate::new(&global, BanRule::per_secs(3, 10, 10).ok(), &routes)
    }

    fn registry(clock: Arc<MockClock>) -> ClientRegistry<Arc<ShardedStorage<String, ClientState>>> {
        ClientRegistry::new(Arc::new(ShardedStorage::new()), clock, template())
    }

    #[test]
    fn test_template_sizing() {
        let template = template();
        assert_eq!(template.rate_capacity(), 100);
        assert_eq!(template.rate_horizon(), Duration::from_secs(10));
        assert_eq!(template.route_horizon(), Duration::from_secs(30));

        let state = ClientState::new(&template);
        assert_eq!(state.rate.capacity(), 100);
        assert_eq!(state.ban.reports().capacity(), 3);
    }

    #[test]
    fn test_registry_creation() {
        let registry = registry(Arc::new(MockClock::new(Instant::now())));
        assert_eq!(registry.len(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_with_client_keeps_continuity() {
        let registry = registry(Arc::new(MockClock::new(Instant::now())));

        registry.with_client("10.0.0.1", |state, now| state.rate.record(now));
        registry.with_client("10.0.0.1", |state, now| state.rate.record(now));

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("10.0.0.1"));
        let count = registry.with_client("10.0.0.1", |state, _| state.rate.len());
        assert_eq!(count, 2);
    }

    #[test]
    fn test_route_windows_are_lazy() {
        let registry = registry(Arc::new(MockClock::new(Instant::now())));

        registry.with_client("alice", |state, now| {
            assert!(state.route_window("/export").is_none());
            state.route_window_mut("/export", 5).record(now);
            assert_eq!(state.route_window("/export").map(|w| w.len()), Some(1));
            assert_eq!(state.route_window("/export").map(|w| w.capacity()), Some(5));
        });
    }

    #[test]
    fn test_purge_stale_removes_only_idle_clients() {
        let start = Instant::now();
        let clock = Arc::new(MockClock::new(start));
        let registry = registry(clock.clone());

        registry.with_client("idle", |state, now| state.rate.record(now));
        registry.with_client("exporter", |state, now| {
            state.route_window_mut("/export", 5).record(now)
        });

        clock.advance(Duration::from_secs(15));
        registry.with_client("active", |state, now| state.rate.record(now));

        // "exporter" still has an entry inside the 30s route window.
        assert_eq!(registry.purge_stale(), 1);
        assert!(!registry.contains("idle"));
        assert!(registry.contains("exporter"));
        assert!(registry.contains("active"));

        clock.advance(Duration::from_secs(30));
        assert_eq!(registry.purge_stale(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_purge_keeps_banned_clients() {
        let start = Instant::now();
        let clock = Arc::new(MockClock::new(start));
        let registry = registry(clock.clone());
        let rule = BanRule::per_secs(3, 10, 10).unwrap();

        registry.with_client("mallory", |state, now| {
            for _ in 0..3 {
                state.ban.report(now);
            }
            assert!(state.ban.evaluate(&rule, now).0.is_some());
        });

        clock.advance(Duration::from_secs(9));
        assert_eq!(registry.purge_stale(), 0);

        clock.advance(Duration::from_secs(1));
        assert_eq!(registry.purge_stale(), 1);
    }

    #[test]
    fn test_clear() {
        let registry = registry(Arc::new(MockClock::new(Instant::now())));

        for i in 0..10 {
            registry.with_client(&format!("client-{}", i), |_state, _now| {});
        }
        assert_eq!(registry.len(), 10);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_first_access_creates_once() {
        use std::thread;

        let registry = Arc::new(registry(Arc::new(MockClock::new(Instant::now()))));
        let mut handles = vec![];

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                for _ in 0..10 {
                    registry.with_client("shared", |state, now| state.rate.record(now));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 1);
        let recorded = registry.with_client("shared", |state, _| state.rate.len());
        assert_eq!(recorded, 80);
    }
}
