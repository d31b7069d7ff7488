//! Declarative configuration.
//!
//! `GatekeeperConfig` deserializes from any serde format and converts into a
//! `GatekeeperBuilder`. Windows and durations are whole seconds.
//!
//! ```
//! use gatekeeper::GatekeeperConfig;
//!
//! let config: GatekeeperConfig = serde_json::from_str(r#"{
//!     "ban_rule": { "count": 3, "window": 60, "duration": 600 },
//!     "rate_limit_rules": [{ "count": 20, "window": 1 }],
//!     "client_header": "x-forwarded-for",
//!     "routes": {
//!         "/health": { "bypass": true },
//!         "/login": { "rate_limit_rules": [{ "count": 1, "window": 2 }] }
//!     }
//! }"#).unwrap();
//!
//! let gate = config.into_builder().unwrap().build().unwrap();
//! assert!(gate.engine().policy().routes().is_bypass("/health"));
//! ```

use crate::domain::rule::{BanRule, RateRule, RuleError, RuleSet, RoutePolicy};
use crate::infrastructure::gate::{BuildError, Gatekeeper, GatekeeperBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A rate rule in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateRuleConfig {
    pub count: u32,
    pub window: u64,
}

/// A ban rule in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BanRuleConfig {
    pub count: u32,
    pub window: u64,
    pub duration: u64,
}

/// Per-route annotation.
///
/// Either `bypass: true`, or a non-empty `rate_limit_rules` list optionally
/// marked `standalone`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteConfig {
    pub bypass: bool,
    pub rate_limit_rules: Vec<RateRuleConfig>,
    pub standalone: bool,
}

/// Complete gatekeeper configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatekeeperConfig {
    pub ban_rule: Option<BanRuleConfig>,
    pub rate_limit_rules: Vec<RateRuleConfig>,
    pub client_header: Option<String>,
    pub excluded_methods: Vec<String>,
    pub routes: BTreeMap<String, RouteConfig>,
}

impl TryFrom<RateRuleConfig> for RateRule {
    type Error = RuleError;

    fn try_from(config: RateRuleConfig) -> Result<Self, Self::Error> {
        RateRule::per_secs(config.count, config.window)
    }
}

impl TryFrom<BanRuleConfig> for BanRule {
    type Error = RuleError;

    fn try_from(config: BanRuleConfig) -> Result<Self, Self::Error> {
        BanRule::per_secs(config.count, config.window, config.duration)
    }
}

fn rate_rules(configs: Vec<RateRuleConfig>) -> Result<Vec<RateRule>, RuleError> {
    configs.into_iter().map(RateRule::try_from).collect()
}

impl RouteConfig {
    fn into_policy(self, route: &str) -> Result<RoutePolicy, BuildError> {
        if self.bypass {
            if !self.rate_limit_rules.is_empty() || self.standalone {
                return Err(BuildError::BypassWithRules(route.to_owned()));
            }
            return Ok(RoutePolicy::Bypass);
        }
        if self.rate_limit_rules.is_empty() {
            return Err(BuildError::EmptyRouteRules(route.to_owned()));
        }

        let rules = rate_rules(self.rate_limit_rules)?;
        Ok(RoutePolicy::Specific(if self.standalone {
            RuleSet::standalone(rules)
        } else {
            RuleSet::overlay(rules)
        }))
    }
}

impl GatekeeperConfig {
    /// Validate the rules and convert into a builder.
    ///
    /// The builder can still be customised (e.g. `with_clock`) before `build()`.
    ///
    /// # Errors
    /// Returns `BuildError` for invalid thresholds or inconsistent routes.
    pub fn into_builder(self) -> Result<GatekeeperBuilder, BuildError> {
        let mut builder = Gatekeeper::builder()
            .with_rate_rules(rate_rules(self.rate_limit_rules)?)
            .with_excluded_methods(self.excluded_methods);

        if let Some(ban) = self.ban_rule {
            builder = builder.with_ban_rule(BanRule::try_from(ban)?);
        }
        if let Some(header) = self.client_header {
            builder = builder.with_client_header(header);
        }
        for (route, config) in self.routes {
            let policy = config.into_policy(&route)?;
            builder = builder.with_route(route, policy);
        }

        Ok(builder)
    }
}
