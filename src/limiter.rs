// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fixed-window rate limiter with per-route-class quotas.
//!
//! Each route class (for example a strict `auth` class and a looser `api`
//! class) carries its own `(limit, window)` pair. Paths map to classes by
//! exact match first, then longest prefix, then the configured default.
//!
//! Fixed windows allow up to twice the limit across a window edge (a burst at
//! the end of one window followed by a burst at the start of the next). This
//! is a known property of the algorithm, not a bug.

use crate::clock::Clock;
use crate::config::{RateLimitConfig, RouteClassPolicy};
use crate::error::{GateError, Result};
use crate::registry::{RateLimitKey, RateLimitRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitOutcome {
    /// Request is allowed
    Allow {
        /// Remaining requests in current window
        remaining: u32,
        /// Time until window resets
        reset_in: Duration,
    },
    /// Request exceeds the quota
    Deny {
        /// Time until the current window closes, always positive
        retry_after: Duration,
    },
}

impl RateLimitOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Maps request paths onto route classes.
#[derive(Debug, Clone)]
pub struct RouteClassResolver {
    exact: HashMap<String, String>,
    /// (prefix, class), longest prefix first
    prefixes: Vec<(String, String)>,
    default_class: String,
}

impl RouteClassResolver {
    pub fn new(classes: &[RouteClassPolicy], default_class: &str) -> Self {
        let mut exact = HashMap::new();
        let mut prefixes = Vec::new();
        for class in classes {
            for pattern in &class.paths {
                match pattern.strip_suffix('*') {
                    Some(prefix) => prefixes.push((prefix.to_string(), class.name.clone())),
                    None => {
                        exact.insert(pattern.clone(), class.name.clone());
                    }
                }
            }
        }
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self {
            exact,
            prefixes,
            default_class: default_class.to_string(),
        }
    }

    pub fn resolve(&self, path: &str) -> &str {
        if let Some(class) = self.exact.get(path) {
            return class;
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, class)| class.as_str())
            .unwrap_or(self.default_class.as_str())
    }
}

/// Thread-safe fixed-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    policies: HashMap<String, RouteClassPolicy>,
    resolver: RouteClassResolver,
    default_policy: RouteClassPolicy,
    idle_eviction: Duration,
    registry: RateLimitRegistry,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter, rejecting inconsistent policies.
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let policies: HashMap<String, RouteClassPolicy> = config
            .classes
            .iter()
            .map(|p| (p.name.clone(), p.clone()))
            .collect();
        let default_policy = policies
            .get(&config.default_class)
            .cloned()
            .ok_or_else(|| {
                GateError::Configuration(format!(
                    "no policy for default route class '{}'",
                    config.default_class
                ))
            })?;

        Ok(Self {
            policies,
            resolver: RouteClassResolver::new(&config.classes, &config.default_class),
            default_policy,
            idle_eviction: config.idle_eviction(),
            registry: RateLimitRegistry::new(),
            clock,
        })
    }

    /// Route class governing `path`.
    pub fn resolve_class(&self, path: &str) -> &str {
        self.resolver.resolve(path)
    }

    /// Build the counter key for a request.
    pub fn key_for(&self, path: &str, client_id: &str) -> RateLimitKey {
        RateLimitKey::new(self.resolve_class(path), client_id)
    }

    /// Count one request against `key` and decide.
    pub fn check(&self, key: &RateLimitKey) -> RateLimitOutcome {
        let policy = self.policy_for(&key.route_class);
        let now = self.clock.now();

        let outcome = self
            .registry
            .with_window(key, policy.limit, policy.window(), now, |window| {
                window.count = window.count.saturating_add(1);
                let reset_in = window.remaining_time(now);
                if window.count > window.limit {
                    RateLimitOutcome::Deny {
                        retry_after: reset_in,
                    }
                } else {
                    RateLimitOutcome::Allow {
                        remaining: window.limit - window.count,
                        reset_in,
                    }
                }
            });

        if let RateLimitOutcome::Deny { retry_after } = &outcome {
            debug!(key = %key, ?retry_after, "Rate limit exceeded");
        }
        outcome
    }

    /// Evict idle, expired windows. Returns the number removed.
    pub fn sweep(&self) -> usize {
        self.registry.sweep(self.clock.now(), self.idle_eviction)
    }

    pub fn registry(&self) -> &RateLimitRegistry {
        &self.registry
    }

    fn policy_for(&self, class: &str) -> &RouteClassPolicy {
        self.policies.get(class).unwrap_or(&self.default_policy)
    }
}
