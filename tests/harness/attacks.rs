// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Attack simulation patterns for security testing.

use std::time::Duration;

/// What the attacker sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vector {
    /// Plain reads against one route
    Flood,
    /// Traversal sequences in the path
    Traversal,
    /// Script and SQL meta-sequences in the query
    Injection,
    /// State-changing requests with missing or forged tokens
    CsrfForgery,
    /// Check-in writes with non-JSON bodies
    ContentTypeBypass,
}

/// Attack pattern configuration.
#[derive(Debug, Clone)]
pub struct AttackConfig {
    /// Total number of requests to send
    pub total_requests: usize,
    /// Requests per second rate (simulated clock)
    pub requests_per_second: f64,
    /// Number of unique client ids to simulate
    pub unique_clients: usize,
    /// Target path for flood-style vectors
    pub path: &'static str,
    pub vector: Vector,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            total_requests: 100,
            requests_per_second: 10.0,
            unique_clients: 1,
            path: "/api/venues",
            vector: Vector::Flood,
        }
    }
}

/// Predefined attack patterns.
impl AttackConfig {
    /// Credential stuffing style flood against the strict auth class.
    pub fn login_flood() -> Self {
        Self {
            total_requests: 200,
            requests_per_second: 100.0,
            path: "/login",
            ..Default::default()
        }
    }

    /// Distributed attack - many clients, each over its own quota.
    pub fn distributed_flood() -> Self {
        Self {
            total_requests: 2000,
            requests_per_second: 200.0,
            unique_clients: 10,
            ..Default::default()
        }
    }

    /// Slow drip - stay just under the api quota.
    pub fn slow_drip() -> Self {
        Self {
            total_requests: 100,
            requests_per_second: 1.9, // 100 requests in ~53s < 120 per 60s
            ..Default::default()
        }
    }

    /// Sustained flood spanning several windows.
    pub fn sustained_login_flood() -> Self {
        Self {
            total_requests: 180,
            requests_per_second: 1.0,
            path: "/login",
            ..Default::default()
        }
    }

    pub fn traversal_probe() -> Self {
        Self {
            total_requests: 60,
            requests_per_second: 50.0,
            unique_clients: 3,
            vector: Vector::Traversal,
            ..Default::default()
        }
    }

    pub fn query_injection() -> Self {
        Self {
            total_requests: 60,
            requests_per_second: 50.0,
            unique_clients: 3,
            vector: Vector::Injection,
            ..Default::default()
        }
    }

    pub fn csrf_forgery() -> Self {
        Self {
            total_requests: 50,
            requests_per_second: 5.0,
            unique_clients: 50,
            path: "/api/posts",
            vector: Vector::CsrfForgery,
        }
    }

    pub fn content_type_bypass() -> Self {
        Self {
            total_requests: 40,
            requests_per_second: 5.0,
            unique_clients: 40,
            path: "/checkins",
            vector: Vector::ContentTypeBypass,
        }
    }

    /// Simulated time between two requests.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.requests_per_second)
    }

    /// Calculate expected duration for the attack.
    pub fn expected_duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_requests as f64 / self.requests_per_second)
    }
}

/// Expected outcomes for different attack types.
pub struct AttackExpectations {
    /// Maximum ratio of requests that should be allowed
    pub max_allowed_ratio: f64,
    /// Description of expected behavior
    pub description: &'static str,
}

impl AttackConfig {
    /// Get expected outcomes for this attack pattern, given the route's quota.
    pub fn expectations(&self, limit: u32, window: Duration) -> AttackExpectations {
        match self.vector {
            Vector::Traversal | Vector::Injection => AttackExpectations {
                max_allowed_ratio: 0.0,
                description: "Every probe should be stopped by threat inspection",
            },
            Vector::CsrfForgery => AttackExpectations {
                max_allowed_ratio: 0.0,
                description: "No forged state change should pass",
            },
            Vector::ContentTypeBypass => AttackExpectations {
                max_allowed_ratio: 0.0,
                description: "Non-JSON writes blocked, JSON writes still need a token",
            },
            Vector::Flood => {
                let windows =
                    (self.expected_duration().as_secs_f64() / window.as_secs_f64()).ceil().max(1.0);
                let cap = windows * f64::from(limit) * self.unique_clients as f64;
                AttackExpectations {
                    max_allowed_ratio: (cap / self.total_requests as f64).min(1.0),
                    description: "Each client capped at its route-class quota per window",
                }
            }
        }
    }
}
