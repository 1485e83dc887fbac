// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus counters for gate decisions and check-in verification.
//!
//! Metrics live in a registry owned by the application rather than the
//! process-wide default, so several gates (and parallel tests) never collide.

use crate::error::Result;
use crate::geofence::VerificationMethod;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters exported on the metrics endpoint.
#[derive(Debug, Clone)]
pub struct GateMetrics {
    registry: Registry,
    decisions: IntCounterVec,
    verifications: IntCounterVec,
}

impl GateMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let decisions = IntCounterVec::new(
            Opts::new("gate_decisions_total", "Request gate decisions by stage and outcome"),
            &["stage", "outcome"],
        )?;
        let verifications = IntCounterVec::new(
            Opts::new(
                "checkin_verifications_total",
                "Check-in verification results by method",
            ),
            &["method"],
        )?;

        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(verifications.clone()))?;

        Ok(Self {
            registry,
            decisions,
            verifications,
        })
    }

    /// Count one gate decision. `stage` is the deciding stage, or `gate` for a full pass.
    pub fn record_decision(&self, stage: &str, outcome: &str) {
        self.decisions.with_label_values(&[stage, outcome]).inc();
    }

    pub fn record_verification(&self, method: VerificationMethod) {
        self.verifications
            .with_label_values(&[method.as_str()])
            .inc();
    }

    pub fn decision_count(&self, stage: &str, outcome: &str) -> u64 {
        self.decisions.with_label_values(&[stage, outcome]).get()
    }

    pub fn verification_count(&self, method: VerificationMethod) -> u64 {
        self.verifications
            .with_label_values(&[method.as_str()])
            .get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode every metric in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let metrics = GateMetrics::new().unwrap();
        metrics.record_decision("rate_limit", "deny");
        metrics.record_decision("rate_limit", "deny");
        metrics.record_verification(VerificationMethod::GpsExact);

        assert_eq!(metrics.decision_count("rate_limit", "deny"), 2);
        assert_eq!(metrics.verification_count(VerificationMethod::GpsExact), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("gate_decisions_total{outcome=\"deny\",stage=\"rate_limit\"} 2"));
        assert!(text.contains("checkin_verifications_total{method=\"GPS_EXACT\"} 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = GateMetrics::new().unwrap();
        let b = GateMetrics::new().unwrap();
        a.record_decision("csrf", "deny");
        assert_eq!(b.decision_count("csrf", "deny"), 0);
    }
}
