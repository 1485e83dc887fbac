// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! The request gate: one ordered pipeline every inbound request crosses.
//!
//! Order is fixed: excluded paths skip everything, then threat inspection,
//! then rate limiting, then CSRF, then hardened response headers. The first
//! stage that denies ends evaluation, so a request flagged as hostile is
//! never counted against the caller's quota.
//!
//! Stages sit behind the [`Stage`] trait. [`RequestGate::from_stages`]
//! accepts any ordered list, which lets tests observe exactly which stages
//! ran for a given request.

use crate::config::Config;
use crate::csrf::{CsrfGuard, CsrfOutcome};
use crate::inspector::{Severity, ThreatInspector};
use crate::limiter::{RateLimitOutcome, RateLimiter};
use crate::metrics::GateMetrics;
use crate::request::RequestDescriptor;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const THREAT_DETECTED: &str = "THREAT_DETECTED";
pub const RATE_LIMITED: &str = "RATE_LIMITED";
pub const CSRF_REJECTED: &str = "CSRF_REJECTED";

/// Remaining quota in the caller's current window.
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Why a stage refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub status: StatusCode,
    pub reason_code: &'static str,
    pub retry_after: Option<Duration>,
    /// Operator-facing detail, logged but never sent to the client
    pub detail: String,
}

/// What a single stage decided.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Continue, adding these headers to the eventual response
    Pass { headers: HeaderMap },
    Deny(Denial),
}

impl Verdict {
    pub fn pass() -> Self {
        Self::Pass {
            headers: HeaderMap::new(),
        }
    }
}

/// One step of the pipeline.
pub trait Stage: Send + Sync {
    /// Stable label used in logs and metrics.
    fn name(&self) -> &'static str;

    fn evaluate(&self, request: &RequestDescriptor) -> Verdict;

    /// Drop expired state. Returns the number of entries removed.
    fn sweep(&self) -> usize {
        0
    }
}

/// Final outcome for one request.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allow: bool,
    /// Set on denial
    pub status: Option<StatusCode>,
    /// Set on denial
    pub reason_code: Option<&'static str>,
    /// Headers the caller must attach to the response
    pub headers: HeaderMap,
    /// Stage that denied, if any
    pub stage: Option<&'static str>,
    pub retry_after_secs: Option<u64>,
    /// The path was excluded and no stage ran
    pub excluded: bool,
}

impl Decision {
    fn excluded() -> Self {
        Self {
            allow: true,
            status: None,
            reason_code: None,
            headers: HeaderMap::new(),
            stage: None,
            retry_after_secs: None,
            excluded: true,
        }
    }

    fn allow(headers: HeaderMap) -> Self {
        Self {
            allow: true,
            status: None,
            reason_code: None,
            headers,
            stage: None,
            retry_after_secs: None,
            excluded: false,
        }
    }

    fn deny(stage: &'static str, denial: &Denial) -> Self {
        let mut headers = HeaderMap::new();
        let retry_after_secs = denial.retry_after.map(retry_after_secs);
        if let Some(secs) = retry_after_secs {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        Self {
            allow: false,
            status: Some(denial.status),
            reason_code: Some(denial.reason_code),
            headers,
            stage: Some(stage),
            retry_after_secs,
            excluded: false,
        }
    }
}

/// Whole seconds to wait, rounded up and never zero.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Headers added to every response that clears the whole pipeline.
pub fn hardened_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers
}

/// Paths that bypass the gate entirely. A trailing `*` matches by prefix.
#[derive(Debug, Clone, Default)]
pub struct ExcludedPaths {
    exact: Vec<String>,
    prefixes: Vec<String>,
}

impl ExcludedPaths {
    pub fn new(patterns: &[String]) -> Self {
        let mut excluded = Self::default();
        for pattern in patterns {
            match pattern.strip_suffix('*') {
                Some(prefix) => excluded.prefixes.push(prefix.to_string()),
                None => excluded.exact.push(pattern.clone()),
            }
        }
        excluded
    }

    pub fn matches(&self, path: &str) -> bool {
        self.exact.iter().any(|p| p == path)
            || self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// Rejects requests matching a threat rule at or above the severity floor.
#[derive(Debug)]
pub struct ThreatStage {
    inspector: ThreatInspector,
    severity_floor: Severity,
}

impl ThreatStage {
    pub fn new(inspector: ThreatInspector, severity_floor: Severity) -> Self {
        Self {
            inspector,
            severity_floor,
        }
    }
}

impl Stage for ThreatStage {
    fn name(&self) -> &'static str {
        "threat"
    }

    fn evaluate(&self, request: &RequestDescriptor) -> Verdict {
        let Some(signal) = self.inspector.inspect(request) else {
            return Verdict::pass();
        };

        if signal.severity < self.severity_floor {
            debug!(
                rule = %signal.matched_rule,
                severity = %signal.severity,
                fingerprint = %signal.request_fingerprint,
                "Threat signal below severity floor"
            );
            return Verdict::pass();
        }

        Verdict::Deny(Denial {
            status: StatusCode::FORBIDDEN,
            reason_code: THREAT_DETECTED,
            retry_after: None,
            detail: format!(
                "rule={} severity={} fingerprint={}",
                signal.matched_rule, signal.severity, signal.request_fingerprint
            ),
        })
    }
}

/// Applies per-route-class quotas.
#[derive(Debug)]
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn evaluate(&self, request: &RequestDescriptor) -> Verdict {
        let key = self.limiter.key_for(&request.path, &request.client_id);
        match self.limiter.check(&key) {
            RateLimitOutcome::Allow { remaining, .. } => {
                let mut headers = HeaderMap::new();
                headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(remaining));
                Verdict::Pass { headers }
            }
            RateLimitOutcome::Deny { retry_after } => Verdict::Deny(Denial {
                status: StatusCode::TOO_MANY_REQUESTS,
                reason_code: RATE_LIMITED,
                retry_after: Some(retry_after),
                detail: format!("quota exhausted for {key}"),
            }),
        }
    }

    fn sweep(&self) -> usize {
        self.limiter.sweep()
    }
}

/// Double-submit token check for state-changing methods.
///
/// Exempt paths are server-to-server endpoints that carry their own
/// credential instead of a browser cookie.
#[derive(Debug)]
pub struct CsrfStage {
    guard: Arc<CsrfGuard>,
    exempt: ExcludedPaths,
}

impl CsrfStage {
    pub fn new(guard: Arc<CsrfGuard>, exempt: ExcludedPaths) -> Self {
        Self { guard, exempt }
    }
}

impl Stage for CsrfStage {
    fn name(&self) -> &'static str {
        "csrf"
    }

    fn evaluate(&self, request: &RequestDescriptor) -> Verdict {
        if self.exempt.matches(&request.path) {
            return Verdict::pass();
        }
        let header_token = request.header(self.guard.header_name());
        let cookie_token = request.cookie(self.guard.cookie_name());

        match self.guard.validate(header_token, cookie_token, &request.method) {
            CsrfOutcome::Allow => Verdict::pass(),
            CsrfOutcome::Deny(rejection) => Verdict::Deny(Denial {
                status: StatusCode::FORBIDDEN,
                reason_code: CSRF_REJECTED,
                retry_after: None,
                detail: rejection.to_string(),
            }),
        }
    }

    fn sweep(&self) -> usize {
        self.guard.purge_expired()
    }
}

/// Ordered pipeline of stages plus the exclusion list.
pub struct RequestGate {
    excluded: ExcludedPaths,
    stages: Vec<Box<dyn Stage>>,
    metrics: Option<GateMetrics>,
}

impl std::fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stages: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("RequestGate")
            .field("excluded", &self.excluded)
            .field("stages", &stages)
            .finish()
    }
}

impl RequestGate {
    /// Standard pipeline: threat, rate limit, CSRF.
    pub fn new(config: &Config, limiter: Arc<RateLimiter>, csrf: Arc<CsrfGuard>) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(ThreatStage::new(
                ThreatInspector::new(config.threat.rules.clone()),
                config.threat.severity_floor,
            )),
            Box::new(RateLimitStage::new(limiter)),
            Box::new(CsrfStage::new(
                csrf,
                ExcludedPaths::new(&config.csrf.exempt_paths),
            )),
        ];
        Self::from_stages(&config.gate.excluded_paths, stages)
    }

    /// Pipeline from an arbitrary ordered stage list.
    pub fn from_stages(excluded_paths: &[String], stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            excluded: ExcludedPaths::new(excluded_paths),
            stages,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: GateMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run the pipeline for one request.
    pub fn admit(&self, request: &RequestDescriptor) -> Decision {
        if self.excluded.matches(&request.path) {
            debug!(path = %request.path, "Path excluded from gate");
            self.record("excluded", "skip");
            return Decision::excluded();
        }

        let mut headers = HeaderMap::new();
        for stage in &self.stages {
            match stage.evaluate(request) {
                Verdict::Pass { headers: added } => headers.extend(added),
                Verdict::Deny(denial) => {
                    warn!(
                        target: "security",
                        stage = stage.name(),
                        reason = denial.reason_code,
                        status = denial.status.as_u16(),
                        client_id = %request.client_id,
                        method = %request.method,
                        path = %request.path,
                        detail = %denial.detail,
                        "Request denied"
                    );
                    self.record(stage.name(), "deny");
                    return Decision::deny(stage.name(), &denial);
                }
            }
        }

        headers.extend(hardened_headers());
        self.record("gate", "allow");
        Decision::allow(headers)
    }

    /// Drop expired state held by every stage. Returns the total removed.
    pub fn sweep(&self) -> usize {
        let removed: usize = self.stages.iter().map(|s| s.sweep()).sum();
        if removed > 0 {
            debug!(removed, "Swept expired gate state");
        }
        removed
    }

    fn record(&self, stage: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_decision(stage, outcome);
        }
    }
}
