// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the trust gate.
//!
//! Everything here is data: route-class quotas, CSRF settings, geofence
//! thresholds, threat rules and the excluded-path list. Values come from an
//! optional JSON file (`GATE_CONFIG`) with environment overrides on top, and
//! [`Config::validate`] rejects anything inconsistent before the service
//! starts.

use crate::error::{GateError, Result};
use crate::geofence::VenueLocation;
use crate::inspector::{default_rules, Severity, ThreatRule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub csrf: CsrfConfig,

    #[serde(default)]
    pub geofence: GeofenceConfig,

    #[serde(default)]
    pub threat: ThreatConfig,

    #[serde(default)]
    pub checkin: CheckInConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Pipeline-level settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Paths that bypass every guard. A trailing `*` makes the entry a prefix.
    #[serde(default = "default_excluded_paths")]
    pub excluded_paths: Vec<String>,

    /// Shared secret a proxy must send in `x-gate-secret` to use `/check`.
    /// The endpoint is not mounted without one.
    #[serde(default)]
    pub check_secret: Option<String>,
}

/// Quota settings, one policy per route class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Class used for paths no policy claims (default: "api")
    #[serde(default = "default_route_class")]
    pub default_class: String,

    #[serde(default = "default_route_classes")]
    pub classes: Vec<RouteClassPolicy>,

    /// Interval between stale-window sweeps (default: 60)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Expired windows untouched for this long are evicted (default: 300)
    #[serde(default = "default_idle_eviction_secs")]
    pub idle_eviction_secs: u64,
}

/// Quota for one route class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteClassPolicy {
    pub name: String,
    /// Requests admitted per window
    pub limit: u32,
    pub window_ms: u64,
    /// Exact paths, or prefixes when ending in `*`
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Anti-forgery token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfConfig {
    /// Disabling is a development-only override (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Token lifetime in seconds (default: 86400)
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    #[serde(default = "default_header_name")]
    pub header_name: String,

    /// Paths authenticated by other means, skipped by the token check
    #[serde(default = "default_csrf_exempt_paths")]
    pub exempt_paths: Vec<String>,
}

/// Geofence thresholds in meters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeofenceConfig {
    #[serde(default = "default_near_threshold_m")]
    pub near_threshold_m: f64,

    #[serde(default = "default_far_threshold_m")]
    pub far_threshold_m: f64,
}

/// Threat inspection rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatConfig {
    /// Signals below this severity are logged but do not deny (default: medium)
    #[serde(default = "default_severity_floor")]
    pub severity_floor: Severity,

    #[serde(default = "default_rules")]
    pub rules: Vec<ThreatRule>,
}

/// Verification persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInConfig {
    /// Per-attempt storage timeout (default: 2000)
    #[serde(default = "default_persist_timeout_ms")]
    pub persist_timeout_ms: u64,

    /// Pause before the single retry (default: 250)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Venues loaded into the in-process store, keyed by venue id
    #[serde(default)]
    pub venues: BTreeMap<String, VenueLocation>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_excluded_paths() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/healthz".to_string(),
        "/metrics".to_string(),
        "/public/*".to_string(),
    ]
}

fn default_route_class() -> String {
    "api".to_string()
}

fn default_route_classes() -> Vec<RouteClassPolicy> {
    vec![
        RouteClassPolicy {
            name: "auth".to_string(),
            limit: 5,
            window_ms: 60_000,
            paths: vec![
                "/auth/*".to_string(),
                "/login".to_string(),
                "/signup".to_string(),
            ],
        },
        RouteClassPolicy {
            name: "checkin".to_string(),
            limit: 20,
            window_ms: 60_000,
            paths: vec!["/checkins".to_string(), "/checkins/*".to_string()],
        },
        RouteClassPolicy {
            name: "api".to_string(),
            limit: 120,
            window_ms: 60_000,
            paths: vec!["/api/*".to_string()],
        },
        // Keyed by the connecting proxy, not the described client
        RouteClassPolicy {
            name: "decision".to_string(),
            limit: 600,
            window_ms: 60_000,
            paths: vec!["/check".to_string()],
        },
    ]
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_idle_eviction_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_token_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_cookie_name() -> String {
    "csrf_token".to_string()
}

fn default_header_name() -> String {
    "x-csrf-token".to_string()
}

fn default_csrf_exempt_paths() -> Vec<String> {
    vec!["/check".to_string()]
}

fn default_near_threshold_m() -> f64 {
    50.0
}

fn default_far_threshold_m() -> f64 {
    100.0
}

fn default_severity_floor() -> Severity {
    Severity::Medium
}

fn default_persist_timeout_ms() -> u64 {
    2000
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            gate: GateConfig::default(),
            rate_limit: RateLimitConfig::default(),
            csrf: CsrfConfig::default(),
            geofence: GeofenceConfig::default(),
            threat: ThreatConfig::default(),
            checkin: CheckInConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            excluded_paths: default_excluded_paths(),
            check_secret: None,
        }
    }
}

impl std::fmt::Debug for GateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateConfig")
            .field("excluded_paths", &self.excluded_paths)
            .field("check_secret", &self.check_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_class: default_route_class(),
            classes: default_route_classes(),
            sweep_interval_secs: default_sweep_interval_secs(),
            idle_eviction_secs: default_idle_eviction_secs(),
        }
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            token_ttl_secs: default_token_ttl_secs(),
            cookie_name: default_cookie_name(),
            header_name: default_header_name(),
            exempt_paths: default_csrf_exempt_paths(),
        }
    }
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            near_threshold_m: default_near_threshold_m(),
            far_threshold_m: default_far_threshold_m(),
        }
    }
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            severity_floor: default_severity_floor(),
            rules: default_rules(),
        }
    }
}

impl Default for CheckInConfig {
    fn default() -> Self {
        Self {
            persist_timeout_ms: default_persist_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            venues: BTreeMap::new(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl Config {
    /// Load from `GATE_CONFIG` (if set) plus environment overrides, then validate.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("GATE_CONFIG") {
            Ok(path) => Self::from_json_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration file. Missing sections take their defaults.
    pub fn from_json_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GateError::Configuration(format!("cannot read {path}: {e}")))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| GateError::Configuration(format!("invalid configuration: {e}")))
    }

    /// Apply overrides from a key lookup (the process environment in production).
    ///
    /// A variable that is set but unparsable is an error, never a silent default.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(enabled) = parse_override::<bool, _>(&lookup, "CSRF_ENABLED")? {
            self.csrf.enabled = enabled;
        }
        if let Some(ttl) = parse_override::<u64, _>(&lookup, "CSRF_TOKEN_TTL_SECS")? {
            self.csrf.token_ttl_secs = ttl;
        }
        if let Some(near) = parse_override::<f64, _>(&lookup, "GEOFENCE_NEAR_M")? {
            self.geofence.near_threshold_m = near;
        }
        if let Some(far) = parse_override::<f64, _>(&lookup, "GEOFENCE_FAR_M")? {
            self.geofence.far_threshold_m = far;
        }
        if let Some(paths) = lookup("GATE_EXCLUDED_PATHS") {
            self.gate.excluded_paths = paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(secret) = lookup("GATE_CHECK_SECRET") {
            self.gate.check_secret = Some(secret);
        }
        Ok(())
    }

    /// Check every cross-field constraint.
    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate()?;
        self.geofence.validate()?;
        self.csrf.validate()?;
        self.checkin.validate()?;
        if self.gate.excluded_paths.iter().any(|p| !p.starts_with('/')) {
            return Err(GateError::Configuration(
                "excluded paths must start with '/'".to_string(),
            ));
        }
        if matches!(&self.gate.check_secret, Some(secret) if secret.trim().is_empty()) {
            return Err(GateError::Configuration(
                "check secret must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for class in &self.classes {
            if class.name.trim().is_empty() {
                return Err(GateError::Configuration(
                    "route class with empty name".to_string(),
                ));
            }
            if !seen.insert(class.name.as_str()) {
                return Err(GateError::Configuration(format!(
                    "duplicate route class '{}'",
                    class.name
                )));
            }
            if class.limit == 0 || class.window_ms == 0 {
                return Err(GateError::Configuration(format!(
                    "route class '{}' needs a positive limit and window",
                    class.name
                )));
            }
        }
        if self.sweep_interval_secs == 0 {
            return Err(GateError::Configuration(
                "sweep interval must be positive".to_string(),
            ));
        }
        if !seen.contains(self.default_class.as_str()) {
            return Err(GateError::Configuration(format!(
                "no policy for default route class '{}'",
                self.default_class
            )));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }
}

impl RouteClassPolicy {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl CsrfConfig {
    pub fn validate(&self) -> Result<()> {
        if self.token_ttl_secs == 0 {
            return Err(GateError::Configuration(
                "CSRF token TTL must be positive".to_string(),
            ));
        }
        if self.cookie_name.is_empty() || self.header_name.is_empty() {
            return Err(GateError::Configuration(
                "CSRF cookie and header names must be set".to_string(),
            ));
        }
        if self.exempt_paths.iter().any(|p| !p.starts_with('/')) {
            return Err(GateError::Configuration(
                "CSRF exempt paths must start with '/'".to_string(),
            ));
        }
        Ok(())
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl GeofenceConfig {
    /// Both thresholds positive and finite, near strictly below far.
    pub fn validate(&self) -> Result<()> {
        validate_thresholds(self.near_threshold_m, self.far_threshold_m)
    }
}

pub(crate) fn validate_thresholds(near: f64, far: f64) -> Result<()> {
    if !(near.is_finite() && far.is_finite()) || near <= 0.0 || far <= 0.0 {
        return Err(GateError::Configuration(format!(
            "geofence thresholds must be positive (near={near}, far={far})"
        )));
    }
    if near >= far {
        return Err(GateError::Configuration(format!(
            "near threshold {near} must be below far threshold {far}"
        )));
    }
    Ok(())
}

impl CheckInConfig {
    /// Every configured venue must sit at a real position.
    pub fn validate(&self) -> Result<()> {
        for (id, venue) in &self.venues {
            let lat_ok = venue.lat.is_finite() && (-90.0..=90.0).contains(&venue.lat);
            let lng_ok = venue.lng.is_finite() && (-180.0..=180.0).contains(&venue.lng);
            if id.trim().is_empty() || !lat_ok || !lng_ok {
                return Err(GateError::Configuration(format!(
                    "venue '{id}' has invalid coordinates ({}, {})",
                    venue.lat, venue.lng
                )));
            }
        }
        Ok(())
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| GateError::Configuration(format!("{key} has invalid value '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.csrf.enabled);
        assert_eq!(config.csrf.token_ttl(), Duration::from_secs(86400));
        assert_eq!(config.geofence.near_threshold_m, 50.0);
        assert_eq!(config.geofence.far_threshold_m, 100.0);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            Config::from_json_str(r#"{ "geofence": { "near_threshold_m": 30.0 } }"#).unwrap();
        assert_eq!(config.geofence.near_threshold_m, 30.0);
        assert_eq!(config.geofence.far_threshold_m, 100.0);
        assert_eq!(config.rate_limit.default_class, "api");
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = Config::default();
        config.geofence.near_threshold_m = 120.0;
        assert!(matches!(
            config.validate(),
            Err(GateError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_default_class_rejected() {
        let mut config = Config::default();
        config.rate_limit.default_class = "reads".to_string();
        assert!(matches!(
            config.validate(),
            Err(GateError::Configuration(_))
        ));
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let mut config = Config::default();
        let dup = config.rate_limit.classes[0].clone();
        config.rate_limit.classes.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let mut config = Config::default();
        config.rate_limit.classes[0].limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup_from(&[
                ("CSRF_ENABLED", "false"),
                ("GEOFENCE_FAR_M", "150"),
                ("GATE_EXCLUDED_PATHS", "/health, /status"),
            ]))
            .unwrap();

        assert!(!config.csrf.enabled);
        assert_eq!(config.geofence.far_threshold_m, 150.0);
        assert_eq!(config.gate.excluded_paths, vec!["/health", "/status"]);
    }

    #[test]
    fn test_check_endpoint_not_excluded_by_default() {
        let config = Config::default();
        assert!(!config.gate.excluded_paths.iter().any(|p| p == "/check"));
        assert!(config.gate.check_secret.is_none());
        assert_eq!(config.csrf.exempt_paths, vec!["/check"]);
        assert!(config
            .rate_limit
            .classes
            .iter()
            .any(|c| c.name == "decision" && c.paths == vec!["/check"]));
    }

    #[test]
    fn test_check_secret_from_env() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup_from(&[("GATE_CHECK_SECRET", "s3cret-value")]))
            .unwrap();
        assert_eq!(config.gate.check_secret.as_deref(), Some("s3cret-value"));
        assert!(config.validate().is_ok());

        config.gate.check_secret = Some("  ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_venues_parsed_from_json() {
        let config = Config::from_json_str(
            r#"{ "checkin": { "venues": {
                "ramen-ya": { "lat": 35.0, "lng": 139.0 },
                "pub": { "lat": 51.5, "lng": -0.12 }
            } } }"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.checkin.venues.len(), 2);
        assert_eq!(
            config.checkin.venues["pub"],
            VenueLocation { lat: 51.5, lng: -0.12 }
        );
        assert_eq!(config.checkin.persist_timeout_ms, 2000);
    }

    #[test]
    fn test_out_of_range_venue_rejected() {
        let config = Config::from_json_str(
            r#"{ "checkin": { "venues": { "nowhere": { "lat": 95.0, "lng": 0.0 } } } }"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(GateError::Configuration(_))
        ));
    }

    #[test]
    fn test_unparsable_override_is_an_error() {
        let mut config = Config::default();
        let result = config.apply_overrides(lookup_from(&[("GEOFENCE_NEAR_M", "fifty")]));
        assert!(matches!(result, Err(GateError::Configuration(_))));
    }
}
