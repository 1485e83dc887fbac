// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Threat inspection over request metadata.
//!
//! Rules are data (name, severity, matcher), loaded from configuration, so
//! new signatures never require touching the pipeline. Inspection covers:
//! - Path traversal and probes for sensitive files
//! - Script and SQL meta-sequences in the query string
//! - Oversized payloads
//! - Disallowed content types on sensitive routes
//!
//! All matching is case-insensitive. When several rules fire, the highest
//! severity wins; among equals, the first declared rule wins.

use crate::csrf::is_safe_method;
use crate::request::RequestDescriptor;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How serious a match is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// What a rule looks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleMatcher {
    /// Any pattern occurs in the raw (still percent-encoded) path
    PathContains { patterns: Vec<String> },
    /// The raw path ends with any suffix
    PathEndsWith { suffixes: Vec<String> },
    /// Any pattern occurs in the raw query string
    QueryContains { patterns: Vec<String> },
    /// Any pattern occurs in the named header's value
    HeaderContains { header: String, patterns: Vec<String> },
    /// The named header is absent
    MissingHeader { header: String },
    /// Declared body size exceeds the limit
    BodyLargerThan { max_bytes: u64 },
    /// A state-changing request with a body to one of the prefixes carries
    /// a media type outside the allowed list
    ContentTypeNotAllowed {
        path_prefixes: Vec<String>,
        allowed: Vec<String>,
    },
}

/// A named, declarative detection rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatRule {
    pub name: String,
    pub severity: Severity,
    pub matcher: RuleMatcher,
}

/// A rule that fired for one request. Consumed by the security log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreatSignal {
    pub matched_rule: String,
    pub severity: Severity,
    pub request_fingerprint: String,
}

/// Evaluates requests against a rule set.
#[derive(Debug, Clone)]
pub struct ThreatInspector {
    rules: Vec<ThreatRule>,
}

impl ThreatInspector {
    pub fn new(rules: Vec<ThreatRule>) -> Self {
        Self {
            rules: rules.into_iter().map(normalize_rule).collect(),
        }
    }

    pub fn rules(&self) -> &[ThreatRule] {
        &self.rules
    }

    /// Highest-severity matching rule, or `None` when nothing fires.
    pub fn inspect(&self, request: &RequestDescriptor) -> Option<ThreatSignal> {
        let path = request.path.to_lowercase();
        let query = request.query.as_deref().map(str::to_lowercase);

        let mut best: Option<&ThreatRule> = None;
        for rule in &self.rules {
            if !matches_rule(&rule.matcher, request, &path, query.as_deref()) {
                continue;
            }
            debug!(rule = %rule.name, severity = %rule.severity, "Threat rule matched");
            if best.map_or(true, |b| rule.severity > b.severity) {
                best = Some(rule);
            }
        }

        best.map(|rule| ThreatSignal {
            matched_rule: rule.name.clone(),
            severity: rule.severity,
            request_fingerprint: fingerprint(request),
        })
    }
}

impl Default for ThreatInspector {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

fn matches_rule(
    matcher: &RuleMatcher,
    request: &RequestDescriptor,
    path: &str,
    query: Option<&str>,
) -> bool {
    match matcher {
        RuleMatcher::PathContains { patterns } => contains_any(path, patterns),
        RuleMatcher::PathEndsWith { suffixes } => {
            suffixes.iter().any(|s| path.ends_with(s.as_str()))
        }
        RuleMatcher::QueryContains { patterns } => {
            query.map_or(false, |q| contains_any(q, patterns))
        }
        RuleMatcher::HeaderContains { header, patterns } => request
            .header(header)
            .map_or(false, |value| contains_any(&value.to_lowercase(), patterns)),
        RuleMatcher::MissingHeader { header } => request.header(header).is_none(),
        RuleMatcher::BodyLargerThan { max_bytes } => {
            request.body_len.map_or(false, |len| len > *max_bytes)
        }
        RuleMatcher::ContentTypeNotAllowed {
            path_prefixes,
            allowed,
        } => {
            if is_safe_method(&request.method) || request.body_len == Some(0) {
                return false;
            }
            if !path_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
                return false;
            }
            match request.content_type() {
                Some(ct) => !allowed.iter().any(|a| *a == ct),
                None => true,
            }
        }
    }
}

fn contains_any(haystack: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| haystack.contains(p.as_str()))
}

fn lowercase_all(patterns: Vec<String>) -> Vec<String> {
    patterns.into_iter().map(|p| p.to_lowercase()).collect()
}

fn normalize_rule(rule: ThreatRule) -> ThreatRule {
    let matcher = match rule.matcher {
        RuleMatcher::PathContains { patterns } => RuleMatcher::PathContains {
            patterns: lowercase_all(patterns),
        },
        RuleMatcher::PathEndsWith { suffixes } => RuleMatcher::PathEndsWith {
            suffixes: lowercase_all(suffixes),
        },
        RuleMatcher::QueryContains { patterns } => RuleMatcher::QueryContains {
            patterns: lowercase_all(patterns),
        },
        RuleMatcher::HeaderContains { header, patterns } => RuleMatcher::HeaderContains {
            header: header.to_lowercase(),
            patterns: lowercase_all(patterns),
        },
        RuleMatcher::MissingHeader { header } => RuleMatcher::MissingHeader {
            header: header.to_lowercase(),
        },
        RuleMatcher::ContentTypeNotAllowed {
            path_prefixes,
            allowed,
        } => RuleMatcher::ContentTypeNotAllowed {
            path_prefixes: lowercase_all(path_prefixes),
            allowed: lowercase_all(allowed),
        },
        other => other,
    };
    ThreatRule { matcher, ..rule }
}

/// Short stable digest identifying a request in the security log.
fn fingerprint(request: &RequestDescriptor) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(request.method.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(request.path.as_bytes());
    hasher.update(b"\0");
    hasher.update(request.client_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(request.header("user-agent").unwrap_or("").as_bytes());
    hasher.finalize().to_hex().as_str()[..16].to_string()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Built-in rule set.
pub fn default_rules() -> Vec<ThreatRule> {
    vec![
        ThreatRule {
            name: "path-traversal".to_string(),
            severity: Severity::High,
            matcher: RuleMatcher::PathContains {
                // Dot pairs in every plain, encoded and mixed spelling
                patterns: strings(&[
                    "../", "..\\", "%2e%2e", ".%2e", "%2e.", "..%2f", "..%5c", "%252e%252e",
                ]),
            },
        },
        ThreatRule {
            name: "path-traversal-tail".to_string(),
            severity: Severity::High,
            matcher: RuleMatcher::PathEndsWith {
                suffixes: strings(&["/..", "\\..", "%2f..", "%5c.."]),
            },
        },
        ThreatRule {
            name: "sensitive-file-probe".to_string(),
            severity: Severity::High,
            matcher: RuleMatcher::PathContains {
                patterns: strings(&["/.env", "/.git/", "/etc/passwd", "/.ssh/"]),
            },
        },
        ThreatRule {
            name: "script-injection".to_string(),
            severity: Severity::High,
            matcher: RuleMatcher::QueryContains {
                patterns: strings(&["<script", "%3cscript", "javascript:", "onerror="]),
            },
        },
        ThreatRule {
            name: "sql-meta-sequence".to_string(),
            severity: Severity::Medium,
            matcher: RuleMatcher::QueryContains {
                patterns: strings(&[
                    "union select",
                    "union+select",
                    "union%20select",
                    "' or '1'='1",
                    "%27%20or%20%271%27%3d%271",
                    "; drop table",
                ]),
            },
        },
        ThreatRule {
            name: "oversized-payload".to_string(),
            severity: Severity::Medium,
            matcher: RuleMatcher::BodyLargerThan {
                max_bytes: 1024 * 1024,
            },
        },
        ThreatRule {
            name: "json-only-route".to_string(),
            severity: Severity::Medium,
            matcher: RuleMatcher::ContentTypeNotAllowed {
                path_prefixes: strings(&["/checkins", "/auth/", "/login", "/signup"]),
                allowed: strings(&["application/json"]),
            },
        },
        ThreatRule {
            name: "missing-user-agent".to_string(),
            severity: Severity::Low,
            matcher: RuleMatcher::MissingHeader {
                header: "user-agent".to_string(),
            },
        },
    ]
}
