// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Test data generators for attack simulation.

use std::net::{IpAddr, Ipv4Addr};

/// Generate a pool of client ids (IP addresses) for testing.
pub fn generate_client_ids(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            // Use 10.x.x.x private range
            let a = ((i >> 16) & 0xFF) as u8;
            let b = ((i >> 8) & 0xFF) as u8;
            let c = (i & 0xFF) as u8;
            IpAddr::V4(Ipv4Addr::new(10, a, b, c)).to_string()
        })
        .collect()
}

/// Traversal probes, plain and encoded.
pub fn generate_traversal_paths() -> Vec<&'static str> {
    vec![
        "/api/../../etc/passwd",
        "/static/..%2f..%2fconfig",
        "/static/%2e%2e/%2e%2e/secret",
        "/STATIC/%2E%2E/%2E%2E/secret",
        "/files/..\\..\\windows\\win.ini",
        "/download/%252e%252e/%252e%252e/etc",
        "/static/%2e./%2e./secret",
        "/static/.%2e/.%2e/etc/shadow",
        "/files/..",
        "/api/.env",
        "/.git/config",
    ]
}

/// Query strings carrying script or SQL meta-sequences.
pub fn generate_injection_queries() -> Vec<&'static str> {
    vec![
        "q=<script>alert(1)</script>",
        "q=%3Cscript%3Ealert(1)%3C/script%3E",
        "redirect=javascript:alert(1)",
        "img=x%20onerror=alert(1)",
        "id=1+UNION+SELECT+password+FROM+users",
        "id=1%20union%20select%20null",
        "name=' OR '1'='1",
        "id=1; DROP TABLE users",
    ]
}

/// Header and cookie pairs an attacker might present. None means absent.
pub fn generate_forged_token_pairs() -> Vec<(Option<String>, Option<String>)> {
    let forged = "a".repeat(64);
    let other = "b".repeat(64);
    vec![
        (None, None),
        (Some(forged.clone()), None),
        (None, Some(forged.clone())),
        (Some(forged.clone()), Some(other)),
        (Some(forged.clone()), Some(forged)),
        (Some(String::new()), Some(String::new())),
        (Some("short".to_string()), Some("short".to_string())),
    ]
}

/// Generate various Content-Type values for bypass testing.
pub fn generate_content_types() -> Vec<Option<&'static str>> {
    vec![
        // Valid
        Some("application/json"),
        Some("application/json; charset=utf-8"),
        Some("APPLICATION/JSON"), // Case variation
        // Invalid - should be rejected
        Some("application/x-www-form-urlencoded"),
        Some("text/plain"),
        Some("multipart/form-data; boundary=---"),
        Some("text/html"),
        Some("application/xml"),
        Some("application/jsonp"),
        None, // Missing
    ]
}

/// Classify a Content-Type as acceptable for JSON-only routes.
pub fn is_json_content_type(ct: Option<&str>) -> bool {
    match ct {
        Some(s) => {
            let normalized = s.split(';').next().unwrap_or("").trim().to_lowercase();
            normalized == "application/json"
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_client_ids() {
        let ids = generate_client_ids(256);
        assert_eq!(ids.len(), 256);
        // All should be unique
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 256);
    }

    #[test]
    fn test_content_type_classification() {
        assert!(is_json_content_type(Some("application/json")));
        assert!(is_json_content_type(Some("Application/JSON; charset=utf-8")));
        assert!(!is_json_content_type(Some("application/jsonp")));
        assert!(!is_json_content_type(None));
    }
}
