// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Framework-neutral view of an inbound request.
//!
//! The gate never touches a live request body. HTTP handling code extracts
//! a [`RequestDescriptor`] and applies the returned decision itself.

use axum::http::{header, request::Parts, HeaderMap, Method};
use serde::Deserialize;
use std::collections::HashMap;

/// What the gate needs to know about a request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    /// Client IP or authenticated id
    pub client_id: String,
    pub cookies: HashMap<String, String>,
    /// Declared body size, if known
    pub body_len: Option<u64>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            client_id: client_id.into(),
            cookies: HashMap::new(),
            body_len: None,
        }
    }

    /// Build from HTTP request parts, parsing `Cookie` and `Content-Length`.
    pub fn from_parts(parts: &Parts, client_id: impl Into<String>) -> Self {
        let body_len = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());

        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers.clone(),
            client_id: client_id.into(),
            cookies: parse_cookies(&parts.headers),
            body_len,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = value.parse() {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    pub fn with_body_len(mut self, len: u64) -> Self {
        self.body_len = Some(len);
        self
    }

    /// Header value as text, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Media type without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        self.header(header::CONTENT_TYPE.as_str()).map(|s| {
            s.split(';').next().unwrap_or(s).trim().to_lowercase()
        })
    }
}

/// Split every `Cookie` header into name/value pairs. Later duplicates win.
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// JSON form of a descriptor, for the external-authorization endpoint.
#[derive(Debug, Deserialize)]
pub struct DescriptorBody {
    pub method: String,
    pub path: String,
    pub client_id: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    #[serde(default)]
    pub body_len: Option<u64>,
}

impl DescriptorBody {
    /// Convert into a descriptor, failing on an unusable method or header.
    pub fn into_descriptor(self) -> Result<RequestDescriptor, String> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| format!("invalid method '{}'", self.method))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| format!("invalid header name '{name}'"))?;
            let value = header::HeaderValue::from_str(value)
                .map_err(|_| format!("invalid value for header '{name}'"))?;
            headers.append(name, value);
        }

        let mut cookies = parse_cookies(&headers);
        cookies.extend(self.cookies);

        Ok(RequestDescriptor {
            method,
            path: self.path,
            query: self.query,
            headers,
            client_id: self.client_id,
            cookies,
            body_len: self.body_len,
        })
    }
}
