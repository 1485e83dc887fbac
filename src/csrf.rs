// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Anti-forgery (CSRF) tokens using the double-submit pattern.
//!
//! A token is handed out twice: as an `HttpOnly` cookie the page cannot read
//! and as a response header the page echoes back. A state-changing request
//! passes only when both copies are present, byte-equal, known to the store
//! and unexpired. Safe methods are never inspected.

use crate::clock::Clock;
use crate::config::CsrfConfig;
use crate::error::Result;
use crate::token_store::{CsrfTokenRecord, TokenStore};
use axum::http::Method;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

const TOKEN_BYTES: usize = 32;

/// Why a token check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfRejection {
    /// Header or cookie copy absent
    MissingToken,
    /// Header and cookie copies differ
    Mismatch,
    /// Not issued by this store, or already rotated out
    UnknownToken,
    Expired,
}

impl std::fmt::Display for CsrfRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingToken => write!(f, "CSRF token missing"),
            Self::Mismatch => write!(f, "CSRF token mismatch"),
            Self::UnknownToken => write!(f, "CSRF token not recognised"),
            Self::Expired => write!(f, "CSRF token expired"),
        }
    }
}

/// Result of a token check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfOutcome {
    Allow,
    Deny(CsrfRejection),
}

/// Issues and validates anti-forgery tokens.
#[derive(Debug)]
pub struct CsrfGuard {
    store: TokenStore,
    ttl: Duration,
    enabled: bool,
    cookie_name: String,
    header_name: String,
    clock: Arc<dyn Clock>,
}

impl CsrfGuard {
    pub fn new(config: &CsrfConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        if !config.enabled {
            warn!("CSRF protection disabled; this override is for development only");
        }
        Ok(Self {
            store: TokenStore::new(),
            ttl: config.token_ttl(),
            enabled: config.enabled,
            cookie_name: config.cookie_name.clone(),
            header_name: config.header_name.to_ascii_lowercase(),
            clock,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Generate, store and return a fresh token.
    pub fn issue(&self) -> CsrfTokenRecord {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);

        let now = self.clock.now();
        let record = CsrfTokenRecord {
            token: hex::encode(bytes),
            issued_at: now,
            expires_at: now + self.ttl,
        };
        self.store.insert(record.clone());
        record
    }

    /// Invalidate `previous` (if any) and issue a replacement.
    ///
    /// Call after sensitive operations such as login so a leaked token dies.
    pub fn rotate(&self, previous: Option<&str>) -> CsrfTokenRecord {
        if let Some(old) = previous {
            if self.store.remove(old).is_some() {
                debug!("Rotated out previous CSRF token");
            }
        }
        self.issue()
    }

    /// Check the header and cookie copies of a token for `method`.
    pub fn validate(
        &self,
        header_token: Option<&str>,
        cookie_token: Option<&str>,
        method: &Method,
    ) -> CsrfOutcome {
        if !self.enabled || is_safe_method(method) {
            return CsrfOutcome::Allow;
        }

        let (header, cookie) = match (non_empty(header_token), non_empty(cookie_token)) {
            (Some(h), Some(c)) => (h, c),
            _ => return CsrfOutcome::Deny(CsrfRejection::MissingToken),
        };

        if !constant_time_eq(header, cookie) {
            return CsrfOutcome::Deny(CsrfRejection::Mismatch);
        }

        let now = self.clock.now();
        if self.store.remove_if_expired(cookie, now) {
            return CsrfOutcome::Deny(CsrfRejection::Expired);
        }
        match self.store.get(cookie) {
            Some(record) if !record.is_expired(now) => CsrfOutcome::Allow,
            Some(_) => CsrfOutcome::Deny(CsrfRejection::Expired),
            None => CsrfOutcome::Deny(CsrfRejection::UnknownToken),
        }
    }

    /// Drop expired tokens. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.clock.now())
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// `Set-Cookie` value carrying `token`, unreadable by page scripts.
    pub fn cookie_header(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; Secure; SameSite=Strict",
            self.cookie_name,
            token,
            self.ttl.as_secs()
        )
    }
}

/// Methods that only read state.
pub fn is_safe_method(method: &Method) -> bool {
    *method == Method::GET
        || *method == Method::HEAD
        || *method == Method::OPTIONS
        || *method == Method::TRACE
}

fn non_empty(token: Option<&str>) -> Option<&str> {
    token.filter(|t| !t.is_empty())
}

/// Compare two strings without leaking where they first differ.
///
/// Lengths are compared in constant time too; the shorter input is padded
/// with a different byte so unequal lengths never compare equal.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let max_len = a.len().max(b.len());
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);
    (lengths_equal & contents_equal).into()
}
