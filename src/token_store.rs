// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Authoritative store of issued CSRF tokens.

use dashmap::DashMap;
use std::time::Instant;

/// One issued anti-forgery token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfTokenRecord {
    /// 256 random bits, hex encoded
    pub token: String,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

impl CsrfTokenRecord {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Token → issuance metadata, safe for concurrent use.
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: DashMap<String, CsrfTokenRecord>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: CsrfTokenRecord) {
        self.tokens.insert(record.token.clone(), record);
    }

    pub fn get(&self, token: &str) -> Option<CsrfTokenRecord> {
        self.tokens.get(token).map(|r| r.value().clone())
    }

    /// Remove a token, returning its record if it was present.
    pub fn remove(&self, token: &str) -> Option<CsrfTokenRecord> {
        self.tokens.remove(token).map(|(_, record)| record)
    }

    /// Remove `token` only if it has expired at `now`.
    pub fn remove_if_expired(&self, token: &str, now: Instant) -> bool {
        self.tokens
            .remove_if(token, |_, record| record.is_expired(now))
            .is_some()
    }

    /// Drop every expired token. Returns the number removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.tokens.len())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
