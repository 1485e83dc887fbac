// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the trust gate.
//!
//! Denials (rate limit, CSRF, threat) are ordinary outcomes and never appear
//! here; these variants cover misconfiguration, bad input and storage faults.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Trust gate error types
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid check-in claim: {0}")]
    InvalidClaim(String),

    #[error("Venue not found: {0}")]
    UnknownVenue(String),

    #[error("No verification recorded for check-in {0}")]
    UnknownCheckIn(Uuid),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage timed out after {0:?}")]
    StorageTimeout(Duration),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl GateError {
    /// Generic code safe to hand back to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidClaim(_) => "INVALID_CLAIM",
            Self::UnknownVenue(_) => "UNKNOWN_VENUE",
            Self::UnknownCheckIn(_) => "UNKNOWN_CHECK_IN",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::StorageTimeout(_) | Self::Storage(_) => "STORAGE_UNAVAILABLE",
            Self::Metrics(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, GateError>;
