// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Check-in Trust Gate
//!
//! The request-boundary trust layer for a check-in service. Every inbound
//! request crosses one ordered pipeline before business logic runs:
//!
//! - Excluded paths (health, metrics, public assets) skip the gate
//! - Threat inspection against declarative rules
//! - Fixed-window rate limiting per route class and client
//! - Double-submit CSRF tokens on state-changing methods
//! - Hardened response headers on every admitted request
//!
//! Check-in submissions are additionally classified by distance from the
//! venue (`GPS_EXACT`, `GPS_NEAR`, `UNVERIFIED`) and persisted through the
//! [`checkin::CheckInStore`] port.

pub mod checkin;
pub mod clock;
pub mod config;
pub mod csrf;
pub mod distance;
pub mod error;
pub mod gate;
pub mod geofence;
pub mod handlers;
pub mod inspector;
pub mod limiter;
pub mod metrics;
pub mod registry;
pub mod request;
pub mod token_store;

pub use checkin::{
    CheckInService, CheckInStore, InMemoryCheckInStore, SaveOutcome, SubmissionOutcome,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::Config;
pub use csrf::{CsrfGuard, CsrfOutcome, CsrfRejection};
pub use error::{GateError, Result};
pub use gate::{Decision, RequestGate, Stage, Verdict};
pub use geofence::{CheckInClaim, GeoVerifier, VerificationMethod, VerificationRecord};
pub use inspector::{Severity, ThreatInspector, ThreatRule, ThreatSignal};
pub use limiter::{RateLimitOutcome, RateLimiter};
pub use request::RequestDescriptor;
