// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Geofenced check-in verification.
//!
//! Classifies how close a claimed position is to the venue:
//!
//! - `d <= near`        → `GPS_EXACT`, verified
//! - `near < d <= far`  → `GPS_NEAR`, verified (GPS drift near building edges)
//! - `d > far`          → `UNVERIFIED`
//!
//! Thresholds are configuration. A claim without usable coordinates is
//! rejected outright: (0, 0) is a real point in the Gulf of Guinea and is
//! never a stand-in for "unknown".

use crate::clock::Clock;
use crate::config::{validate_thresholds, GeofenceConfig};
use crate::distance::distance;
use crate::error::{GateError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A user's claim to be at a venue. Input only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInClaim {
    /// Caller-assigned id; resubmitting the same claim reuses it.
    pub check_in_id: Uuid,
    pub user_id: String,
    pub venue_id: String,
    pub claimed_lat: Option<f64>,
    pub claimed_lng: Option<f64>,
    #[serde(default)]
    pub claimed_accuracy_meters: Option<f64>,
    pub submitted_at: DateTime<Utc>,
}

/// Venue coordinates as held by the data store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VenueLocation {
    pub lat: f64,
    pub lng: f64,
}

/// How a check-in was judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationMethod {
    GpsExact,
    GpsNear,
    Manual,
    Unverified,
}

impl VerificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GpsExact => "GPS_EXACT",
            Self::GpsNear => "GPS_NEAR",
            Self::Manual => "MANUAL",
            Self::Unverified => "UNVERIFIED",
        }
    }
}

impl std::fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of verifying one check-in. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    check_in_id: Uuid,
    is_verified: bool,
    verification_method: VerificationMethod,
    distance_from_venue_meters: f64,
    decided_at: DateTime<Utc>,
}

impl VerificationRecord {
    /// Record a moderator's decision to accept a check-in by hand.
    pub fn manual(
        check_in_id: Uuid,
        distance_from_venue_meters: f64,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            check_in_id,
            is_verified: true,
            verification_method: VerificationMethod::Manual,
            distance_from_venue_meters,
            decided_at,
        }
    }

    pub fn check_in_id(&self) -> Uuid {
        self.check_in_id
    }

    pub fn is_verified(&self) -> bool {
        self.is_verified
    }

    pub fn verification_method(&self) -> VerificationMethod {
        self.verification_method
    }

    pub fn distance_from_venue_meters(&self) -> f64 {
        self.distance_from_venue_meters
    }

    pub fn decided_at(&self) -> DateTime<Utc> {
        self.decided_at
    }
}

/// Classifies check-in claims against venue coordinates.
#[derive(Debug, Clone)]
pub struct GeoVerifier {
    near_threshold_m: f64,
    far_threshold_m: f64,
    clock: Arc<dyn Clock>,
}

impl GeoVerifier {
    /// Build a verifier, rejecting invalid threshold ordering.
    pub fn new(config: GeofenceConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            near_threshold_m: config.near_threshold_m,
            far_threshold_m: config.far_threshold_m,
            clock,
        })
    }

    pub fn near_threshold_m(&self) -> f64 {
        self.near_threshold_m
    }

    pub fn far_threshold_m(&self) -> f64 {
        self.far_threshold_m
    }

    /// Verify using the configured thresholds.
    pub fn verify(
        &self,
        claim: &CheckInClaim,
        venue_lat: f64,
        venue_lng: f64,
    ) -> Result<VerificationRecord> {
        self.verify_with_thresholds(
            claim,
            VenueLocation {
                lat: venue_lat,
                lng: venue_lng,
            },
            self.near_threshold_m,
            self.far_threshold_m,
        )
    }

    /// Moderator override, stamped with this verifier's clock.
    pub fn manual(&self, check_in_id: Uuid, distance_from_venue_meters: f64) -> VerificationRecord {
        VerificationRecord::manual(check_in_id, distance_from_venue_meters, self.clock.utc_now())
    }

    /// Verify using explicit thresholds, validated on every call.
    pub fn verify_with_thresholds(
        &self,
        claim: &CheckInClaim,
        venue: VenueLocation,
        near_threshold_m: f64,
        far_threshold_m: f64,
    ) -> Result<VerificationRecord> {
        validate_thresholds(near_threshold_m, far_threshold_m)?;
        let (lat, lng) = claimed_position(claim)?;

        let d = distance(lat, lng, venue.lat, venue.lng);
        let method = classify(d, near_threshold_m, far_threshold_m);

        debug!(
            check_in_id = %claim.check_in_id,
            venue_id = %claim.venue_id,
            distance_m = d,
            accuracy_m = ?claim.claimed_accuracy_meters,
            method = %method,
            "Check-in classified"
        );

        Ok(VerificationRecord {
            check_in_id: claim.check_in_id,
            is_verified: method != VerificationMethod::Unverified,
            verification_method: method,
            distance_from_venue_meters: d,
            decided_at: self.clock.utc_now(),
        })
    }
}

fn classify(d: f64, near: f64, far: f64) -> VerificationMethod {
    if d <= near {
        VerificationMethod::GpsExact
    } else if d <= far {
        VerificationMethod::GpsNear
    } else {
        VerificationMethod::Unverified
    }
}

fn claimed_position(claim: &CheckInClaim) -> Result<(f64, f64)> {
    let (lat, lng) = match (claim.claimed_lat, claim.claimed_lng) {
        (Some(lat), Some(lng)) => (lat, lng),
        (None, _) => return Err(GateError::InvalidClaim("missing latitude".to_string())),
        (_, None) => return Err(GateError::InvalidClaim("missing longitude".to_string())),
    };
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(GateError::InvalidClaim(format!("latitude out of range: {lat}")));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(GateError::InvalidClaim(format!("longitude out of range: {lng}")));
    }
    if let Some(accuracy) = claim.claimed_accuracy_meters {
        if !accuracy.is_finite() || accuracy < 0.0 {
            return Err(GateError::InvalidClaim(format!(
                "accuracy must be a non-negative distance: {accuracy}"
            )));
        }
    }
    Ok((lat, lng))
}
