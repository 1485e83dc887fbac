// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Check-in submission: venue lookup, verification and persistence.
//!
//! The data store is reached only through [`CheckInStore`]. Writes are
//! bounded by a timeout and retried once; if the retry also fails the caller
//! still gets the computed record, marked pending. The first record stored
//! for a check-in wins: later submissions get that stored record back, and
//! only a moderator decision through [`CheckInService::record_manual`] can
//! replace it.

use crate::config::CheckInConfig;
use crate::error::{GateError, Result};
use crate::geofence::{CheckInClaim, GeoVerifier, VenueLocation, VerificationRecord};
use crate::metrics::GateMetrics;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// What an insert-if-absent write found.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The record passed in is now stored
    Inserted(VerificationRecord),
    /// A record already existed and was left untouched
    Existing(VerificationRecord),
}

/// Storage port for venues and verification records.
#[async_trait]
pub trait CheckInStore: Send + Sync {
    async fn venue(&self, venue_id: &str) -> Result<Option<VenueLocation>>;

    /// Persist `record` unless one already exists for its check-in.
    ///
    /// Either way the result carries the record the store now holds.
    async fn save_verification(&self, record: &VerificationRecord) -> Result<SaveOutcome>;

    /// Overwrite the stored record for `record`'s check-in.
    ///
    /// Returns the record it replaced, or `None` (and writes nothing) when
    /// the check-in has no record yet.
    async fn replace_verification(
        &self,
        record: &VerificationRecord,
    ) -> Result<Option<VerificationRecord>>;
}

/// In-process store used by the service binary and tests.
#[derive(Debug, Default)]
pub struct InMemoryCheckInStore {
    venues: DashMap<String, VenueLocation>,
    records: DashMap<Uuid, VerificationRecord>,
}

impl InMemoryCheckInStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with configured venues.
    pub fn with_venues(venues: &BTreeMap<String, VenueLocation>) -> Self {
        let store = Self::new();
        for (id, location) in venues {
            store.add_venue(id.clone(), *location);
        }
        store
    }

    pub fn add_venue(&self, venue_id: impl Into<String>, location: VenueLocation) {
        self.venues.insert(venue_id.into(), location);
    }

    pub fn venue_count(&self) -> usize {
        self.venues.len()
    }

    pub fn record(&self, check_in_id: &Uuid) -> Option<VerificationRecord> {
        self.records.get(check_in_id).map(|r| r.value().clone())
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl CheckInStore for InMemoryCheckInStore {
    async fn venue(&self, venue_id: &str) -> Result<Option<VenueLocation>> {
        Ok(self.venues.get(venue_id).map(|v| *v.value()))
    }

    async fn save_verification(&self, record: &VerificationRecord) -> Result<SaveOutcome> {
        Ok(match self.records.entry(record.check_in_id()) {
            Entry::Occupied(existing) => SaveOutcome::Existing(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                SaveOutcome::Inserted(record.clone())
            }
        })
    }

    async fn replace_verification(
        &self,
        record: &VerificationRecord,
    ) -> Result<Option<VerificationRecord>> {
        Ok(self
            .records
            .get_mut(&record.check_in_id())
            .map(|mut stored| std::mem::replace(stored.value_mut(), record.clone())))
    }
}

/// Where a verification record ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// This submission's record was stored
    Persisted(VerificationRecord),
    /// The check-in already had a record; this is the stored one
    AlreadyRecorded(VerificationRecord),
    /// Computed, but the store did not acknowledge the write
    Pending(VerificationRecord),
}

impl SubmissionOutcome {
    pub fn record(&self) -> &VerificationRecord {
        match self {
            Self::Persisted(record) | Self::AlreadyRecorded(record) | Self::Pending(record) => {
                record
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// Verifies claims against stored venues and persists the result.
pub struct CheckInService {
    verifier: GeoVerifier,
    store: Arc<dyn CheckInStore>,
    persist_timeout: Duration,
    retry_backoff: Duration,
    metrics: Option<GateMetrics>,
}

impl CheckInService {
    pub fn new(
        verifier: GeoVerifier,
        store: Arc<dyn CheckInStore>,
        config: &CheckInConfig,
    ) -> Self {
        Self {
            verifier,
            store,
            persist_timeout: config.persist_timeout(),
            retry_backoff: config.retry_backoff(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: GateMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn verifier(&self) -> &GeoVerifier {
        &self.verifier
    }

    /// Verify a claim and persist the resulting record.
    ///
    /// A check-in that already has a record keeps it; the stored record is
    /// returned as [`SubmissionOutcome::AlreadyRecorded`].
    pub async fn submit(&self, claim: &CheckInClaim) -> Result<SubmissionOutcome> {
        let venue = bounded(self.persist_timeout, self.store.venue(&claim.venue_id))
            .await?
            .ok_or_else(|| GateError::UnknownVenue(claim.venue_id.clone()))?;

        let record = self.verifier.verify(claim, venue.lat, venue.lng)?;
        let outcome = self.persist(record).await;

        match &outcome {
            SubmissionOutcome::Persisted(record) => {
                self.count(record);
                info!(
                    check_in_id = %record.check_in_id(),
                    user_id = %claim.user_id,
                    venue_id = %claim.venue_id,
                    method = %record.verification_method(),
                    distance_m = record.distance_from_venue_meters(),
                    "Check-in verified"
                );
            }
            SubmissionOutcome::AlreadyRecorded(stored) => info!(
                check_in_id = %stored.check_in_id(),
                user_id = %claim.user_id,
                method = %stored.verification_method(),
                "Check-in already recorded, keeping stored record"
            ),
            SubmissionOutcome::Pending(_) => {}
        }
        Ok(outcome)
    }

    /// Replace a check-in's stored record with a moderator's acceptance.
    ///
    /// Fails with [`GateError::UnknownCheckIn`] when the check-in has no
    /// record to override. Storage faults are returned, not retried.
    pub async fn record_manual(
        &self,
        check_in_id: Uuid,
        distance_from_venue_meters: f64,
    ) -> Result<VerificationRecord> {
        if !distance_from_venue_meters.is_finite() || distance_from_venue_meters < 0.0 {
            return Err(GateError::InvalidClaim(format!(
                "distance must be a non-negative number: {distance_from_venue_meters}"
            )));
        }
        let record = self.verifier.manual(check_in_id, distance_from_venue_meters);
        let previous = bounded(self.persist_timeout, self.store.replace_verification(&record))
            .await?
            .ok_or(GateError::UnknownCheckIn(check_in_id))?;

        self.count(&record);
        info!(
            check_in_id = %check_in_id,
            previous_method = %previous.verification_method(),
            distance_m = distance_from_venue_meters,
            "Manual verification recorded"
        );
        Ok(record)
    }

    fn count(&self, record: &VerificationRecord) {
        if let Some(metrics) = &self.metrics {
            metrics.record_verification(record.verification_method());
        }
    }

    async fn persist(&self, record: VerificationRecord) -> SubmissionOutcome {
        match self.save(&record).await {
            Ok(SaveOutcome::Inserted(stored)) => return SubmissionOutcome::Persisted(stored),
            Ok(SaveOutcome::Existing(stored)) => return SubmissionOutcome::AlreadyRecorded(stored),
            Err(e) => warn!(
                check_in_id = %record.check_in_id(),
                error = %e,
                backoff_ms = self.retry_backoff.as_millis() as u64,
                "Verification write failed, retrying"
            ),
        }

        tokio::time::sleep(self.retry_backoff).await;

        match self.save(&record).await {
            Ok(SaveOutcome::Inserted(stored)) => SubmissionOutcome::Persisted(stored),
            // The timed-out first write landed after all
            Ok(SaveOutcome::Existing(stored)) if stored == record => {
                SubmissionOutcome::Persisted(stored)
            }
            Ok(SaveOutcome::Existing(stored)) => SubmissionOutcome::AlreadyRecorded(stored),
            Err(e) => {
                warn!(
                    check_in_id = %record.check_in_id(),
                    error = %e,
                    "Verification write failed twice, reporting pending"
                );
                SubmissionOutcome::Pending(record)
            }
        }
    }

    async fn save(&self, record: &VerificationRecord) -> Result<SaveOutcome> {
        bounded(self.persist_timeout, self.store.save_verification(record)).await
    }
}

async fn bounded<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| GateError::StorageTimeout(limit))?
}
