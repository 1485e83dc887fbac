// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Time sources shared by every guard.
//!
//! Guards measure windows and expiry against a monotonic [`Instant`]; records
//! that leave the process (verification results) are stamped with wall-clock
//! UTC time. Both come from the same injected [`Clock`] so tests can drive
//! them with [`MockClock`].

use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source of the current time.
pub trait Clock: Send + Sync + Debug {
    /// Monotonic now, used for windows and token expiry.
    fn now(&self) -> Instant;

    /// Wall-clock now, used to stamp persisted records.
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug)]
struct MockTime {
    instant: Instant,
    utc: DateTime<Utc>,
}

/// Manually advanced clock for tests.
///
/// Clones share the same underlying time, so advancing one clone advances
/// every guard holding another.
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<MockTime>>,
}

impl MockClock {
    /// Create a mock clock frozen at the given instant.
    pub fn new(start: Instant) -> Self {
        Self {
            current: Arc::new(Mutex::new(MockTime {
                instant: start,
                utc: Utc::now(),
            })),
        }
    }

    /// Advance both the monotonic and wall-clock readings.
    pub fn advance(&self, duration: Duration) {
        let mut time = self.lock();
        time.instant += duration;
        if let Ok(delta) = chrono::Duration::from_std(duration) {
            time.utc += delta;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockTime> {
        // A poisoned lock only means another test thread panicked; the time
        // value itself is still usable.
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.lock().instant
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.lock().utc
    }
}
