// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Per-key fixed-window counters.
//!
//! Windows live in a sharded [`DashMap`]. Every read-modify-write on a key
//! runs while that key's shard lock is held, so concurrent requests sharing a
//! key never lose an increment. The sweep takes the same lock and can only
//! remove a window that is both expired and idle.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Identifies one counter: a route class plus the client it is counting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub route_class: String,
    /// Client IP or authenticated id
    pub client_id: String,
}

impl RateLimitKey {
    pub fn new(route_class: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            route_class: route_class.into(),
            client_id: client_id.into(),
        }
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.route_class, self.client_id)
    }
}

/// One counting window for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub window_start: Instant,
    pub count: u32,
    pub limit: u32,
    pub window_duration: Duration,
    /// Last request that touched this key
    pub last_touch: Instant,
}

impl RateLimitWindow {
    pub fn new(now: Instant, limit: u32, window_duration: Duration) -> Self {
        Self {
            window_start: now,
            count: 0,
            limit,
            window_duration,
            last_touch: now,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window_duration
    }

    /// Time left until this window closes.
    pub fn remaining_time(&self, now: Instant) -> Duration {
        self.window_duration
            .saturating_sub(now.saturating_duration_since(self.window_start))
    }
}

/// Concurrent store of rate-limit windows.
#[derive(Debug, Default)]
pub struct RateLimitRegistry {
    windows: DashMap<RateLimitKey, RateLimitWindow>,
}

impl RateLimitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `accessor` on the window for `key` under the key's lock.
    ///
    /// The window is created on first use, and replaced by a fresh one when
    /// the current one has expired, before `accessor` sees it.
    pub fn with_window<F, R>(
        &self,
        key: &RateLimitKey,
        limit: u32,
        window_duration: Duration,
        now: Instant,
        accessor: F,
    ) -> R
    where
        F: FnOnce(&mut RateLimitWindow) -> R,
    {
        let mut entry = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| RateLimitWindow::new(now, limit, window_duration));

        let window = entry.value_mut();
        if window.is_expired(now)
            || window.limit != limit
            || window.window_duration != window_duration
        {
            *window = RateLimitWindow::new(now, limit, window_duration);
        }
        window.last_touch = now;
        accessor(window)
    }

    /// Copy of the current window for `key`, if any.
    pub fn snapshot(&self, key: &RateLimitKey) -> Option<RateLimitWindow> {
        self.windows.get(key).map(|w| w.value().clone())
    }

    /// Drop windows that have expired and seen no request for `idle`.
    ///
    /// Returns the number of windows removed.
    pub fn sweep(&self, now: Instant, idle: Duration) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            let idle_for = now.saturating_duration_since(window.last_touch);
            !(window.is_expired(now) && idle_for >= idle)
        });
        before.saturating_sub(self.windows.len())
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_window_created_lazily() {
        let registry = RateLimitRegistry::new();
        let key = RateLimitKey::new("api", "10.0.0.1");
        assert!(registry.snapshot(&key).is_none());

        let now = Instant::now();
        registry.with_window(&key, 5, MINUTE, now, |w| w.count += 1);

        let window = registry.snapshot(&key).unwrap();
        assert_eq!(window.count, 1);
        assert_eq!(window.window_start, now);
    }

    #[test]
    fn test_expired_window_replaced() {
        let registry = RateLimitRegistry::new();
        let key = RateLimitKey::new("api", "10.0.0.1");
        let start = Instant::now();

        registry.with_window(&key, 5, MINUTE, start, |w| w.count = 5);
        let later = start + MINUTE;
        let count = registry.with_window(&key, 5, MINUTE, later, |w| w.count);

        assert_eq!(count, 0);
        assert_eq!(registry.snapshot(&key).unwrap().window_start, later);
    }

    #[test]
    fn test_remaining_time() {
        let start = Instant::now();
        let window = RateLimitWindow::new(start, 5, MINUTE);
        assert_eq!(
            window.remaining_time(start + Duration::from_secs(45)),
            Duration::from_secs(15)
        );
        assert_eq!(window.remaining_time(start + MINUTE * 2), Duration::ZERO);
    }

    #[test]
    fn test_sweep_keeps_live_windows() {
        let registry = RateLimitRegistry::new();
        let start = Instant::now();
        let stale = RateLimitKey::new("api", "stale");
        let live = RateLimitKey::new("api", "live");

        registry.with_window(&stale, 5, MINUTE, start, |w| w.count += 1);
        registry.with_window(&live, 5, MINUTE, start + MINUTE * 5, |w| w.count += 1);

        let removed = registry.sweep(start + MINUTE * 6, Duration::from_secs(300));

        assert_eq!(removed, 1);
        assert!(registry.snapshot(&stale).is_none());
        assert!(registry.snapshot(&live).is_some());
    }

    #[test]
    fn test_sweep_keeps_recently_touched_expired_window() {
        let registry = RateLimitRegistry::new();
        let start = Instant::now();
        let key = RateLimitKey::new("auth", "10.0.0.9");

        registry.with_window(&key, 5, Duration::from_secs(1), start, |w| w.count += 1);

        // Expired, but touched only two seconds ago.
        assert_eq!(registry.sweep(start + Duration::from_secs(2), MINUTE), 0);
        assert_eq!(registry.len(), 1);
    }
}
