// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Check-in Trust Gate Service
//!
//! Serves the check-in API behind the request gate.
//!
//! ## Usage
//!
//! The service provides two modes of operation:
//!
//! 1. **External auth service**: a proxy calls `/check` with a request
//!    descriptor and the shared secret in `x-gate-secret`, then enforces the
//!    returned decision. Only mounted when a secret is configured.
//!
//! 2. **Direct**: requests hit the service itself and pass through the gate
//!    middleware before reaching `/csrf`, `/checkins` and friends.
//!
//! ## Configuration
//!
//! Loaded from the JSON file named by `GATE_CONFIG` (optional), then
//! overridden by environment variables:
//!
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `CSRF_ENABLED`: Enforce CSRF tokens (default: true)
//! - `CSRF_TOKEN_TTL_SECS`: Token lifetime (default: 86400)
//! - `GEOFENCE_NEAR_M` / `GEOFENCE_FAR_M`: Distance thresholds (default: 50 / 100)
//! - `GATE_EXCLUDED_PATHS`: Comma-separated paths that bypass the gate
//! - `GATE_CHECK_SECRET`: Shared secret enabling `/check`
//!
//! Venues come from `checkin.venues` in the JSON file:
//! `{ "checkin": { "venues": { "ramen-ya": { "lat": 35.0, "lng": 139.0 } } } }`

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use checkin_trust_gate::{
    config::Config,
    handlers::{router, AppState},
    InMemoryCheckInStore, SystemClock,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::load()?;
    info!(
        bind_addr = %config.bind_addr,
        csrf_enabled = config.csrf.enabled,
        route_classes = config.rate_limit.classes.len(),
        threat_rules = config.threat.rules.len(),
        near_m = config.geofence.near_threshold_m,
        far_m = config.geofence.far_threshold_m,
        venues = config.checkin.venues.len(),
        check_endpoint = config.gate.check_secret.is_some(),
        "Starting check-in trust gate"
    );
    if config.checkin.venues.is_empty() {
        warn!("No venues configured; every check-in will be rejected as unknown venue");
    }

    let sweep_interval = config.rate_limit.sweep_interval();
    let addr: SocketAddr = config.bind_addr.parse()?;
    let store = InMemoryCheckInStore::with_venues(&config.checkin.venues);

    let state = Arc::new(AppState::new(
        config,
        Arc::new(SystemClock::new()),
        Arc::new(store),
    )?);

    // Spawn sweep task
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            let removed = sweep_state.gate.sweep();
            debug!(removed, "Sweep complete");
        }
    });

    let app = router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
