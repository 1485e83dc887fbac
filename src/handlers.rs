// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the trust gate service.
//!
//! Every route sits behind [`gate_middleware`], which runs the request gate
//! and either answers with the denial or forwards the request and attaches
//! the decision's headers. `/check` is the external-authorization mode: a
//! proxy posts a request descriptor and reads the decision from the body.
//! It is mounted only when a shared secret is configured, and the gate
//! still limits it per connecting address.

use crate::checkin::{CheckInService, CheckInStore, SubmissionOutcome};
use crate::clock::Clock;
use crate::config::Config;
use crate::csrf::{constant_time_eq, CsrfGuard};
use crate::error::{GateError, Result};
use crate::gate::{
    Decision, RequestGate, CSRF_REJECTED, RATE_LIMITED, THREAT_DETECTED, X_RATELIMIT_REMAINING,
};
use crate::geofence::{CheckInClaim, GeoVerifier, VerificationRecord};
use crate::limiter::RateLimiter;
use crate::metrics::GateMetrics;
use crate::request::{parse_cookies, DescriptorBody, RequestDescriptor};
use crate::token_store::CsrfTokenRecord;
use axum::{
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header carrying the shared secret for `/check`.
pub const CHECK_SECRET_HEADER: &str = "x-gate-secret";

/// Shared application state.
pub struct AppState {
    pub gate: RequestGate,
    pub csrf: Arc<CsrfGuard>,
    pub checkins: CheckInService,
    pub metrics: GateMetrics,
    pub config: Config,
}

impl AppState {
    /// Wire every guard from configuration around one clock and store.
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        store: Arc<dyn CheckInStore>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = GateMetrics::new()?;

        let csrf = Arc::new(CsrfGuard::new(&config.csrf, clock.clone())?);
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit, clock.clone())?);
        let gate = RequestGate::new(&config, limiter, csrf.clone()).with_metrics(metrics.clone());

        let verifier = GeoVerifier::new(config.geofence, clock)?;
        let checkins =
            CheckInService::new(verifier, store, &config.checkin).with_metrics(metrics.clone());

        Ok(Self {
            gate,
            csrf,
            checkins,
            metrics,
            config,
        })
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Freshly issued CSRF token.
#[derive(Debug, Serialize, Deserialize)]
pub struct CsrfTokenResponse {
    pub token: String,
    pub header_name: String,
    pub expires_in_secs: u64,
}

/// Gate decision for the external-authorization endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    /// Headers the proxy should add to the upstream response
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Moderator override for one check-in.
#[derive(Debug, Deserialize)]
pub struct ManualVerificationRequest {
    pub distance_from_venue_meters: f64,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            GateError::InvalidClaim(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            GateError::UnknownVenue(_) => (StatusCode::NOT_FOUND, "Venue not found".to_string()),
            GateError::UnknownCheckIn(_) => {
                (StatusCode::NOT_FOUND, "Check-in not found".to_string())
            }
            GateError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            GateError::StorageTimeout(_) | GateError::Storage(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Storage temporarily unavailable".to_string(),
            ),
            GateError::Configuration(_) | GateError::Metrics(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            ),
        };
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error,
                code: self.code(),
                retry_after_secs: None,
            }),
        )
            .into_response()
    }
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/csrf", get(issue_csrf))
        .route("/csrf/rotate", post(rotate_csrf))
        .route("/checkins", post(submit_checkin))
        .route("/checkins/:id/manual", post(manual_checkin));

    if state.config.gate.check_secret.is_some() {
        router = router.route("/check", post(check));
    }
    if state.config.metrics.enabled {
        router = router.route(&state.config.metrics.path, get(metrics));
    }

    router
        .layer(middleware::from_fn_with_state(state.clone(), gate_middleware))
        .with_state(state)
}

/// Run the request gate in front of every route.
pub async fn gate_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let descriptor = RequestDescriptor::from_parts(&parts, addr.ip().to_string());
    let decision = state.gate.admit(&descriptor);

    if !decision.allow {
        return denial_response(decision);
    }

    let mut response = next.run(Request::from_parts(parts, body)).await;
    response.headers_mut().extend(decision.headers);
    response
}

fn denial_response(decision: Decision) -> Response {
    let status = decision.status.unwrap_or(StatusCode::FORBIDDEN);
    let code = decision.reason_code.unwrap_or(THREAT_DETECTED);
    let error = match code {
        RATE_LIMITED => "Too many requests",
        CSRF_REJECTED => "Invalid or missing CSRF token",
        _ => "Request blocked",
    };

    let mut response = (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code,
            retry_after_secs: decision.retry_after_secs,
        }),
    )
        .into_response();
    response.headers_mut().extend(decision.headers);
    response
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "checkin-trust-gate",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Issue a CSRF token as a cookie, a response header and JSON.
pub async fn issue_csrf(State(state): State<Arc<AppState>>) -> Response {
    let record = state.csrf.issue();
    debug!("Issued CSRF token");
    token_response(&state.csrf, record)
}

/// Replace the caller's current token. The gate has already validated it.
pub async fn rotate_csrf(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let cookies = parse_cookies(&headers);
    let previous = cookies.get(state.csrf.cookie_name()).map(String::as_str);
    let record = state.csrf.rotate(previous);
    info!("Rotated CSRF token");
    token_response(&state.csrf, record)
}

fn token_response(guard: &CsrfGuard, record: CsrfTokenRecord) -> Response {
    let cookie = guard.cookie_header(&record.token);
    let token_header = HeaderName::from_bytes(guard.header_name().as_bytes());
    let token_value = HeaderValue::from_str(&record.token);

    let mut response = Json(CsrfTokenResponse {
        token: record.token,
        header_name: guard.header_name().to_string(),
        expires_in_secs: guard.ttl().as_secs(),
    })
    .into_response();

    let headers = response.headers_mut();
    if let Ok(cookie) = HeaderValue::from_str(&cookie) {
        headers.insert(header::SET_COOKIE, cookie);
    }
    if let (Ok(name), Ok(value)) = (token_header, token_value) {
        headers.insert(name, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Decide on a described request without serving it.
///
/// Callers without the shared secret get 401 and touch no client's quota.
/// Authenticated calls always answer 200 so a proxy can read the body.
pub async fn check(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<DescriptorBody>,
) -> std::result::Result<Json<CheckResponse>, GateError> {
    authorize_check(&state.config, &headers)?;

    let descriptor = match body.into_descriptor() {
        Ok(descriptor) => descriptor,
        Err(reason) => {
            debug!(reason = %reason, "Rejected malformed descriptor");
            return Ok(Json(CheckResponse {
                allowed: false,
                status: Some(StatusCode::BAD_REQUEST.as_u16()),
                reason: Some("INVALID_DESCRIPTOR".to_string()),
                retry_after_secs: None,
                remaining: None,
                headers: BTreeMap::new(),
            }));
        }
    };

    let decision = state.gate.admit(&descriptor);
    let remaining = decision
        .headers
        .get(&X_RATELIMIT_REMAINING)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let headers = decision
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    Ok(Json(CheckResponse {
        allowed: decision.allow,
        status: decision.status.map(|s| s.as_u16()),
        reason: decision.reason_code.map(str::to_string),
        retry_after_secs: decision.retry_after_secs,
        remaining,
        headers,
    }))
}

fn authorize_check(config: &Config, headers: &HeaderMap) -> Result<()> {
    let expected = config
        .gate
        .check_secret
        .as_deref()
        .ok_or_else(|| GateError::Unauthorized("decision endpoint disabled".to_string()))?;
    let presented = headers
        .get(CHECK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if presented.is_empty() || !constant_time_eq(presented, expected) {
        warn!(target: "security", "Rejected decision request without a valid secret");
        return Err(GateError::Unauthorized("missing or invalid gate secret".to_string()));
    }
    Ok(())
}

/// Verify and persist a check-in.
///
/// 201 when persisted, 200 with the stored record when the check-in was
/// already recorded, 202 when the record was computed but the write is pending.
pub async fn submit_checkin(
    State(state): State<Arc<AppState>>,
    Json(claim): Json<CheckInClaim>,
) -> std::result::Result<(StatusCode, Json<VerificationRecord>), GateError> {
    let outcome = state.checkins.submit(&claim).await?;
    Ok(outcome_response(outcome))
}

/// Replace a recorded check-in with a moderator's manual verification.
///
/// 404 when the check-in has no record yet.
pub async fn manual_checkin(
    State(state): State<Arc<AppState>>,
    Path(check_in_id): Path<Uuid>,
    Json(body): Json<ManualVerificationRequest>,
) -> std::result::Result<Json<VerificationRecord>, GateError> {
    let record = state
        .checkins
        .record_manual(check_in_id, body.distance_from_venue_meters)
        .await?;
    Ok(Json(record))
}

fn outcome_response(outcome: SubmissionOutcome) -> (StatusCode, Json<VerificationRecord>) {
    match outcome {
        SubmissionOutcome::Persisted(record) => (StatusCode::CREATED, Json(record)),
        SubmissionOutcome::AlreadyRecorded(record) => (StatusCode::OK, Json(record)),
        SubmissionOutcome::Pending(record) => (StatusCode::ACCEPTED, Json(record)),
    }
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
