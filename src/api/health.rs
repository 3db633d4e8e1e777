//! Health check endpoints

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use super::ApiState;
use crate::orchestrator::Advisory;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Detailed readiness response
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

/// Individual readiness checks
#[derive(Serialize)]
pub struct ReadinessChecks {
    pub storage: CheckResult,
    pub camera: CheckResult,
    pub face: CheckResult,
    pub speech: CheckResult,
}

/// Result of a single health check
#[derive(Serialize)]
pub struct CheckResult {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    const fn ok() -> Self {
        Self {
            status: "ok",
            message: None,
        }
    }

    fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: "degraded",
            message: Some(message.into()),
        }
    }
}

/// Liveness probe - is the service running?
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness probe
///
/// Degraded sensors keep the kiosk usable, so only a dead orchestrator
/// yields 503.
async fn ready(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let snapshot = state.handle.snapshot();
    let has = |advisory: Advisory| snapshot.advisories.contains(&advisory);

    let storage = if state.store.is_volatile() || has(Advisory::StorageVolatile) {
        CheckResult::degraded("customer records are held in memory only")
    } else {
        CheckResult::ok()
    };
    let camera = if has(Advisory::CameraUnavailable) {
        CheckResult::degraded("camera unavailable")
    } else {
        CheckResult::ok()
    };
    let face = if has(Advisory::FaceRecognitionUnavailable) {
        CheckResult::degraded("face recognition disabled")
    } else {
        CheckResult::ok()
    };
    let speech = if has(Advisory::MicrophoneUnavailable) || has(Advisory::SpeechUnavailable) {
        CheckResult::degraded("speech input unavailable")
    } else {
        CheckResult::ok()
    };

    let alive = state.handle.is_running();
    let all_ok = [&storage, &camera, &face, &speech]
        .iter()
        .all(|check| check.status == "ok");

    let (status, http_status) = match (alive, all_ok) {
        (false, _) => ("down", StatusCode::SERVICE_UNAVAILABLE),
        (true, true) => ("ok", StatusCode::OK),
        (true, false) => ("degraded", StatusCode::OK),
    };

    (
        http_status,
        Json(ReadinessResponse {
            status,
            checks: ReadinessChecks {
                storage,
                camera,
                face,
                speech,
            },
        }),
    )
}

/// Build health router (liveness only, no state needed)
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Build readiness router (needs state for checks)
pub fn ready_router(state: Arc<ApiState>) -> Router {
    Router::new().route("/ready", get(ready)).with_state(state)
}
