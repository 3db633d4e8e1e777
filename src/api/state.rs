//! Session state and customer endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ApiState;
use crate::customer::{IdentityRecord, TurnRecord};
use crate::orchestrator::Snapshot;

/// Summary of a known customer
#[derive(Debug, Serialize)]
pub struct CustomerSummary {
    pub id: String,
    pub last_seen_at: DateTime<Utc>,
    pub turns: usize,
}

impl From<&IdentityRecord> for CustomerSummary {
    fn from(record: &IdentityRecord) -> Self {
        Self {
            id: record.id().to_string(),
            last_seen_at: record.last_seen_at(),
            turns: record.conversations().len(),
        }
    }
}

/// Customer list response
#[derive(Debug, Serialize)]
pub struct CustomerListResponse {
    pub customers: Vec<CustomerSummary>,
    pub volatile: bool,
}

/// One customer with its conversation log
#[derive(Debug, Serialize)]
pub struct CustomerDetail {
    #[serde(flatten)]
    pub summary: CustomerSummary,
    pub conversations: Vec<TurnRecord>,
}

/// Listen trigger acknowledgement
#[derive(Debug, Serialize)]
pub struct ListenResponse {
    pub accepted: bool,
}

/// Current orchestrator snapshot
async fn get_state(State(state): State<Arc<ApiState>>) -> Json<Snapshot> {
    Json(state.handle.snapshot())
}

/// Operator "listen now" trigger
async fn force_listening(
    State(state): State<Arc<ApiState>>,
) -> Result<(StatusCode, Json<ListenResponse>), StatusCode> {
    state.handle.force_listening().map_err(|e| {
        tracing::warn!(error = %e, "listen trigger rejected");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok((StatusCode::ACCEPTED, Json(ListenResponse { accepted: true })))
}

/// List known customers, most recent first
async fn list_customers(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<CustomerListResponse>, StatusCode> {
    let records = state.store.load_all().map_err(|e| {
        tracing::error!(error = %e, "failed to load customers");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut customers: Vec<CustomerSummary> = records.iter().map(CustomerSummary::from).collect();
    customers.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));

    Ok(Json(CustomerListResponse {
        customers,
        volatile: state.store.is_volatile(),
    }))
}

/// One customer's conversation log
async fn get_customer(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<CustomerDetail>, StatusCode> {
    let records = state.store.load_all().map_err(|e| {
        tracing::error!(error = %e, "failed to load customers");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let record = records
        .iter()
        .find(|r| r.id() == id)
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(CustomerDetail {
        summary: CustomerSummary::from(record),
        conversations: record.conversations().to_vec(),
    }))
}

/// Build the `/api` router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/state", get(get_state))
        .route("/listen", post(force_listening))
        .route("/customers", get(list_customers))
        .route("/customers/{id}", get(get_customer))
        .with_state(state)
}
