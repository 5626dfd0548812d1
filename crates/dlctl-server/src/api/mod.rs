//! Event API
//!
//! Upstream delivery mechanisms (storage notifications, the change feed, the
//! cluster's step events, schedules) hand their events to the handlers here.
//! Handler outcomes are always `200 OK`; only requests that never reach a
//! handler produce an error status.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::AppResult;
use crate::ingest::StorageEvent;
use crate::lifecycle::{ChangeBatch, StepEvent, SubmitRequest};
use crate::middleware;
use crate::outcome::Outcome;
use crate::runtime::Pipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// Outcomes of a batch, in input order.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<Outcome>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events/storage", post(storage_events))
        .route("/events/staged", post(staged_events))
        .route("/events/control", post(control_events))
        .route("/events/step", post(step_event))
        .route("/submit", post(submit))
        .layer(middleware::tracing_layer())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> AppResult<Json<Value>> {
    state.pipeline.clients.store.ping().await?;
    Ok(Json(json!({
        "status": "healthy",
        "store": "connected"
    })))
}

async fn storage_events(
    State(state): State<AppState>,
    payload: Result<Json<StorageEvent>, JsonRejection>,
) -> AppResult<Json<BatchResponse>> {
    let Json(event) = payload?;
    let results = state.pipeline.router.route_batch(event.records).await;
    Ok(Json(BatchResponse { results }))
}

async fn staged_events(
    State(state): State<AppState>,
    payload: Result<Json<StorageEvent>, JsonRejection>,
) -> AppResult<Json<BatchResponse>> {
    let Json(event) = payload?;
    let results = state.pipeline.marker.handle_batch(event.records).await;
    Ok(Json(BatchResponse { results }))
}

async fn control_events(
    State(state): State<AppState>,
    payload: Result<Json<ChangeBatch>, JsonRejection>,
) -> AppResult<Json<BatchResponse>> {
    let Json(batch) = payload?;
    let results = state
        .pipeline
        .promoter
        .handle_batch(batch.records, state.pipeline.concurrency)
        .await;
    Ok(Json(BatchResponse { results }))
}

async fn step_event(
    State(state): State<AppState>,
    payload: Result<Json<StepEvent>, JsonRejection>,
) -> AppResult<Json<Outcome>> {
    let Json(event) = payload?;
    Ok(Json(state.pipeline.validator.handle(&event).await))
}

async fn submit(
    State(state): State<AppState>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> AppResult<Json<Outcome>> {
    let Json(request) = payload?;
    Ok(Json(state.pipeline.submitter.run(&request).await))
}
