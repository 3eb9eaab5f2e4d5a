//! Queue introspection routes.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use herald_common::error::AppError;
use herald_notifier::NotifierError;
use herald_queue::{JobCounts, JobRecord, Queue};

use crate::state::AppState;

const DEFAULT_FAILED_LIMIT: usize = 20;
const MAX_FAILED_LIMIT: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queues/{name}/counts", get(queue_counts))
        .route("/queues/{name}/failed", get(failed_jobs))
}

#[derive(Debug, Deserialize)]
pub struct FailedQuery {
    pub limit: Option<usize>,
}

fn find_queue<'a>(state: &'a AppState, name: &str) -> Result<&'a Queue, AppError> {
    state
        .ctx
        .queue(name)
        .ok_or_else(|| AppError::NotFound(format!("Queue {} not found", name)))
}

/// GET /queues/{name}/counts
async fn queue_counts(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<JobCounts>, AppError> {
    let counts = find_queue(&state, &name)?
        .counts()
        .await
        .map_err(NotifierError::from)?;
    Ok(Json(counts))
}

/// GET /queues/{name}/failed?limit=20, most recent first.
async fn failed_jobs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<FailedQuery>,
) -> Result<Json<Vec<JobRecord>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_FAILED_LIMIT)
        .min(MAX_FAILED_LIMIT);
    let jobs = find_queue(&state, &name)?
        .failed_jobs(limit)
        .await
        .map_err(NotifierError::from)?;
    Ok(Json(jobs))
}
