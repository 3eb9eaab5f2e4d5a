//! Enqueue routes for notifications and emails.
//!
//! Both return `202 Accepted` with the job handle as soon as the job is stored.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};

use herald_common::error::AppError;
use herald_common::types::{EmailMessage, NotificationPayload};
use herald_queue::JobHandle;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(enqueue_notification))
        .route("/emails", post(enqueue_email))
}

/// POST /notifications
async fn enqueue_notification(
    State(state): State<AppState>,
    Json(payload): Json<NotificationPayload>,
) -> Result<(StatusCode, Json<JobHandle>), AppError> {
    if payload.title.trim().is_empty() {
        return Err(AppError::Validation("title must not be empty".to_string()));
    }
    let handle = state.ctx.notifications().enqueue_notification(&payload).await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

/// POST /emails
async fn enqueue_email(
    State(state): State<AppState>,
    Json(email): Json<EmailMessage>,
) -> Result<(StatusCode, Json<JobHandle>), AppError> {
    if !email.to.contains('@') {
        return Err(AppError::Validation(format!("invalid recipient: {}", email.to)));
    }
    let handle = state.ctx.emails().enqueue_email_job(&email).await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}
