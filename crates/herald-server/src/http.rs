//! HTTP API over [`NotificationService`].

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use herald_core::{NewNotification, Notification, NotificationError, NotificationService};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn NotificationService>,
}

pub fn router(state: AppState, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/notifications", post(create_notification))
        .route("/notifications/stats", get(notification_stats))
        .route(
            "/notifications/{id}",
            get(get_notification).delete(delete_notification),
        )
        .route("/notifications/{id}/cancel", post(cancel_notification))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(body_limit_bytes)),
        )
        .with_state(state)
}

/// JSON error body: `{"error": "...", "message": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Notification(NotificationError),
}

impl From<NotificationError> for ApiError {
    fn from(e: NotificationError) -> Self {
        Self::Notification(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
            Self::Notification(e) => {
                let (status, code) = match &e {
                    NotificationError::Validation(_) => {
                        (StatusCode::BAD_REQUEST, "validation_error")
                    }
                    NotificationError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    NotificationError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
                    e if e.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
                };
                if status.is_server_error() {
                    tracing::error!(error = %e, "Request failed");
                }
                (status, code, e.to_string())
            }
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid notification id '{raw}'")))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_notification(
    State(state): State<AppState>,
    body: Result<Json<NewNotification>, JsonRejection>,
) -> Result<(StatusCode, Json<Notification>), ApiError> {
    let Json(request) = body?;
    let created = state.service.create(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Notification>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.get(id).await?))
}

async fn cancel_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Notification>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.cancel(id).await?))
}

async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn notification_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.stats().await?))
}
