//! HTTP surface of the hot-poll notifier.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::notify::{process_sns_event, FanOut, NotificationStore};

#[derive(Clone)]
pub struct NotifierState {
    pub store: Arc<dyn NotificationStore>,
}

impl NotifierState {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }
}

pub fn router(state: NotifierState) -> Router {
    Router::new()
        .route("/sns", post(receive_sns))
        .route("/users", post(register_user))
        .route("/users/{user_id}/notifications", get(list_notifications))
        .route("/health", get(health))
        .with_state(state)
}

/// POST /sns
///
/// Body is the raw SNS event. Malformed events answer 500 so the sender retries.
pub async fn receive_sns(State(state): State<NotifierState>, body: Bytes) -> Response {
    match process_sns_event(state.store.as_ref(), &body).await {
        Ok(FanOut::Ignored { .. }) => (
            StatusCode::OK,
            Json(json!({ "message": "Ignored non-HOT_VOTE message" })),
        )
            .into_response(),
        Ok(FanOut::Delivered {
            vote_id,
            notified,
            failures,
        }) => (
            StatusCode::OK,
            Json(json!({
                "message": "Notifications created successfully",
                "voteId": vote_id,
                "usersNotified": notified,
                "failures": failures,
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Error processing SNS event: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "message": "Error processing notification",
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUser {
    pub user_id: String,
}

/// POST /users
pub async fn register_user(
    State(state): State<NotifierState>,
    Json(request): Json<RegisterUser>,
) -> Response {
    let user_id = request.user_id.trim();
    match state.store.register_user(user_id).await {
        Ok(created) => {
            let status = if created {
                tracing::info!("Registered user {}", user_id);
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(json!({ "userId": user_id }))).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

/// GET /users/{user_id}/notifications
pub async fn list_notifications(
    State(state): State<NotifierState>,
    Path(user_id): Path<String>,
) -> Response {
    match state.store.notifications_for(&user_id).await {
        Ok(notifications) => Json(notifications).into_response(),
        Err(e) => {
            tracing::error!("Failed to list notifications for {}: {}", user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

pub async fn health() -> &'static str {
    "ok"
}
