use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::{error, info};

use crate::auth::middleware::AuthUser;
use crate::controller::ErrorResponse;
use crate::event::model::{EventError, SubmitEventRequest};
use crate::event::service::EventService;
use crate::store::StoreError;

fn event_error_to_response(err: EventError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, message, code) = match err {
        EventError::ValidationError(msg) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(&msg, "VALIDATION_ERROR")),
            )
        }
        EventError::Conflict(msg) => {
            return (
                StatusCode::CONFLICT,
                Json(ErrorResponse::new(&msg, "EVENT_CONFLICT")),
            )
        }
        EventError::Store(StoreError::Unavailable(e)) => {
            error!("Store unavailable during ingestion: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Notification store unavailable, retry later",
                "STORE_UNAVAILABLE",
            )
        }
        EventError::Store(e) => {
            error!("Store error during ingestion: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error", "DB_ERROR")
        }
        EventError::GraphUnavailable(e) => {
            error!("Social graph unavailable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Social graph unavailable, retry later",
                "GRAPH_UNAVAILABLE",
            )
        }
    };
    (status, Json(ErrorResponse::new(message, code)))
}

/// Submit a social event
///
/// The authenticated user is the actor. Responds once every notification is stored;
/// delivery continues in the background. Re-submitting the same event is safe.
#[utoipa::path(
    post,
    path = "/api/events",
    tag = "events",
    request_body = SubmitEventRequest,
    responses(
        (status = 202, description = "Event accepted", body = SubmitEventResponse),
        (status = 200, description = "Event id already known", body = SubmitEventResponse),
        (status = 400, description = "Invalid event", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 409, description = "Event id already used by a different event", body = ErrorResponse),
        (status = 503, description = "Store or social graph unavailable", body = ErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn submit_event(
    Extension(user): Extension<AuthUser>,
    Extension(event_service): Extension<Arc<EventService>>,
    Json(request): Json<SubmitEventRequest>,
) -> impl IntoResponse {
    info!(
        "Event {} submitted by {}",
        request.event_type.as_str(),
        user.user_id
    );

    match event_service.submit(user.user_id, request).await {
        Ok(response) if response.accepted => (StatusCode::ACCEPTED, Json(response)).into_response(),
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => event_error_to_response(e).into_response(),
    }
}
