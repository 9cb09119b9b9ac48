use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::{error, info};

use crate::auth::middleware::AuthUser;
use crate::controller::ErrorResponse;
use crate::delivery::model::{SubscribePushRequest, UnsubscribePushRequest};
use crate::preference::model::{PreferenceError, UpdatePreferencesRequest};
use crate::preference::service::PreferenceService;

fn preference_error_to_response(err: PreferenceError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        PreferenceError::ValidationError(msg) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(&msg, "VALIDATION_ERROR")),
        ),
        PreferenceError::SubscriptionNotFound => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Push subscription not found", "NOT_FOUND")),
        ),
        PreferenceError::Store(e) => {
            error!("Store error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Database error", "DB_ERROR")),
            )
        }
    }
}

/// Notification preferences for every event type
///
/// Types the user never configured are returned with their defaults.
#[utoipa::path(
    get,
    path = "/api/notifications/preferences",
    tag = "preferences",
    responses(
        (status = 200, description = "Preferences", body = PreferencesResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_preferences(
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<PreferenceService>>,
) -> impl IntoResponse {
    match service.get(user.user_id).await {
        Ok(preferences) => (StatusCode::OK, Json(preferences)).into_response(),
        Err(e) => preference_error_to_response(e).into_response(),
    }
}

/// Update notification preferences
///
/// An empty channel list disables the event type entirely.
#[utoipa::path(
    put,
    path = "/api/notifications/preferences",
    tag = "preferences",
    request_body = UpdatePreferencesRequest,
    responses(
        (status = 200, description = "Updated preferences", body = PreferencesResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_preferences(
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<PreferenceService>>,
    Json(request): Json<UpdatePreferencesRequest>,
) -> impl IntoResponse {
    match service.update(user.user_id, request).await {
        Ok(preferences) => (StatusCode::OK, Json(preferences)).into_response(),
        Err(e) => preference_error_to_response(e).into_response(),
    }
}

/// Register a browser push subscription
#[utoipa::path(
    post,
    path = "/api/notifications/push/subscribe",
    tag = "preferences",
    request_body = SubscribePushRequest,
    responses(
        (status = 200, description = "Subscription stored", body = PushSubscriptionResponse),
        (status = 400, description = "Invalid subscription", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn subscribe_push(
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<PreferenceService>>,
    Json(request): Json<SubscribePushRequest>,
) -> impl IntoResponse {
    info!("Push subscription request from {}", user.user_id);
    match service.subscribe_push(user.user_id, request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => preference_error_to_response(e).into_response(),
    }
}

/// Remove a browser push subscription
#[utoipa::path(
    post,
    path = "/api/notifications/push/unsubscribe",
    tag = "preferences",
    request_body = UnsubscribePushRequest,
    responses(
        (status = 200, description = "Subscription removed", body = PushSubscriptionResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "No such subscription", body = ErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn unsubscribe_push(
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<PreferenceService>>,
    Json(request): Json<UnsubscribePushRequest>,
) -> impl IntoResponse {
    match service.unsubscribe_push(user.user_id, request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => preference_error_to_response(e).into_response(),
    }
}
