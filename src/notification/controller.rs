use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{debug, error};

use crate::auth::middleware::AuthUser;
use crate::controller::ErrorResponse;
use crate::notification::model::{NotificationError, NotificationQueryParams, UnreadCountResponse};
use crate::notification::service::NotificationService;
use crate::store::StoreError;

fn notification_error_to_response(err: NotificationError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, message, code) = match err {
        NotificationError::NotFound => (
            StatusCode::NOT_FOUND,
            "Notification not found",
            "NOT_FOUND",
        ),
        NotificationError::ValidationError(msg) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(&msg, "VALIDATION_ERROR")),
            )
        }
        NotificationError::Store(StoreError::Unavailable(e)) => {
            error!("Store unavailable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Notification store unavailable",
                "STORE_UNAVAILABLE",
            )
        }
        NotificationError::Store(e) => {
            error!("Store error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error", "DB_ERROR")
        }
        NotificationError::CacheError(e) => {
            error!("Cache error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Cache error", "CACHE_ERROR")
        }
    };
    (status, Json(ErrorResponse::new(message, code)))
}

/// List the caller's notifications, newest first
#[utoipa::path(
    get,
    path = "/api/notifications",
    tag = "notifications",
    params(NotificationQueryParams),
    responses(
        (status = 200, description = "Page of notifications", body = NotificationListResponse),
        (status = 400, description = "Invalid filter", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_notifications(
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<NotificationService>>,
    Query(params): Query<NotificationQueryParams>,
) -> impl IntoResponse {
    debug!("Listing notifications for {}", user.user_id);
    match service.list(user.user_id, &params).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

/// Number of unread notifications
#[utoipa::path(
    get,
    path = "/api/notifications/count",
    tag = "notifications",
    responses(
        (status = 200, description = "Unread count", body = UnreadCountResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn unread_count(
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<NotificationService>>,
) -> impl IntoResponse {
    match service.unread_count(user.user_id).await {
        Ok(unread_count) => (StatusCode::OK, Json(UnreadCountResponse { unread_count })).into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

/// Mark one notification read
///
/// Idempotent. Notifications owned by someone else are reported as not found.
#[utoipa::path(
    post,
    path = "/api/notifications/{id}/read",
    tag = "notifications",
    params(
        ("id" = i64, Path, description = "Notification id")
    ),
    responses(
        (status = 200, description = "Notification marked read", body = NotificationRecord),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Notification not found", body = ErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn mark_read(
    Path(notification_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<NotificationService>>,
) -> impl IntoResponse {
    match service.mark_read(user.user_id, notification_id).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}

/// Mark every notification read
#[utoipa::path(
    post,
    path = "/api/notifications/read-all",
    tag = "notifications",
    responses(
        (status = 200, description = "Notifications marked read", body = MarkAllReadResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn mark_all_read(
    Extension(user): Extension<AuthUser>,
    Extension(service): Extension<Arc<NotificationService>>,
) -> impl IntoResponse {
    match service.mark_all_read(user.user_id).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => notification_error_to_response(e).into_response(),
    }
}
