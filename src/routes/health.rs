use axum::{
    extract::State, http::StatusCode, middleware::from_fn, response::IntoResponse, routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;

use crate::auth::middleware::{auth_middleware, AuthUser};
use crate::store::NotificationStore;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    message: String,
}

/// Public health check endpoint
///
/// Returns status "ok" while the notification store answers, "degraded" otherwise.
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Server is healthy", body = HealthResponse),
        (status = 503, description = "Notification store unreachable", body = HealthResponse),
    ),
    tag = "health"
)]
pub async fn health_check(State(store): State<Arc<dyn NotificationStore>>) -> impl IntoResponse {
    match store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                message: "Server is running".to_string(),
            }),
        ),
        Err(e) => {
            warn!("Health check: store ping failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded".to_string(),
                    message: "Notification store unreachable".to_string(),
                }),
            )
        }
    }
}

/// Protected health check endpoint
///
/// Returns status "ok" along with user information if authenticated
#[utoipa::path(
    get,
    path = "/api/health/protected",
    responses(
        (status = 200, description = "Server is healthy and user is authenticated", body = HealthResponse),
        (status = 401, description = "Unauthorized - Invalid or missing token")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "health"
)]
pub async fn protected_health_check(
    user: AuthUser,
    State(store): State<Arc<dyn NotificationStore>>,
) -> impl IntoResponse {
    let store_status = match store.ping().await {
        Ok(_) => "ok",
        Err(_) => "error",
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            message: format!(
                "Server is running. Authenticated as user: {} with role: {}. Store status: {}",
                user.user_id,
                user.role.as_str(),
                store_status
            ),
        }),
    )
}

pub fn routes(store: Arc<dyn NotificationStore>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route(
            "/api/health/protected",
            get(protected_health_check).route_layer(from_fn(auth_middleware)),
        )
        .with_state(store)
}
