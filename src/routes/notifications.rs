use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::auth::middleware::auth_middleware;
use crate::notification::controller as notifications;
use crate::notification::service::NotificationService;
use crate::preference::controller as preferences;
use crate::preference::service::PreferenceService;
use crate::websocket::notifications::{ws_handler, SocketState};

/// REST routes for the inbox and preferences, plus the WebSocket endpoint.
/// The socket authenticates with `?token=` so it sits outside the bearer middleware.
pub fn routes(
    notification_service: Arc<NotificationService>,
    preference_service: Arc<PreferenceService>,
    socket_state: Arc<SocketState>,
) -> Router {
    let private_routes = Router::new()
        .route("/api/notifications", get(notifications::list_notifications))
        .route("/api/notifications/count", get(notifications::unread_count))
        .route("/api/notifications/read-all", post(notifications::mark_all_read))
        .route("/api/notifications/:id/read", post(notifications::mark_read))
        .route(
            "/api/notifications/preferences",
            get(preferences::get_preferences).put(preferences::update_preferences),
        )
        .route(
            "/api/notifications/push/subscribe",
            post(preferences::subscribe_push),
        )
        .route(
            "/api/notifications/push/unsubscribe",
            post(preferences::unsubscribe_push),
        )
        .route_layer(middleware::from_fn(auth_middleware))
        .layer(Extension(notification_service))
        .layer(Extension(preference_service));

    let socket_routes = Router::new()
        .route("/api/notifications/ws", get(ws_handler))
        .with_state(socket_state);

    private_routes.merge(socket_routes)
}
