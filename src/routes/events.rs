use axum::{extract::Extension, middleware, routing::post, Router};
use std::sync::Arc;

use crate::auth::middleware::auth_middleware;
use crate::event::controller::submit_event;
use crate::event::service::EventService;

pub fn routes(event_service: Arc<EventService>) -> Router {
    Router::new()
        .route("/api/events", post(submit_event))
        .route_layer(middleware::from_fn(auth_middleware))
        .layer(Extension(event_service))
}
