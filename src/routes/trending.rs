use axum::{extract::Extension, routing::get, Router};
use std::sync::Arc;

use crate::trending::controller::get_trending;
use crate::trending::service::TrendingService;

/// Public, no authentication.
pub fn routes(trending_service: Arc<TrendingService>) -> Router {
    Router::new()
        .route("/api/trending", get(get_trending))
        .layer(Extension(trending_service))
}
