use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::error;

use crate::controller::ErrorResponse;
use crate::trending::model::{TrendingError, TrendingQueryParams};
use crate::trending::service::TrendingService;

fn trending_error_to_response(err: TrendingError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        TrendingError::ValidationError(msg) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(&msg, "VALIDATION_ERROR")),
        ),
        TrendingError::Store(e) => {
            error!("Store error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Database error", "DB_ERROR")),
            )
        }
    }
}

/// Trending hashtags
///
/// Public. Ordered by decayed count, ties broken by most recent occurrence.
#[utoipa::path(
    get,
    path = "/api/trending",
    tag = "trending",
    params(TrendingQueryParams),
    responses(
        (status = 200, description = "Top hashtags", body = TrendingResponse),
        (status = 400, description = "Invalid limit", body = ErrorResponse)
    )
)]
pub async fn get_trending(
    Extension(service): Extension<Arc<TrendingService>>,
    Query(params): Query<TrendingQueryParams>,
) -> impl IntoResponse {
    match service.top(params.limit, params.scope.as_deref(), Utc::now()) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => trending_error_to_response(e).into_response(),
    }
}
