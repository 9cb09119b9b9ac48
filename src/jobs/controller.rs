use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::{error, info};

use super::{JobError, JobQueue};
use crate::auth::middleware::AuthUser;
use crate::controller::ErrorResponse;
use crate::preference::model::DigestFrequency;

fn job_error_to_response(err: JobError) -> (StatusCode, Json<ErrorResponse>) {
    error!("Admin job failed: {}", err);
    match err {
        JobError::Stopped => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new("Job worker is not running", "WORKER_STOPPED")),
        ),
        JobError::Failed(msg) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(&msg, "JOB_FAILED")),
        ),
    }
}

/// Run the digest for one frequency now (admin only)
///
/// Safe to repeat: a period that was already sent produces no second e-mail.
#[utoipa::path(
    post,
    path = "/api/admin/digests/{frequency}/run",
    tag = "admin",
    params(
        ("frequency" = String, Path, description = "daily, weekly or monthly")
    ),
    responses(
        (status = 200, description = "Digest run finished", body = [DigestRunReport]),
        (status = 400, description = "Unknown frequency", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden - admin access required", body = ErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn run_digest(
    Path(frequency): Path<String>,
    Extension(user): Extension<AuthUser>,
    State(queue): State<JobQueue>,
) -> impl IntoResponse {
    let frequency = match DigestFrequency::from_str(&frequency) {
        Ok(DigestFrequency::None) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Frequency none has no digest", "VALIDATION_ERROR")),
            )
                .into_response()
        }
        Ok(frequency) => frequency,
        Err(msg) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(&msg, "VALIDATION_ERROR")),
            )
                .into_response()
        }
    };

    info!("{} triggered the {} digest", user.user_id, frequency.as_str());
    match queue.run_digest(Some(frequency)).await {
        Ok(reports) => (StatusCode::OK, Json(reports)).into_response(),
        Err(e) => job_error_to_response(e).into_response(),
    }
}

/// Decay, evict and persist trending counters now (admin only)
#[utoipa::path(
    post,
    path = "/api/admin/trending/sweep",
    tag = "admin",
    responses(
        (status = 200, description = "Sweep finished", body = SweepReport),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden - admin access required", body = ErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn sweep_trending(
    Extension(user): Extension<AuthUser>,
    State(queue): State<JobQueue>,
) -> impl IntoResponse {
    info!("{} triggered a trending sweep", user.user_id);
    match queue.sweep_trending().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => job_error_to_response(e).into_response(),
    }
}

/// Apply notification retention now (admin only)
#[utoipa::path(
    post,
    path = "/api/admin/cleanup",
    tag = "admin",
    responses(
        (status = 200, description = "Cleanup finished", body = CleanupReport),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Forbidden - admin access required", body = ErrorResponse)
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn run_cleanup(
    Extension(user): Extension<AuthUser>,
    State(queue): State<JobQueue>,
) -> impl IntoResponse {
    info!("{} triggered retention cleanup", user.user_id);
    match queue.cleanup().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => job_error_to_response(e).into_response(),
    }
}
