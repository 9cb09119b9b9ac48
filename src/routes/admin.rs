use axum::{middleware::from_fn, routing::post, Router};

use crate::auth::middleware::{auth_middleware, require_admin};
use crate::jobs::controller::{run_cleanup, run_digest, sweep_trending};
use crate::jobs::JobQueue;

pub fn routes(jobs: JobQueue) -> Router {
    Router::new()
        .route("/api/admin/digests/:frequency/run", post(run_digest))
        .route("/api/admin/trending/sweep", post(sweep_trending))
        .route("/api/admin/cleanup", post(run_cleanup))
        // layers run bottom-up: authenticate, then check the role
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn(auth_middleware))
        .with_state(jobs)
}
