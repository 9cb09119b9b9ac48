use axum::{
    async_trait,
    extract::FromRequestParts,
    headers::{authorization::Bearer, Authorization},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
    RequestPartsExt, TypedHeader,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::jwt::{authenticate, Role};
use crate::controller::ErrorResponse;

/// Authenticated user information
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new(message, "UNAUTHORIZED")),
    )
        .into_response()
}

/// Rejects requests without a valid bearer token; inserts [`AuthUser`] otherwise.
pub async fn auth_middleware<B>(req: Request<B>, next: Next<B>) -> Result<Response, Response> {
    let (mut parts, body) = req.into_parts();

    let TypedHeader(Authorization(bearer)) = parts
        .extract::<TypedHeader<Authorization<Bearer>>>()
        .await
        .map_err(|e| {
            warn!("Authorization header extraction failed: {:?}", e);
            unauthorized("Missing or invalid Authorization header. Please provide a Bearer token")
        })?;

    let (user_id, role) = authenticate(bearer.token()).map_err(|e| {
        warn!("Token validation failed: {}", e);
        unauthorized("Invalid token")
    })?;

    debug!("User authenticated: {} with role {:?}", user_id, role);
    parts.extensions.insert(AuthUser { user_id, role });

    let req = Request::from_parts(parts, body);
    Ok(next.run(req).await)
}

/// Role-based authorization. Must run after [`auth_middleware`]. Admins pass every check.
pub async fn require_role<B>(
    role: Role,
    req: Request<B>,
    next: Next<B>,
) -> Result<Response, Response> {
    let Some(auth_user) = req.extensions().get::<AuthUser>().cloned() else {
        warn!("AuthUser not found in request extensions");
        return Err(unauthorized("Authentication required"));
    };

    if auth_user.role != Role::Admin && auth_user.role != role {
        warn!(
            "Insufficient permissions for user: {} with role {:?}, required role: {:?}",
            auth_user.user_id, auth_user.role, role
        );
        return Err((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new(
                &format!("Insufficient permissions. Required role: {}", role.as_str()),
                "FORBIDDEN",
            )),
        )
            .into_response());
    }

    Ok(next.run(req).await)
}

/// [`require_role`] fixed to [`Role::Admin`], usable with `middleware::from_fn`.
pub async fn require_admin<B>(req: Request<B>, next: Next<B>) -> Result<Response, Response> {
    require_role(Role::Admin, req, next).await
}

/// Extractor for authenticated user
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| unauthorized("Authentication required"))
    }
}
