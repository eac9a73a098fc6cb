//! Actor identity for lease-scoped endpoints.
//!
//! The upstream auth gateway authenticates the caller and forwards its user
//! id in `X-User-ID`. Only requests routed through that gateway reach this
//! service.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "X-User-ID";

/// The authenticated user making the request.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing X-User-ID header")))?;

        let user_id = Uuid::parse_str(raw.trim())
            .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Malformed X-User-ID header")))?;

        tracing::Span::current().record("user_id", tracing::field::display(user_id));

        Ok(Actor { user_id })
    }
}
