//! Identity-provider seam. Token issuance and verification live upstream;
//! by the time a request reaches this service the gateway has already
//! authenticated it and stamped the verified identity onto the request as
//! `x-user-id` / `x-user-role` headers. This module only reads that pair.

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::appresult::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
    Moderator,
}

/// The verified `(userId, role)` pair for the current request. Extraction
/// fails when the upstream auth layer supplied no identity.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser {
    pub id: Uuid,
    pub role: Role,
}

const USER_ID_HEADER: &str = "x-user-id";
const ROLE_HEADER: &str = "x-user-role";

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value).ok())
            .ok_or(AppError::Forbidden("authentication required"))?;

        let role = match parts
            .headers
            .get(ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            Some("admin") => Role::Admin,
            Some("moderator") => Role::Moderator,
            _ => Role::User,
        };

        Ok(CurrentUser { id, role })
    }
}
