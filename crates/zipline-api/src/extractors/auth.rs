//! Token extractors. The `Authorization` header carries the user's API token,
//! optionally prefixed with `Bearer `.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use zipline_core::error::AppError;
use zipline_entity::user::User;

use crate::error::ApiError;
use crate::state::AppState;

/// The authenticated caller. Rejects requests without a valid token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl std::ops::Deref for AuthUser {
    type Target = User;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The caller if a token was sent. Anonymous requests get `None`; an unknown
/// token is still rejected.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

impl MaybeUser {
    /// The user, if any.
    pub fn user(&self) -> Option<&User> {
        self.0.as_ref()
    }
}

async fn resolve(parts: &Parts, state: &AppState) -> Result<Option<User>, ApiError> {
    let Some(value) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| AppError::authentication("Invalid Authorization header"))?;
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    if token.is_empty() {
        return Ok(None);
    }

    let user = state
        .repos
        .users
        .find_by_token(token)
        .await?
        .ok_or_else(|| AppError::authentication("Invalid authorization token"))?;
    Ok(Some(user))
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(resolve(parts, state).await?))
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = resolve(parts, state)
            .await?
            .ok_or_else(|| AppError::authentication("Missing Authorization header"))?;
        Ok(AuthUser(user))
    }
}
