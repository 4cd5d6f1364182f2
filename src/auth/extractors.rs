use axum::{
    async_trait,
    extract::{FromRef, FromRequest, FromRequestParts, Request},
    http::request::Parts,
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use super::claims::Claims;
use super::jwt::{JwtKeys, TokenError};
use crate::{error::ApiError, extract::ApiJson, state::AppState, users::repo_types::User};

/// Caller authenticated by a bearer access token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Access denied. No token provided."))?;

        let keys = JwtKeys::from_ref(state);
        match keys.verify_access(token) {
            Ok(claims) => Ok(AuthUser(claims.sub)),
            Err(TokenError::Expired) => Err(ApiError::TokenExpired),
            Err(e) => {
                warn!(error = %e, "rejected access token");
                Err(ApiError::forbidden("Invalid token."))
            }
        }
    }
}

/// Caller whose admin role was confirmed against the store.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user_id) = AuthUser::from_request_parts(parts, state).await?;
        match state.users.find_by_id(user_id).await? {
            Some(user) if user.is_admin() => Ok(AdminUser(user)),
            _ => {
                warn!(%user_id, "admin access denied");
                Err(ApiError::forbidden("Admin access required"))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    refresh_token: Option<String>,
}

/// Claims of a valid refresh token taken from the `{refreshToken}` body.
#[derive(Debug, Clone)]
pub struct RefreshUser(pub Claims);

#[async_trait]
impl<S> FromRequest<S> for RefreshUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let ApiJson(body) = ApiJson::<RefreshBody>::from_request(req, state).await?;
        let token = body
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Refresh token required."))?;

        let keys = JwtKeys::from_ref(state);
        match keys.verify_refresh(&token) {
            Ok(claims) => Ok(RefreshUser(claims)),
            Err(TokenError::WrongKind) => Err(ApiError::forbidden("Invalid refresh token type.")),
            Err(_) => Err(ApiError::forbidden("Invalid or expired refresh token.")),
        }
    }
}
