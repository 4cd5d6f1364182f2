use axum::{extract::State, routing::post, Json, Router};
use time::OffsetDateTime;
use tracing::instrument;

use super::dto::{
    GoogleLoginRequest, LoginResponse, MessageResponse, RefreshResponse, ResetPasswordRequest,
    SendOtpRequest, SendResetLinkRequest, VerifyOtpRequest,
};
use super::extractors::RefreshUser;
use super::services;
use crate::{
    error::ApiError,
    extract::ApiJson,
    state::AppState,
    validation::{normalize_email, Validator},
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/send-otp", post(send_otp))
        .route("/auth/verify-otp", post(verify_otp))
        .route("/auth/refresh-token", post(refresh_token))
        .route("/auth/google-login", post(google_login))
        .route("/auth/send-reset-link", post(send_reset_link))
        .route("/auth/reset-password", post(reset_password))
}

#[instrument(skip(state, payload))]
pub async fn send_otp(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SendOtpRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = normalize_email(&payload.email);
    Validator::new()
        .email(&email)
        .password("password", &payload.password)
        .finish()?;

    services::send_otp(&state, &email, &payload.password).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "OTP sent successfully to your email",
        email: Some(email),
    }))
}

#[instrument(skip(state, payload))]
pub async fn verify_otp(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<VerifyOtpRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = normalize_email(&payload.email);
    let otp = payload.otp.trim();
    Validator::new().email(&email).otp(otp).finish()?;

    let resp = services::verify_otp(&state, &email, otp, OffsetDateTime::now_utc()).await?;
    Ok(Json(resp))
}

#[instrument(skip_all)]
pub async fn refresh_token(
    State(state): State<AppState>,
    RefreshUser(claims): RefreshUser,
) -> Result<Json<RefreshResponse>, ApiError> {
    let access_token = services::refresh_access(&state, &claims).await?;
    Ok(Json(RefreshResponse {
        success: true,
        access_token,
    }))
}

#[instrument(skip_all)]
pub async fn google_login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<GoogleLoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    Validator::new()
        .check(!payload.credential.is_empty(), "credential", "Credential is required")
        .finish()?;
    let resp = services::google_login(&state, &payload.credential).await?;
    Ok(Json(resp))
}

#[instrument(skip(state, payload))]
pub async fn send_reset_link(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SendResetLinkRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = normalize_email(&payload.email);
    Validator::new().email(&email).finish()?;

    services::send_reset_link(&state, &email).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Password reset link sent to your email",
        email: Some(email),
    }))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let token = payload.token.trim();
    Validator::new()
        .token(token)
        .password("newPassword", &payload.new_password)
        .finish()?;

    services::reset_password(&state, token, &payload.new_password).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Password reset successfully",
        email: None,
    }))
}
