use axum::extract::FromRef;
use time::OffsetDateTime;
use tracing::{info, warn};

use super::claims::{Claims, TokenPair};
use super::dto::{LoginResponse, PublicUser};
use super::jwt::{JwtKeys, TokenError};
use super::otp;
use super::password::{hash_password_blocking, verify_password_blocking};
use crate::{
    error::ApiError,
    state::AppState,
    users::repo_types::{NewUser, Role, User},
    validation::normalize_email,
};

/// "john.doe_smith" -> "John Doe Smith"; falls back to "User".
pub fn display_name_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let name = local
        .split(|c: char| matches!(c, '.' | '_' | '-'))
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() {
        "User".to_string()
    } else {
        name
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn login_response(user: &User, tokens: TokenPair, is_new_user: bool) -> LoginResponse {
    LoginResponse {
        success: true,
        message: if is_new_user {
            "Account created successfully"
        } else {
            "Login successful"
        },
        is_new_user,
        tokens,
        user: PublicUser::from(user),
    }
}

/// Authenticates (or registers) by password and emails a login code.
pub async fn send_otp(st: &AppState, email: &str, password: &str) -> Result<(), ApiError> {
    let is_new_user = match st.users.find_by_email(email).await? {
        Some(user) => {
            let ok = match &user.password_hash {
                Some(hash) => verify_password_blocking(password.to_string(), hash.clone()).await?,
                None => false,
            };
            if !ok {
                warn!(user_id = %user.id, "otp request with invalid password");
                return Err(ApiError::unauthorized("Invalid email or password"));
            }
            false
        }
        None => {
            let hash = hash_password_blocking(password.to_string()).await?;
            let user = st
                .users
                .create(NewUser::with_password(
                    display_name_from_email(email),
                    email.to_string(),
                    hash,
                ))
                .await?;
            info!(user_id = %user.id, "user registered via otp request");
            true
        }
    };

    let record = otp::issue(st.cache.as_ref(), email, is_new_user, OffsetDateTime::now_utc()).await?;

    let brand = &st.config.mail.from_name;
    let html = st.templates.otp_email(brand, &record.otp)?;
    st.mailer
        .send(email, &format!("Login Verification Code - {brand}"), &html)
        .await?;
    info!(is_new_user, "otp sent");
    Ok(())
}

pub async fn verify_otp(
    st: &AppState,
    email: &str,
    code: &str,
    now: OffsetDateTime,
) -> Result<LoginResponse, ApiError> {
    let record = otp::consume(st.cache.as_ref(), email, code, now)
        .await?
        .ok_or_else(|| ApiError::bad_request("Invalid or expired OTP"))?;

    let user = st
        .users
        .find_by_email(email)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let tokens = JwtKeys::from_ref(st).sign_pair(user.id, &user.email)?;
    info!(user_id = %user.id, is_new_user = record.is_new_user, "otp verified");
    Ok(login_response(&user, tokens, record.is_new_user))
}

/// Mints a new access token for the subject of a verified refresh token.
pub async fn refresh_access(st: &AppState, claims: &Claims) -> Result<String, ApiError> {
    let user = st
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(JwtKeys::from_ref(st).sign_access(user.id, &user.email)?)
}

pub async fn google_login(st: &AppState, credential: &str) -> Result<LoginResponse, ApiError> {
    let identity = st.google.verify(credential).await.map_err(|e| {
        warn!(error = %e, "google credential rejected");
        ApiError::unauthorized("Authentication failed")
    })?;
    let email = normalize_email(&identity.email);

    let (user, is_new_user) = match st.users.find_by_email(&email).await? {
        Some(user) => (user, false),
        None => {
            let name = identity
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| display_name_from_email(&email));
            let user = st
                .users
                .create(NewUser {
                    name,
                    email,
                    password_hash: None,
                    role: Role::User,
                    profile_image: None,
                    google_id: Some(identity.subject),
                    created_at: None,
                })
                .await?;
            info!(user_id = %user.id, "user registered via google");
            (user, true)
        }
    };

    let tokens = JwtKeys::from_ref(st).sign_pair(user.id, &user.email)?;
    Ok(login_response(&user, tokens, is_new_user))
}

pub async fn send_reset_link(st: &AppState, email: &str) -> Result<(), ApiError> {
    let user = st
        .users
        .find_by_email(email)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found with this email"))?;

    let token = JwtKeys::from_ref(st).sign_reset(user.id, &user.email)?;
    let reset_url = format!("{}?token={}", st.config.reset_url_base, token);

    let brand = &st.config.mail.from_name;
    let html = st.templates.reset_email(brand, &reset_url, &user.name)?;
    st.mailer
        .send(&user.email, &format!("Password Reset Request - {brand}"), &html)
        .await?;
    info!(user_id = %user.id, "password reset link sent");
    Ok(())
}

pub async fn reset_password(st: &AppState, token: &str, new_password: &str) -> Result<(), ApiError> {
    let claims = JwtKeys::from_ref(st).verify_reset(token).map_err(|e| match e {
        TokenError::WrongKind => ApiError::bad_request("Invalid token type"),
        _ => ApiError::bad_request("Invalid or expired token"),
    })?;

    let user = st
        .users
        .find_by_id(claims.sub)
        .await?
        .filter(|u| u.email == claims.email)
        .ok_or_else(|| ApiError::not_found("User not found or token invalid"))?;

    let hash = hash_password_blocking(new_password.to_string()).await?;
    if !st.users.update_password(user.id, &hash).await? {
        return Err(ApiError::bad_request("Failed to update password"));
    }
    info!(user_id = %user.id, "password reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::verify_password;
    use crate::cache::otp_key;
    use crate::testing::{harness, FakeGoogle};
    use time::Duration;

    #[test]
    fn display_names_from_local_part() {
        assert_eq!(display_name_from_email("new@x.com"), "New");
        assert_eq!(display_name_from_email("john.doe_SMITH-jr@x.com"), "John Doe Smith Jr");
        assert_eq!(display_name_from_email("...@x.com"), "User");
    }

    #[tokio::test]
    async fn send_otp_for_unknown_email_registers_one_user() {
        let st = AppState::fake();
        send_otp(&st, "new@x.com", "Abc123x").await.unwrap();

        let user = st.users.find_by_email("new@x.com").await.unwrap().unwrap();
        assert_eq!(user.name, "New");
        assert_eq!(user.role, Role::User);
        assert!(verify_password("Abc123x", user.password_hash.as_deref().unwrap()).unwrap());
        assert_eq!(st.users.count(&Default::default()).await.unwrap(), 1);

        // second request for the same account does not create another
        send_otp(&st, "new@x.com", "Abc123x").await.unwrap();
        assert_eq!(st.users.count(&Default::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn send_otp_rejects_wrong_password() {
        let st = AppState::fake();
        send_otp(&st, "a@x.com", "Abc123x").await.unwrap();
        let err = send_otp(&st, "a@x.com", "Wrong123").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn verify_otp_rejects_expired_code() {
        let st = AppState::fake();
        send_otp(&st, "a@x.com", "Abc123x").await.unwrap();
        let record: otp::OtpRecord = crate::cache::get_json(st.cache.as_ref(), &otp_key("a@x.com"))
            .await
            .unwrap()
            .unwrap();

        let late = record.issued_at + Duration::minutes(6);
        let err = verify_otp(&st, "a@x.com", &record.otp, late).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(ref m) if m == "Invalid or expired OTP"));
    }

    #[tokio::test]
    async fn google_login_creates_then_reuses_account() {
        let st = AppState::fake();
        let first = google_login(&st, FakeGoogle::VALID).await.unwrap();
        assert!(first.is_new_user);
        assert_eq!(first.user.email, "g.user@gmail.com");

        let second = google_login(&st, FakeGoogle::VALID).await.unwrap();
        assert!(!second.is_new_user);
        assert_eq!(first.user.id, second.user.id);

        let stored = st.users.find_by_email("g.user@gmail.com").await.unwrap().unwrap();
        assert!(stored.password_hash.is_none());
        assert_eq!(stored.google_id.as_deref(), Some("google-sub-1"));
    }

    #[tokio::test]
    async fn google_login_rejects_bad_credential() {
        let st = AppState::fake();
        let err = google_login(&st, "forged").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(ref m) if m == "Authentication failed"));
    }

    #[tokio::test]
    async fn google_account_cannot_request_password_otp() {
        let st = AppState::fake();
        google_login(&st, FakeGoogle::VALID).await.unwrap();
        let err = send_otp(&st, "g.user@gmail.com", "Abc123x").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn reset_flow_replaces_password() {
        let h = harness();
        let st = &h.state;
        send_otp(st, "a@x.com", "Abc123x").await.unwrap();
        send_reset_link(st, "a@x.com").await.unwrap();

        let sent = h.mailer.last().unwrap();
        assert_eq!(sent.to, "a@x.com");
        let token = sent
            .html
            .split("token&#x3D;")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap()
            .to_string();

        reset_password(st, &token, "NewPass9").await.unwrap();
        let user = st.users.find_by_email("a@x.com").await.unwrap().unwrap();
        assert!(verify_password("NewPass9", user.password_hash.as_deref().unwrap()).unwrap());
    }

    #[tokio::test]
    async fn reset_rejects_access_token_and_unknown_email() {
        let st = AppState::fake();
        send_otp(&st, "a@x.com", "Abc123x").await.unwrap();
        let user = st.users.find_by_email("a@x.com").await.unwrap().unwrap();
        let access = JwtKeys::from_ref(&st).sign_access(user.id, &user.email).unwrap();

        let err = reset_password(&st, &access, "NewPass9").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(ref m) if m == "Invalid token type"));

        let err = send_reset_link(&st, "ghost@x.com").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
