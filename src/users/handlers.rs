use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    routing::{delete, get, put},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{instrument, warn};

use super::dto::{
    AnalyticsResponse, AppliedFilters, DeleteUserRequest, DeleteUserResponse, DeletedUser,
    ListUsersQuery, ListUsersResponse, LoadType, ProfileView, RecentUsersResponse,
    UpdateProfileResponse, UserDetailsResponse,
};
use super::filter::DateFilter;
use super::repo_types::{Role, UserFilter};
use super::services::{self, ImageUpload, ListParams};
use crate::{
    auth::extractors::{AdminUser, AuthUser},
    error::{ApiError, FieldError},
    extract::ApiJson,
    images::MAX_UPLOAD_BYTES,
    state::AppState,
    validation::Validator,
};

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/adminportal/user-details", get(user_details))
        .route(
            "/adminportal/update-profile",
            put(update_profile).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 1024 * 1024)),
        )
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/adminportal/user-analytics", get(user_analytics))
        .route("/adminportal/recent-users", get(recent_users))
        .route("/adminportal/all-users", get(all_users))
        .route("/adminportal/delete-user", delete(delete_user))
}

#[instrument(skip(state))]
pub async fn user_details(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserDetailsResponse>, ApiError> {
    let (user, cached) = services::profile(&state, user_id).await?;
    Ok(Json(UserDetailsResponse {
        success: true,
        user,
        cached: cached.then_some(true),
    }))
}

#[instrument(skip(state, mp))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> Result<Json<UpdateProfileResponse>, ApiError> {
    let mut name = None;
    let mut image = None;
    while let Some(field) = mp.next_field().await.map_err(upload_error)? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("name") => {
                let text = field.text().await.map_err(upload_error)?;
                name = Some(text.trim().to_string());
            }
            Some("profileImage") => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let body = field.bytes().await.map_err(upload_error)?;
                if !body.is_empty() {
                    image = Some(ImageUpload { content_type, body });
                }
            }
            _ => {}
        }
    }

    if let Some(name) = &name {
        Validator::new().name(name).finish()?;
    }

    let (user, image_info) = services::update_profile(&state, user_id, name, image).await?;
    Ok(Json(UpdateProfileResponse {
        success: true,
        message: "Profile updated successfully",
        user: ProfileView::from(&user),
        image_info,
    }))
}

/// 413 only when the body limit was hit; a broken stream is the client's fault.
fn upload_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::PayloadTooLarge("File too large. Maximum size is 5MB".into());
    }
    warn!(error = %e, "multipart body rejected");
    ApiError::bad_request(e.body_text())
}

#[instrument(skip(state, admin), fields(admin_id = %admin.0.id))]
pub async fn user_analytics(
    State(state): State<AppState>,
    admin: AdminUser,
) -> Result<Json<AnalyticsResponse>, ApiError> {
    let analytics = services::analytics(&state, OffsetDateTime::now_utc()).await?;
    Ok(Json(AnalyticsResponse {
        success: true,
        analytics,
    }))
}

#[instrument(skip(state, admin), fields(admin_id = %admin.0.id))]
pub async fn recent_users(
    State(state): State<AppState>,
    admin: AdminUser,
) -> Result<Json<RecentUsersResponse>, ApiError> {
    let recent_users = services::recent_users(&state, OffsetDateTime::now_utc()).await?;
    Ok(Json(RecentUsersResponse {
        success: true,
        recent_users,
    }))
}

fn parse_bounded(raw: Option<&str>, default: i64, min: i64, max: i64) -> Option<i64> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Some(default),
        Some(s) => s.parse::<i64>().ok().filter(|n| (min..=max).contains(n)),
    }
}

#[instrument(skip(state, admin), fields(admin_id = %admin.0.id))]
pub async fn all_users(
    State(state): State<AppState>,
    admin: AdminUser,
    Query(q): Query<ListUsersQuery>,
) -> Result<Json<ListUsersResponse>, ApiError> {
    let page = parse_bounded(q.page.as_deref(), 1, 1, i64::from(u32::MAX));
    let limit = parse_bounded(q.limit.as_deref(), 10, 1, 100);
    let load_type = match q.load_type.as_deref().unwrap_or("basic") {
        "basic" => Some(LoadType::Basic),
        "detailed" => Some(LoadType::Detailed),
        _ => None,
    };
    let role_code = q.role.clone().unwrap_or_else(|| "all".into());
    let role = match role_code.as_str() {
        "all" => Some(None),
        "user" => Some(Some(Role::User)),
        "admin" => Some(Some(Role::Admin)),
        _ => None,
    };
    let date_code = q.date.clone().unwrap_or_else(|| "all".into());
    let date = DateFilter::parse(&date_code, q.from_date.as_deref(), q.to_date.as_deref());

    Validator::new()
        .check(page.is_some(), "page", "Page must be a positive integer")
        .check(limit.is_some(), "limit", "Limit must be between 1 and 100")
        .check(load_type.is_some(), "loadType", "Load type must be basic or detailed")
        .check(role.is_some(), "role", "Role must be all, user or admin")
        .check(date.is_some(), "date", "Invalid date filter")
        .finish()?;
    let (Some(page), Some(limit), Some(load_type), Some(role), Some(date)) =
        (page, limit, load_type, role, date)
    else {
        return Err(ApiError::bad_request("Invalid query"));
    };

    let now = OffsetDateTime::now_utc();
    let (created_from, created_to) = date.bounds(now);
    let search = q.search.unwrap_or_default().trim().to_string();
    let params = ListParams {
        page,
        limit,
        filter: UserFilter {
            search: (!search.is_empty()).then(|| search.clone()),
            role,
            created_from,
            created_to,
        },
        load_type,
    };

    let (users, pagination) = services::list_users(&state, &params, now).await?;
    Ok(Json(ListUsersResponse {
        success: true,
        users,
        pagination,
        filters: AppliedFilters {
            search,
            role: role_code,
            date: date_code,
        },
        load_type,
    }))
}

#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiJson(payload): ApiJson<DeleteUserRequest>,
) -> Result<Json<DeleteUserResponse>, ApiError> {
    let target_id = payload.parsed_id().ok_or_else(|| {
        ApiError::Validation(vec![FieldError::new("userId", "Valid user ID is required")])
    })?;

    let deleted = services::delete_user(&state, &admin, target_id).await?;
    Ok(Json(DeleteUserResponse {
        success: true,
        message: "User deleted successfully",
        deleted_user: DeletedUser::from(&deleted),
    }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::app::build_app;
    use crate::images::{services::tests::sample_png, MAX_UPLOAD_BYTES};
    use crate::testing::harness;
    use crate::users::repo_types::Role;

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn get(uri: &str, token: &str) -> Request<Body> {
        Request::get(uri)
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    fn delete_user(token: &str, body: Value) -> Request<Body> {
        Request::delete("/api/adminportal/delete-user")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart(token: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        let boundary = "XBOUNDARYX";
        let mut body = Vec::new();
        for (name, content_type, data) in parts {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match content_type {
                Some(ct) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"f\"\r\nContent-Type: {ct}\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        Request::put("/api/adminportal/update-profile")
            .header("authorization", format!("Bearer {token}"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn delete_user_authorization_order() {
        let h = harness();
        let app = build_app(h.state.clone());
        let admin = h.add_user("boss@x.com", Role::Admin).await;
        let other_admin = h.add_user("boss2@x.com", Role::Admin).await;
        let user = h.add_user("ann@x.com", Role::User).await;
        let admin_token = h.tokens_for(&admin).access_token;
        let user_token = h.tokens_for(&user).access_token;

        let (status, _) = send(&app, delete_user(&user_token, json!({ "userId": admin.id }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app, delete_user(&admin_token, json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["message"], "Valid user ID is required");

        let (status, body) = send(&app, delete_user(&admin_token, json!({ "userId": admin.id }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "You cannot delete your own account");

        let (status, _) =
            send(&app, delete_user(&admin_token, json!({ "userId": other_admin.id }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&app, delete_user(&admin_token, json!({ "userId": user.id }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deletedUser"]["email"], "ann@x.com");
    }

    #[tokio::test]
    async fn regular_user_cannot_list_users() {
        let h = harness();
        let app = build_app(h.state.clone());
        let user = h.add_user("ann@x.com", Role::User).await;
        let token = h.tokens_for(&user).access_token;

        let (status, body) = send(&app, get("/api/adminportal/all-users", &token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "Admin access required");
    }

    #[tokio::test]
    async fn user_details_reports_cache_hits() {
        let h = harness();
        let app = build_app(h.state.clone());
        let user = h.add_user("ann@x.com", Role::User).await;
        let token = h.tokens_for(&user).access_token;

        let (status, body) = send(&app, get("/api/adminportal/user-details", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "ann@x.com");
        assert_eq!(body["user"]["profileImage"], Value::Null);
        assert!(body.get("cached").is_none());

        let (_, body) = send(&app, get("/api/adminportal/user-details", &token)).await;
        assert_eq!(body["cached"], true);
    }

    #[tokio::test]
    async fn all_users_filters_and_shapes() {
        let h = harness();
        let app = build_app(h.state.clone());
        let admin = h.add_user("boss@x.com", Role::Admin).await;
        h.add_user("ann@x.com", Role::User).await;
        h.add_user("bob@x.com", Role::User).await;
        let token = h.tokens_for(&admin).access_token;

        let (status, body) = send(
            &app,
            get("/api/adminportal/all-users?role=user&search=ANN&loadType=detailed", &token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"].as_array().unwrap().len(), 1);
        assert_eq!(body["users"][0]["email"], "ann@x.com");
        assert_eq!(body["users"][0]["profileImage"], Value::Null);
        assert_eq!(body["pagination"]["totalUsers"], 1);
        assert_eq!(body["filters"]["role"], "user");
        assert_eq!(body["loadType"], "detailed");

        let (_, body) = send(&app, get("/api/adminportal/all-users", &token)).await;
        assert_eq!(body["pagination"]["totalUsers"], 3);
        assert!(body["users"][0].get("profileImage").is_none());
        assert_eq!(body["filters"]["date"], "all");

        let (status, body) = send(
            &app,
            get("/api/adminportal/all-users?limit=500&loadType=full", &token),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_profile_via_multipart() {
        let h = harness();
        let app = build_app(h.state.clone());
        let user = h.add_user("ann@x.com", Role::User).await;
        let token = h.tokens_for(&user).access_token;

        let (status, body) = send(&app, multipart(&token, &[])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No fields provided for update");

        let (status, _) = send(&app, multipart(&token, &[("name", None, &b"A"[..])])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            multipart(&token, &[("profileImage", Some("text/plain"), &b"hello"[..])]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let png = sample_png(300, 200);
        let (status, body) = send(
            &app,
            multipart(
                &token,
                &[("name", None, &b"Ann Lee"[..]), ("profileImage", Some("image/png"), &png[..])],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["name"], "Ann Lee");
        assert!(body["user"]["profileImage"]
            .as_str()
            .unwrap()
            .starts_with("https://cdn.test/ProfileImages/"));
        assert!(body["imageInfo"]["reduction"].as_str().unwrap().ends_with('%'));
    }

    #[tokio::test]
    async fn update_profile_body_failures() {
        let h = harness();
        let app = build_app(h.state.clone());
        let user = h.add_user("ann@x.com", Role::User).await;
        let token = h.tokens_for(&user).access_token;

        // stream ends inside the file part, no closing boundary
        let truncated = Request::put("/api/adminportal/update-profile")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "multipart/form-data; boundary=XBOUNDARYX")
            .body(Body::from(
                "--XBOUNDARYX\r\nContent-Disposition: form-data; name=\"profileImage\"; filename=\"f\"\r\nContent-Type: image/png\r\n\r\npartial",
            ))
            .unwrap();
        let (status, _) = send(&app, truncated).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let huge = vec![0u8; MAX_UPLOAD_BYTES + 2 * 1024 * 1024];
        let (status, body) = send(
            &app,
            multipart(&token, &[("profileImage", Some("image/png"), &huge[..])]),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["message"], "File too large. Maximum size is 5MB");
        assert!(h.storage.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn analytics_and_recent_users_need_admin() {
        let h = harness();
        let app = build_app(h.state.clone());
        let admin = h.add_user("boss@x.com", Role::Admin).await;
        h.add_user("ann@x.com", Role::User).await;
        let token = h.tokens_for(&admin).access_token;

        let (status, body) = send(&app, get("/api/adminportal/user-analytics", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["analytics"]["totalUsers"], 2);
        assert_eq!(body["analytics"]["totalAdmins"], 1);
        assert_eq!(body["analytics"]["newUsersLast24h"], 2);

        let (status, body) = send(&app, get("/api/adminportal/recent-users", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["recentUsers"][0]["joinedAt"], "Just now");
    }
}
