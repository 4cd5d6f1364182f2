use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{Role, User, UserStats};
use crate::images::CompressionInfo;

/// Profile snapshot cached under `user_profile:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CachedProfile {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub profile_image: Option<String>,
}

impl From<&User> for CachedProfile {
    fn from(u: &User) -> Self {
        Self {
            name: u.name.clone(),
            email: u.email.clone(),
            role: u.role,
            profile_image: u.profile_image.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserDetailsResponse {
    pub success: bool,
    pub user: CachedProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
}

/// Raw all-users query; parsed and validated in the handler.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub search: Option<String>,
    pub role: Option<String>,
    pub date: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub load_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    Basic,
    Detailed,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListItem {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub joined_at: String,
    /// Present (possibly null) only for detailed loads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<Option<String>>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_users: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = (total + limit - 1) / limit;
        Self {
            current_page: page,
            total_pages,
            total_users: total,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AppliedFilters {
    pub search: String,
    pub role: String,
    pub date: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersResponse {
    pub success: bool,
    pub users: Vec<UserListItem>,
    pub pagination: Pagination,
    pub filters: AppliedFilters,
    pub load_type: LoadType,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentUser {
    pub name: String,
    pub email: String,
    pub profile_image: Option<String>,
    pub joined_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentUsersResponse {
    pub success: bool,
    pub recent_users: Vec<RecentUser>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub total_users: i64,
    pub new_users_last24h: i64,
    pub total_admins: i64,
    pub total_regular_users: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Analytics {
    pub fn new(stats: UserStats, timestamp: OffsetDateTime) -> Self {
        Self {
            total_users: stats.total,
            new_users_last24h: stats.new_since,
            total_admins: stats.admins,
            total_regular_users: stats.regular,
            timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AnalyticsResponse {
    pub success: bool,
    pub analytics: Analytics,
}

/// `userId` is left untyped so a malformed id is a field error, not a JSON error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteUserRequest {
    #[serde(default)]
    pub user_id: Option<Value>,
}

impl DeleteUserRequest {
    pub fn parsed_id(&self) -> Option<Uuid> {
        self.user_id
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteUserResponse {
    pub success: bool,
    pub message: &'static str,
    pub deleted_user: DeletedUser,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub profile_image: Option<String>,
    pub role: Role,
}

impl From<&User> for ProfileView {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            profile_image: u.profile_image.clone(),
            role: u.role,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileResponse {
    pub success: bool,
    pub message: &'static str,
    pub user: ProfileView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_info: Option<CompressionInfo>,
}
