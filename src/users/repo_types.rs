use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// Argon2 hash; `None` for accounts created through Google sign-in.
    pub password_hash: Option<String>,
    pub role: Role,
    pub profile_image: Option<String>,
    pub google_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub profile_image: Option<String>,
    pub google_id: Option<String>,
    /// Backdated creation time; `None` means now.
    pub created_at: Option<OffsetDateTime>,
}

impl NewUser {
    pub fn with_password(name: String, email: String, password_hash: String) -> Self {
        Self {
            name,
            email,
            password_hash: Some(password_hash),
            role: Role::User,
            profile_image: None,
            google_id: None,
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub profile_image: Option<String>,
}

/// Listing filter; every `None` field matches all users.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub search: Option<String>,
    pub role: Option<Role>,
    pub created_from: Option<OffsetDateTime>,
    pub created_to: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow)]
pub struct UserStats {
    pub total: i64,
    pub new_since: i64,
    pub admins: i64,
    pub regular: i64,
}
