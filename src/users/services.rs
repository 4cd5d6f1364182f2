use bytes::Bytes;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{
    Analytics, CachedProfile, DeletedUser, LoadType, Pagination, RecentUser, UserListItem,
};
use super::filter::joined_at;
use super::repo_types::{ProfileUpdate, User, UserFilter};
use crate::{
    cache::{get_json, profile_key, set_json, PROFILE_TTL},
    error::ApiError,
    images::{upload_profile_image, CompressionInfo},
    state::AppState,
};

const RECENT_USERS: i64 = 6;

/// Cache-aside profile read; the flag is `true` when served from cache.
pub async fn profile(st: &AppState, user_id: Uuid) -> Result<(CachedProfile, bool), ApiError> {
    let key = profile_key(user_id);
    if let Some(cached) = get_json::<CachedProfile>(st.cache.as_ref(), &key).await? {
        return Ok((cached, true));
    }

    let user = st
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    let profile = CachedProfile::from(&user);
    set_json(st.cache.as_ref(), &key, &profile, PROFILE_TTL).await?;
    Ok((profile, false))
}

async fn invalidate_profile(st: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    st.cache.delete(&profile_key(user_id)).await?;
    Ok(())
}

pub struct ImageUpload {
    pub content_type: String,
    pub body: Bytes,
}

/// Applies a name and/or new profile image. An image stored for an update
/// that then fails is removed again.
pub async fn update_profile(
    st: &AppState,
    user_id: Uuid,
    name: Option<String>,
    image: Option<ImageUpload>,
) -> Result<(User, Option<CompressionInfo>), ApiError> {
    if name.is_none() && image.is_none() {
        return Err(ApiError::bad_request("No fields provided for update"));
    }

    let uploaded = match image {
        Some(img) => Some(upload_profile_image(st, user_id, &img.content_type, img.body).await?),
        None => None,
    };

    let update = ProfileUpdate {
        name,
        profile_image: uploaded.as_ref().map(|u| u.url.clone()),
    };
    let result = st.users.update_profile(user_id, update).await;

    let user = match result {
        Ok(Some(user)) => user,
        other => {
            if let Some(u) = &uploaded {
                if let Err(e) = st.storage.delete_object(&u.key).await {
                    warn!(error = %e, key = %u.key, "orphaned profile image");
                }
            }
            return match other {
                Ok(_) => Err(ApiError::not_found("User not found")),
                Err(e) => Err(e.into()),
            };
        }
    };

    invalidate_profile(st, user_id).await?;
    info!(%user_id, image = uploaded.is_some(), "profile updated");
    Ok((user, uploaded.map(|u| u.info)))
}

/// Deletes a regular user on behalf of `admin`.
pub async fn delete_user(st: &AppState, admin: &User, target_id: Uuid) -> Result<User, ApiError> {
    if target_id == admin.id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }
    let target = st
        .users
        .find_by_id(target_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    if target.is_admin() {
        return Err(ApiError::forbidden("Cannot delete admin accounts"));
    }

    st.users.delete(target.id).await?;
    invalidate_profile(st, target.id).await?;
    info!(admin_id = %admin.id, user_id = %target.id, "user deleted");
    Ok(target)
}

impl From<&User> for DeletedUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            role: u.role,
        }
    }
}

pub struct ListParams {
    pub page: i64,
    pub limit: i64,
    pub filter: UserFilter,
    pub load_type: LoadType,
}

pub async fn list_users(
    st: &AppState,
    params: &ListParams,
    now: OffsetDateTime,
) -> Result<(Vec<UserListItem>, Pagination), ApiError> {
    let total = st.users.count(&params.filter).await?;
    let offset = (params.page - 1) * params.limit;
    let rows = st.users.list(&params.filter, params.limit, offset).await?;

    let detailed = params.load_type == LoadType::Detailed;
    let users = rows
        .into_iter()
        .map(|u| UserListItem {
            joined_at: joined_at(u.created_at, now),
            profile_image: detailed.then_some(u.profile_image),
            id: u.id,
            name: u.name,
            email: u.email,
            role: u.role,
        })
        .collect();

    Ok((users, Pagination::new(params.page, params.limit, total)))
}

pub async fn recent_users(st: &AppState, now: OffsetDateTime) -> Result<Vec<RecentUser>, ApiError> {
    let rows = st
        .users
        .list(&UserFilter::default(), RECENT_USERS, 0)
        .await?;
    Ok(rows
        .into_iter()
        .map(|u| RecentUser {
            joined_at: joined_at(u.created_at, now),
            name: u.name,
            email: u.email,
            profile_image: u.profile_image,
        })
        .collect())
}

pub async fn analytics(st: &AppState, now: OffsetDateTime) -> Result<Analytics, ApiError> {
    let stats = st.users.stats(now - Duration::hours(24)).await?;
    Ok(Analytics::new(stats, now))
}
