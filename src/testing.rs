//! In-memory stand-ins for the external services, used by unit and router tests.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use axum::extract::FromRef;
use bytes::Bytes;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::claims::TokenPair;
use crate::auth::google::{GoogleIdentity, GoogleVerifier};
use crate::auth::jwt::{tests::test_jwt_config, JwtKeys};
use crate::cache::MokaCache;
use crate::config::{AppConfig, MailConfig, StorageConfig};
use crate::mail::{MailTemplates, Mailer};
use crate::state::AppState;
use crate::storage::StorageClient;
use crate::users::repo::UserStore;
use crate::users::repo_types::{NewUser, ProfileUpdate, Role, User, UserFilter, UserStats};

/// Same predicate `PgUserStore::list` builds in SQL.
fn matches(filter: &UserFilter, user: &User) -> bool {
    if let Some(search) = &filter.search {
        let needle = search.to_lowercase();
        if !user.name.to_lowercase().contains(&needle)
            && !user.email.to_lowercase().contains(&needle)
        {
            return false;
        }
    }
    if filter.role.is_some_and(|r| r != user.role) {
        return false;
    }
    if filter.created_from.is_some_and(|from| user.created_at < from) {
        return false;
    }
    if filter.created_to.is_some_and(|to| user.created_at > to) {
        return false;
    }
    true
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
    fail_updates: AtomicBool,
}

impl MemoryUserStore {
    pub fn fail_updates(&self) {
        self.fail_updates.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn create(&self, user: NewUser) -> anyhow::Result<User> {
        let mut users = self.users.lock().unwrap();
        anyhow::ensure!(
            users.iter().all(|u| u.email != user.email),
            "duplicate email {}",
            user.email
        );
        let now = OffsetDateTime::now_utc();
        let created = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            profile_image: user.profile_image,
            google_id: user.google_id,
            created_at: user.created_at.unwrap_or(now),
            updated_at: user.created_at.unwrap_or(now),
        };
        users.push(created.clone());
        Ok(created)
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> anyhow::Result<Option<User>> {
        anyhow::ensure!(!self.fail_updates.load(Ordering::SeqCst), "store unavailable");
        let mut users = self.users.lock().unwrap();
        let Some(user) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            user.name = name;
        }
        if let Some(image) = update.profile_image {
            user.profile_image = Some(image);
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        let mut users = self.users.lock().unwrap();
        Ok(match users.iter_mut().find(|u| u.id == id) {
            Some(user) => {
                user.password_hash = Some(password_hash.to_string());
                true
            }
            None => false,
        })
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut users = self.users.lock().unwrap();
        let before = users.len();
        users.retain(|u| u.id != id);
        Ok(users.len() < before)
    }

    async fn delete_all(&self) -> anyhow::Result<u64> {
        let mut users = self.users.lock().unwrap();
        let n = users.len() as u64;
        users.clear();
        Ok(n)
    }

    async fn list(&self, filter: &UserFilter, limit: i64, offset: i64) -> anyhow::Result<Vec<User>> {
        let mut matched: Vec<User> = self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| matches(filter, u))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, filter: &UserFilter) -> anyhow::Result<i64> {
        Ok(self.users.lock().unwrap().iter().filter(|u| matches(filter, u)).count() as i64)
    }

    async fn stats(&self, new_since: OffsetDateTime) -> anyhow::Result<UserStats> {
        let users = self.users.lock().unwrap();
        Ok(UserStats {
            total: users.len() as i64,
            new_since: users.iter().filter(|u| u.created_at >= new_since).count() as i64,
            admins: users.iter().filter(|u| u.role == Role::Admin).count() as i64,
            regular: users.iter().filter(|u| u.role == Role::User).count() as i64,
        })
    }
}

#[derive(Default)]
pub struct FakeStorage {
    pub puts: Mutex<Vec<(String, usize, String)>>,
    pub deletes: Mutex<Vec<String>>,
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        self.puts
            .lock()
            .unwrap()
            .push((key.to_string(), body.len(), content_type.to_string()));
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.deletes.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("https://cdn.test/{key}")
    }
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    pub fn last(&self) -> Option<SentMail> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}

/// Accepts exactly one credential, [`FakeGoogle::VALID`].
pub struct FakeGoogle;

impl FakeGoogle {
    pub const VALID: &'static str = "valid-google-credential";
}

#[async_trait]
impl GoogleVerifier for FakeGoogle {
    async fn verify(&self, credential: &str) -> anyhow::Result<GoogleIdentity> {
        anyhow::ensure!(credential == Self::VALID, "signature mismatch");
        Ok(GoogleIdentity {
            subject: "google-sub-1".into(),
            email: "G.User@gmail.com".into(),
            name: Some("Gee User".into()),
        })
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".into(),
        jwt: test_jwt_config(),
        storage: StorageConfig {
            endpoint: "http://s3.test".into(),
            bucket: "test".into(),
            access_key: "ak".into(),
            secret_key: "sk".into(),
            region: "auto".into(),
            public_url: "https://cdn.test".into(),
        },
        mail: MailConfig {
            api_url: None,
            api_key: None,
            from: "no-reply@test".into(),
            from_name: "Moovo".into(),
        },
        google_client_id: None,
        reset_url_base: "http://portal.test/reset-password".into(),
        cors_origins: Vec::new(),
    }
}

pub struct Harness {
    pub state: AppState,
    pub users: Arc<MemoryUserStore>,
    pub storage: Arc<FakeStorage>,
    pub mailer: Arc<RecordingMailer>,
}

impl Harness {
    pub async fn add_user(&self, email: &str, role: Role) -> User {
        self.add_user_at(email, role, OffsetDateTime::now_utc()).await
    }

    pub async fn add_user_at(&self, email: &str, role: Role, created_at: OffsetDateTime) -> User {
        self.users
            .create(NewUser {
                name: crate::auth::services::display_name_from_email(email),
                email: email.to_string(),
                password_hash: None,
                role,
                profile_image: None,
                google_id: None,
                created_at: Some(created_at),
            })
            .await
            .unwrap()
    }

    pub fn tokens_for(&self, user: &User) -> TokenPair {
        JwtKeys::from_ref(&self.state)
            .sign_pair(user.id, &user.email)
            .unwrap()
    }
}

pub fn harness() -> Harness {
    let users = Arc::new(MemoryUserStore::default());
    let storage = Arc::new(FakeStorage::default());
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState {
        config: Arc::new(test_config()),
        users: users.clone(),
        cache: Arc::new(MokaCache::new(1_000)),
        storage: storage.clone(),
        mailer: mailer.clone(),
        templates: Arc::new(MailTemplates::new().unwrap()),
        google: Arc::new(FakeGoogle),
    };
    Harness {
        state,
        users,
        storage,
        mailer,
    }
}

impl AppState {
    pub fn fake() -> Self {
        harness().state
    }
}
