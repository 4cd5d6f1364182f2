use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::auth::google::{GoogleIdTokenVerifier, GoogleVerifier};
use crate::cache::{KvCache, MokaCache};
use crate::config::AppConfig;
use crate::mail::{self, MailTemplates, Mailer};
use crate::storage::{S3Storage, StorageClient};
use crate::users::repo::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub cache: Arc<dyn KvCache>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
    pub templates: Arc<MailTemplates>,
    pub google: Arc<dyn GoogleVerifier>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;

        let storage = Arc::new(S3Storage::new(&config.storage).await?) as Arc<dyn StorageClient>;
        let mailer: Arc<dyn Mailer> = Arc::from(mail::from_config(&config.mail));
        let google = Arc::new(GoogleIdTokenVerifier::new(config.google_client_id.clone()))
            as Arc<dyn GoogleVerifier>;

        Ok(Self {
            users: Arc::new(PgUserStore::new(db)),
            cache: Arc::new(MokaCache::default()),
            config,
            storage,
            mailer,
            templates: Arc::new(MailTemplates::new()?),
            google,
        })
    }
}
