use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use moka::sync::Cache;
use serde::Deserialize;
use tracing::debug;

const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];
/// Lifetime of the cached key set; an unknown `kid` refetches early.
const JWKS_TTL: Duration = Duration::from_secs(60 * 60);

/// Identity asserted by a verified Google ID token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleIdentity {
    pub subject: String,
    pub email: String,
    pub name: Option<String>,
}

#[async_trait]
pub trait GoogleVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> anyhow::Result<GoogleIdentity>;
}

#[derive(Debug, Deserialize)]
struct GoogleClaims {
    sub: String,
    email: String,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
}

/// Verifies ID tokens against Google's published signing keys.
pub struct GoogleIdTokenVerifier {
    client: reqwest::Client,
    client_id: Option<String>,
    keys: Cache<&'static str, Arc<JwkSet>>,
}

impl GoogleIdTokenVerifier {
    pub fn new(client_id: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id,
            keys: Cache::builder().max_capacity(1).time_to_live(JWKS_TTL).build(),
        }
    }

    async fn signing_keys(&self, refresh: bool) -> anyhow::Result<Arc<JwkSet>> {
        if !refresh {
            if let Some(keys) = self.keys.get(GOOGLE_CERTS_URL) {
                return Ok(keys);
            }
        }
        let keys = Arc::new(self.fetch_keys().await?);
        self.keys.insert(GOOGLE_CERTS_URL, keys.clone());
        debug!(count = keys.keys.len(), "google signing keys refreshed");
        Ok(keys)
    }

    async fn fetch_keys(&self) -> anyhow::Result<JwkSet> {
        self.client
            .get(GOOGLE_CERTS_URL)
            .send()
            .await
            .context("fetch google certs")?
            .error_for_status()
            .context("google certs status")?
            .json::<JwkSet>()
            .await
            .context("decode google certs")
    }
}

#[async_trait]
impl GoogleVerifier for GoogleIdTokenVerifier {
    async fn verify(&self, credential: &str) -> anyhow::Result<GoogleIdentity> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or_else(|| anyhow!("google sign-in is not configured"))?;

        let header = decode_header(credential).context("decode id token header")?;
        let kid = header.kid.ok_or_else(|| anyhow!("id token has no kid"))?;
        let mut keys = self.signing_keys(false).await?;
        if keys.find(&kid).is_none() {
            keys = self.signing_keys(true).await?;
        }
        let jwk = keys
            .find(&kid)
            .ok_or_else(|| anyhow!("unknown google signing key {kid}"))?;
        let key = DecodingKey::from_jwk(jwk).context("google jwk")?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[client_id]);
        validation.set_issuer(&GOOGLE_ISSUERS);
        let data = decode::<GoogleClaims>(credential, &key, &validation).context("verify id token")?;

        let claims = data.claims;
        anyhow::ensure!(claims.email_verified, "google email not verified");
        debug!(subject = %claims.sub, "google id token verified");
        Ok(GoogleIdentity {
            subject: claims.sub,
            email: claims.email,
            name: claims.name,
        })
    }
}
