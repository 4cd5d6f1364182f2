use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use moka::{
    ops::compute::{CompResult, Op},
    sync::Cache,
    Expiry,
};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

pub const OTP_TTL: Duration = Duration::from_secs(5 * 60);
pub const PROFILE_TTL: Duration = Duration::from_secs(60 * 60);

pub fn otp_key(email: &str) -> String {
    format!("otp:{email}")
}

pub fn profile_key(user_id: Uuid) -> String {
    format!("user_profile:{user_id}")
}

/// Ephemeral key-value store with a TTL per entry.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    /// Inserts or overwrites `key`; an overwrite restarts the TTL.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()>;
    /// Returns `true` only for the caller that actually removed a live entry.
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;
    /// Removes `key` only while it still holds `expected`.
    async fn delete_if(&self, key: &str, expected: &str) -> anyhow::Result<bool>;
}

pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn KvCache,
    key: &str,
) -> anyhow::Result<Option<T>> {
    match cache.get(key).await? {
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("decode cached value {key}"))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize>(
    cache: &dyn KvCache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value).context("encode cache value")?;
    cache.set_ex(key, raw, ttl).await
}

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache backed by moka.
#[derive(Clone)]
pub struct MokaCache {
    inner: Cache<String, Entry>,
}

impl MokaCache {
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryTtl)
            .build();
        Self { inner }
    }
}

impl Default for MokaCache {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl KvCache for MokaCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.inner.get(key).map(|e| e.value))
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()> {
        self.inner.insert(key.to_string(), Entry { value, ttl });
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.inner.remove(key).is_some())
    }

    async fn delete_if(&self, key: &str, expected: &str) -> anyhow::Result<bool> {
        let result = self
            .inner
            .entry_by_ref(key)
            .and_compute_with(|current| match current {
                Some(entry) if entry.value().value == expected => Op::Remove,
                _ => Op::Nop,
            });
        Ok(matches!(result, CompResult::Removed(_)))
    }
}
