use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use anyhow::Context;

use crate::cache::{otp_key, set_json, KvCache, OTP_TTL};

/// Pending login code, cached under `otp:<email>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OtpRecord {
    pub otp: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    pub is_new_user: bool,
}

impl OtpRecord {
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        now <= self.expiry
    }
}

pub fn generate_otp() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000u32).to_string()
}

/// Stores a fresh code for `email`, replacing any pending one.
pub async fn issue(
    cache: &dyn KvCache,
    email: &str,
    is_new_user: bool,
    now: OffsetDateTime,
) -> anyhow::Result<OtpRecord> {
    let record = OtpRecord {
        otp: generate_otp(),
        expiry: now + OTP_TTL,
        issued_at: now,
        is_new_user,
    };
    set_json(cache, &otp_key(email), &record, OTP_TTL).await?;
    Ok(record)
}

/// Checks `code` against the pending record and consumes it on a match.
/// `None` covers absent, mismatched, expired, and already-consumed codes.
pub async fn consume(
    cache: &dyn KvCache,
    email: &str,
    code: &str,
    now: OffsetDateTime,
) -> anyhow::Result<Option<OtpRecord>> {
    let key = otp_key(email);
    let Some(raw) = cache.get(&key).await? else {
        return Ok(None);
    };
    let record: OtpRecord = serde_json::from_str(&raw).context("decode otp record")?;
    if record.otp != code || !record.is_live(now) {
        return Ok(None);
    }
    // removes the record that was checked, never one issued since;
    // only the caller that removes it wins a concurrent verify
    if !cache.delete_if(&key, &raw).await? {
        return Ok(None);
    }
    Ok(Some(record))
}
