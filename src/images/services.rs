use std::io::Cursor;

use anyhow::Context;
use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
pub const PROFILE_IMAGE_SIDE: u32 = 400;
const JPEG_QUALITY: u8 = 80;

/// Human-readable size metrics reported back to the client.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompressionInfo {
    pub original_size: String,
    pub final_size: String,
    pub reduction: String,
}

impl CompressionInfo {
    pub fn new(original: usize, processed: usize) -> Self {
        let kb = |n: usize| format!("{:.2} KB", n as f64 / 1024.0);
        let reduction = if original == 0 {
            0.0
        } else {
            100.0 - (processed as f64 / original as f64 * 100.0)
        };
        Self {
            original_size: kb(original),
            final_size: kb(processed),
            reduction: format!("{reduction:.2}%"),
        }
    }
}

pub struct ProcessedImage {
    pub body: Bytes,
    pub info: CompressionInfo,
}

#[derive(Debug)]
pub struct UploadedImage {
    pub key: String,
    pub url: String,
    pub info: CompressionInfo,
}

pub fn profile_image_key(user_id: Uuid, at: OffsetDateTime) -> String {
    let millis = at.unix_timestamp_nanos() / 1_000_000;
    format!("ProfileImages/profile-{user_id}-{millis}.jpg")
}

fn encode_profile_image(original: &[u8]) -> anyhow::Result<Vec<u8>> {
    let img = image::load_from_memory(original).context("decode image")?;
    let square = img.resize_to_fill(PROFILE_IMAGE_SIDE, PROFILE_IMAGE_SIDE, FilterType::Lanczos3);
    let rgb = DynamicImage::ImageRgb8(square.to_rgb8());

    let mut out = Cursor::new(Vec::new());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))
        .context("encode jpeg")?;
    Ok(out.into_inner())
}

/// Centre-crops to a 400x400 square and re-encodes as JPEG.
pub async fn process_profile_image(original: Bytes) -> Result<ProcessedImage, ApiError> {
    let original_len = original.len();
    let encoded = tokio::task::spawn_blocking(move || encode_profile_image(&original))
        .await
        .context("image worker panicked")?
        .map_err(|e| {
            debug!(error = %e, "image rejected");
            ApiError::bad_request("Unable to process profile image")
        })?;

    let info = CompressionInfo::new(original_len, encoded.len());
    Ok(ProcessedImage {
        body: Bytes::from(encoded),
        info,
    })
}

/// Validates, processes and stores a profile image for `user_id`.
pub async fn upload_profile_image(
    st: &AppState,
    user_id: Uuid,
    content_type: &str,
    body: Bytes,
) -> Result<UploadedImage, ApiError> {
    if body.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::PayloadTooLarge(
            "File too large. Maximum size is 5MB".into(),
        ));
    }
    if !content_type.starts_with("image/") {
        return Err(ApiError::bad_request(
            "Invalid file type. Only image files are allowed.",
        ));
    }

    let processed = process_profile_image(body).await?;
    let key = profile_image_key(user_id, OffsetDateTime::now_utc());
    st.storage
        .put_object(&key, processed.body, "image/jpeg")
        .await
        .with_context(|| format!("put_object {key}"))?;

    info!(%user_id, key = %key, final_size = %processed.info.final_size, "profile image stored");
    Ok(UploadedImage {
        url: st.storage.public_url(&key),
        key,
        info: processed.info,
    })
}
