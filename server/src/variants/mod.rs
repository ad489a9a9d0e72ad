//! Image variant generation.
//!
//! Turns a completed upload's assembled blob into resized variants
//! (small/medium/large, longest edge capped, never upscaled).
//! Resized outputs are re-encoded as JPEG at quality 85; images
//! already within the cap are copied as-is. The operation is
//! idempotent per `(upload, variant)` and a failure in one variant
//! does not prevent the others.

use std::io::Cursor;

use anyhow::anyhow;
use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, EntityTrait};
use tokio::task;
use tracing::instrument;
use uuid::Uuid;

use crate::database::entity::image as image_entity;
use crate::database::entity::image::{Entity as Image, ImageModel, ImageVariant};
use crate::database::entity::upload::{UploadModel, UploadStatus};
use crate::database::DepotDatabase;
use crate::error::{ServerError, ServerResult};
use crate::storage::StorageBackend;
use crate::uploads;
use crate::State;
use depot::mime::ImageFormat;

/// JPEG quality of re-encoded variants.
const ENCODE_QUALITY: u8 = 85;

/// Generates all missing variants for a completed upload.
///
/// Returns every image row of the upload, including pre-existing
/// ones. Errs if the upload is not completed, is not a supported
/// image, or if any variant could not be produced (so the caller
/// can retry; already-persisted variants are skipped on retry).
#[instrument(skip_all, fields(upload_id))]
pub async fn generate_variants(state: &State, upload_id: &str) -> ServerResult<Vec<ImageModel>> {
    let database = state.database().await?;
    let storage = state.storage().await?;

    let upload = database.find_upload(upload_id).await?;

    if upload.status != UploadStatus::Completed {
        return Err(ServerError::StateConflict {
            status: upload.status.to_string(),
        });
    }

    let format = image_format_of(&upload).ok_or_else(|| {
        ServerError::validation(format!(
            "Upload {} is not a supported image",
            upload.id
        ))
    })?;

    let blob_path = upload.blob_path();
    let fs_path = storage.path_on_fs(&blob_path);

    // Decoding and resizing are CPU-bound
    let decoded = task::spawn_blocking(move || image::open(fs_path))
        .await
        .map_err(|e| ServerError::StorageError(anyhow!("Decoder task died: {e}")))?
        .map_err(|e| ServerError::validation(format!("Undecodable image: {e}")))?;

    let (width, height) = (decoded.width(), decoded.height());

    let original =
        uploads::ensure_original_image(database, &upload, upload.total_size).await?;

    // Backfill the original's dimensions now that we have decoded it
    if original.width.is_none() {
        Image::update(image_entity::ActiveModel {
            id: Set(original.id.clone()),
            width: Set(Some(width as i32)),
            height: Set(Some(height as i32)),
            ..Default::default()
        })
        .exec(database)
        .await
        .map_err(ServerError::database_error)?;
    }

    let mut produced = vec![original];
    let mut failures = 0usize;

    for variant in ImageVariant::resized() {
        if let Some(existing) = database.find_image_variant(&upload.id, variant).await? {
            produced.push(existing);
            continue;
        }

        match produce_variant(state, &upload, &decoded, format, variant).await {
            Ok(model) => produced.push(model),
            Err(e) => {
                failures += 1;
                tracing::warn!(variant = %variant, "Variant generation failed: {}", e);
            }
        }
    }

    if failures > 0 {
        return Err(ServerError::StorageError(anyhow!(
            "{failures} variants could not be generated"
        )));
    }

    tracing::info!(count = produced.len(), "Variants generated");

    Ok(produced)
}

async fn produce_variant(
    state: &State,
    upload: &UploadModel,
    decoded: &DynamicImage,
    format: ImageFormat,
    variant: ImageVariant,
) -> ServerResult<ImageModel> {
    let database = state.database().await?;
    let storage = state.storage().await?;

    let max_dim = variant
        .max_dimension()
        .expect("resized variants always have a cap");

    let (encoded, out_width, out_height, mime, extension) =
        match target_dimensions(decoded.width(), decoded.height(), max_dim) {
            // Small enough already: copy the source bytes verbatim
            None => {
                let bytes = storage.get(&upload.blob_path()).await?;
                (
                    bytes,
                    decoded.width(),
                    decoded.height(),
                    format.mime(),
                    format.extension(),
                )
            }
            Some((w, h)) => {
                let source = decoded.clone();
                let encoded = task::spawn_blocking(move || -> Result<Vec<u8>, image::ImageError> {
                    let resized = source.resize_exact(w, h, FilterType::Lanczos3);
                    let mut out = Cursor::new(Vec::new());
                    let mut encoder = JpegEncoder::new_with_quality(&mut out, ENCODE_QUALITY);
                    encoder.encode_image(&resized.to_rgb8())?;
                    Ok(out.into_inner())
                })
                .await
                .map_err(|e| ServerError::StorageError(anyhow!("Encoder task died: {e}")))?
                .map_err(|e| ServerError::StorageError(anyhow!("Encoding failed: {e}")))?;

                (encoded, w, h, "image/jpeg", "jpg")
            }
        };

    let path = format!("images/{}/{}.{}", variant, Uuid::new_v4(), extension);
    storage.put(&path, &encoded).await?;

    image_entity::ActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        upload_id: Set(upload.id.clone()),
        variant: Set(variant),
        path: Set(path),
        width: Set(Some(out_width as i32)),
        height: Set(Some(out_height as i32)),
        size_bytes: Set(encoded.len() as i64),
        mime_type: Set(mime.to_string()),
        created_at: Set(Utc::now()),
    }
    .insert(database)
    .await
    .map_err(ServerError::database_error)
}

/// Scales to fit the cap, preserving aspect ratio.
///
/// Returns `None` when the image already fits (upscaling is
/// forbidden); otherwise each dimension is scaled by
/// `max_dim / max(w, h)` and rounded to the nearest integer.
fn target_dimensions(width: u32, height: u32, max_dim: u32) -> Option<(u32, u32)> {
    let longest = width.max(height);
    if longest <= max_dim {
        return None;
    }

    let scale = max_dim as f64 / longest as f64;
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);

    Some((w, h))
}

/// Determines the image format from the declared MIME type, falling
/// back to the stored filename's extension.
fn image_format_of(upload: &UploadModel) -> Option<ImageFormat> {
    if let Some(mime) = upload.mime_type.as_deref() {
        if let Some(format) = ImageFormat::from_mime(mime) {
            return Some(format);
        }
    }

    upload
        .stored_filename
        .rsplit('.')
        .next()
        .and_then(ImageFormat::from_extension)
}
