//! Image-reference resolution.
//!
//! Maps a CSV `primary_image` value to an image row, in four steps,
//! first hit wins:
//!
//! 1. An existing original image (by path, then basename, then the
//!    owning upload's filenames).
//! 2. A completed upload (an original image row is created for it).
//! 3. A local filesystem path, ingested synchronously through the
//!    upload engine.
//! 4. A URL, fetched and ingested by a background job; attachment
//!    happens after the importing transaction.

use anyhow::anyhow;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use tracing::instrument;

use crate::database::entity::image::{ImageModel, ImageVariant};
use crate::database::DepotDatabase;
use crate::error::{ServerError, ServerResult};
use crate::jobs::Job;
use crate::uploads;
use crate::State;
use depot::api::v1::uploads::{InitializeUploadRequest, UploadChunkRequest};
use depot::hash::Hash;
use depot::mime::ImageFormat;

/// Chunk size used when the engine ingests files on its own behalf.
const INGEST_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Resolves an image reference and attaches the result to a product.
///
/// Step 4 only schedules work; the attachment then happens when the
/// fetch job completes.
#[instrument(skip_all, fields(product_id, source))]
pub async fn resolve_primary_image(
    state: &State,
    product_id: i64,
    source: &str,
) -> ServerResult<()> {
    let source = source.trim();
    if source.is_empty() {
        return Ok(());
    }

    let base = basename(source);
    let database = state.database().await?;

    // Step 1: an image we already know about
    if let Some(image) = database
        .find_original_image_for_source(source, &base)
        .await?
    {
        tracing::debug!(image_id = %image.id, "Resolved via existing image");
        return database.attach_primary_image(product_id, &image.id).await;
    }

    // Step 2: a completed upload without an image row yet
    if let Some(upload) = database.find_completed_upload_for_source(&base).await? {
        let image =
            uploads::ensure_original_image(database, &upload, upload.total_size).await?;
        tracing::debug!(upload_id = %upload.id, "Resolved via completed upload");
        return database.attach_primary_image(product_id, &image.id).await;
    }

    // Step 3: a local file, ingested right now
    if looks_like_local_path(source) {
        let image = ingest_local_file(state, source).await?;
        tracing::debug!(image_id = %image.id, "Resolved via local path ingest");
        return database.attach_primary_image(product_id, &image.id).await;
    }

    // Step 4: remote, fetched in the background
    if is_url(source) {
        state.enqueue_job(Job::FetchRemoteImage {
            product_id,
            source: source.to_string(),
        });
        return Ok(());
    }

    Err(ServerError::validation(format!(
        "Unresolvable image reference \"{source}\""
    )))
}

/// Downloads a remote image, ingests it, and attaches it.
///
/// Runs inside the background job; retried with back-off on
/// transient failures.
#[instrument(skip_all, fields(product_id, source))]
pub async fn fetch_and_attach(state: &State, product_id: i64, source: &str) -> ServerResult<()> {
    if !source.starts_with("http://") && !source.starts_with("https://") {
        return Err(ServerError::validation(format!(
            "Unsupported URL scheme in \"{source}\""
        )));
    }

    let response = reqwest::get(source)
        .await
        .map_err(|e| ServerError::RequestError(anyhow!("Fetch failed: {e}")))?
        .error_for_status()
        .map_err(|e| ServerError::RequestError(anyhow!("Fetch failed: {e}")))?;

    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

    let data = response
        .bytes()
        .await
        .map_err(|e| ServerError::RequestError(anyhow!("Fetch failed: {e}")))?;

    let filename = basename(source);
    let mime_type = mime_type.or_else(|| guess_mime(&filename));

    let image = ingest_bytes(state, &filename, mime_type, &data).await?;

    let database = state.database().await?;
    database.attach_primary_image(product_id, &image.id).await?;

    tracing::info!(image_id = %image.id, "Remote image attached");

    Ok(())
}

/// Ingests a file from the local filesystem.
async fn ingest_local_file(state: &State, path: &str) -> ServerResult<ImageModel> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| ServerError::RequestError(anyhow!("Unreadable image path {path}: {e}")))?;

    let filename = basename(path);
    let mime_type = guess_mime(&filename);

    ingest_bytes(state, &filename, mime_type, &data).await
}

/// Runs bytes through the upload engine and returns the original
/// image row of the resulting (or deduplicated) upload.
///
/// Payloads over 10 MiB are split into multiple chunks.
pub(crate) async fn ingest_bytes(
    state: &State,
    filename: &str,
    mime_type: Option<String>,
    data: &[u8],
) -> ServerResult<ImageModel> {
    use crate::database::entity::upload::UploadStatus;

    if data.is_empty() {
        return Err(ServerError::validation("Image source is empty"));
    }

    let total_chunks = data.len().div_ceil(INGEST_CHUNK_SIZE).max(1) as u32;
    let checksum = Hash::sha256_from_bytes(data);

    let upload = uploads::initialize(
        state,
        InitializeUploadRequest {
            original_filename: filename.to_string(),
            total_chunks,
            total_size: data.len() as u64,
            checksum_sha256: checksum.to_hex(),
            mime_type,
        },
    )
    .await?;

    // Deduplicated against an already-completed upload
    if upload.status == UploadStatus::Completed {
        let database = state.database().await?;
        return uploads::ensure_original_image(database, &upload, upload.total_size).await;
    }

    for (index, chunk) in data.chunks(INGEST_CHUNK_SIZE).enumerate() {
        uploads::receive_chunk(
            state,
            UploadChunkRequest {
                upload_id: upload.id.clone(),
                chunk_index: index as u32,
                total_chunks: Some(total_chunks),
                chunk_data: BASE64_STANDARD.encode(chunk),
                checksum: Hash::sha256_from_bytes(chunk).to_hex(),
                original_filename: Some(filename.to_string()),
                chunk_size: Some(chunk.len() as u64),
                total_size: Some(data.len() as u64),
            },
        )
        .await?;
    }

    let (_, images) = uploads::complete(state, &upload.id, true).await?;

    images
        .into_iter()
        .find(|image| image.variant == ImageVariant::Original)
        .ok_or(ServerError::InternalServerError)
}

/// Extracts the final path segment, dropping any query or fragment.
pub(crate) fn basename(source: &str) -> String {
    let stripped = source
        .split(['?', '#'])
        .next()
        .unwrap_or(source)
        .trim_end_matches(['/', '\\']);

    stripped
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(stripped)
        .to_string()
}

/// Returns true for anything with a URL scheme.
pub(crate) fn is_url(source: &str) -> bool {
    source.contains("://")
}

/// Returns true for absolute Unix or Windows filesystem paths.
pub(crate) fn looks_like_local_path(source: &str) -> bool {
    !is_url(source) && (source.starts_with('/') || source.contains(":\\"))
}

fn guess_mime(filename: &str) -> Option<String> {
    filename
        .rsplit('.')
        .next()
        .and_then(ImageFormat::from_extension)
        .map(|f| f.mime().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename() {
        assert_eq!("logo.png", basename("logo.png"));
        assert_eq!("logo.png", basename("/srv/images/logo.png"));
        assert_eq!("logo.png", basename("C:\\images\\logo.png"));
        assert_eq!("logo.png", basename("https://cdn.example.com/a/logo.png?v=3"));
        assert_eq!("logo.png", basename("https://cdn.example.com/a/logo.png#frag"));
    }

    #[test]
    fn test_source_classification() {
        assert!(is_url("https://example.com/a.png"));
        assert!(is_url("s3://bucket/key.png"));
        assert!(!is_url("/var/lib/images/a.png"));

        assert!(looks_like_local_path("/var/lib/images/a.png"));
        assert!(looks_like_local_path("C:\\images\\a.png"));
        assert!(!looks_like_local_path("https://example.com/a.png"));
        assert!(!looks_like_local_path("logo.png"));
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(Some("image/png".to_string()), guess_mime("logo.png"));
        assert_eq!(Some("image/jpeg".to_string()), guess_mime("photo.JPG"));
        assert_eq!(None, guess_mime("data.csv"));
    }
}
