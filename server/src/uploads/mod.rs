//! The chunked upload engine.
//!
//! State machine over upload sessions: `initialize` creates a
//! pending session, `receive_chunk` ingests chunks idempotently
//! under a row lock, `complete` assembles and verifies the blob,
//! and `resume`/`cancel`/`status`/`verify_checksum` round out the
//! lifecycle.
//!
//! ```text
//! pending --first chunk--> uploading --complete, ok--> completed
//!    |                         |------checksum fail--> failed
//!    `------cancel-------------'------cancel---------> cancelled
//! ```

#[cfg(test)]
mod tests;

use std::sync::Arc;

use anyhow::anyhow;
use async_stream::try_stream;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use bytes::Bytes;
use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use sea_orm::TransactionTrait;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tracing::instrument;
use uuid::Uuid;

use crate::database::entity::image::{self, Entity as Image, ImageModel, ImageVariant};
use crate::database::entity::upload::{self, Entity as Upload, UploadModel, UploadStatus};
use crate::database::entity::Json as DbJson;
use crate::database::DepotDatabase;
use crate::error::{ServerError, ServerResult};
use crate::jobs::Job;
use crate::storage::StorageBackend;
use crate::State;
use depot::api::v1::uploads::{
    ImageInfo, InitializeUploadRequest, ResumeUploadResponse, UploadChunkRequest,
    UploadChunkResponse, UploadStatusResponse,
};
use depot::hash::Hash;
use depot::mime as depot_mime;
use depot::stream::StreamHasher;

/// Maximum number of chunks per upload.
pub const MAX_TOTAL_CHUNKS: u32 = 10_000;

/// Maximum total file size (5 GiB).
pub const MAX_TOTAL_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Minimum implied chunk size.
///
/// Waived for files smaller than one minimum chunk.
pub const MIN_CHUNK_SIZE: u64 = 5 * 1024;

/// Maximum implied chunk size.
pub const MAX_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// Initializes an upload session.
///
/// If a completed upload already exists with the same whole-file
/// checksum, that session is returned unchanged (deduplication).
#[instrument(skip_all, fields(original_filename = %request.original_filename))]
pub async fn initialize(state: &State, request: InitializeUploadRequest) -> ServerResult<UploadModel> {
    if request.total_chunks < 1 || request.total_chunks > MAX_TOTAL_CHUNKS {
        return Err(ServerError::validation(format!(
            "total_chunks must be between 1 and {MAX_TOTAL_CHUNKS}"
        )));
    }

    if request.total_size < 1 || request.total_size > MAX_TOTAL_SIZE {
        return Err(ServerError::validation(format!(
            "total_size must be between 1 and {MAX_TOTAL_SIZE} bytes"
        )));
    }

    let implied_chunk_size = request.total_size / request.total_chunks as u64;
    if implied_chunk_size > MAX_CHUNK_SIZE {
        return Err(ServerError::validation(format!(
            "chunks must not exceed {MAX_CHUNK_SIZE} bytes"
        )));
    }
    if request.total_size >= MIN_CHUNK_SIZE && implied_chunk_size < MIN_CHUNK_SIZE {
        return Err(ServerError::validation(format!(
            "chunks must be at least {MIN_CHUNK_SIZE} bytes"
        )));
    }

    let checksum = Hash::from_hex(&request.checksum_sha256)
        .map_err(|_| ServerError::validation("checksum_sha256 must be 64 hexadecimal characters"))?;

    let database = state.database().await?;

    if let Some(existing) = database
        .find_completed_upload_by_checksum(&checksum.to_hex())
        .await?
    {
        tracing::debug!(upload_id = %existing.id, "Deduplicated against existing upload");
        return Ok(existing);
    }

    let now = Utc::now();
    let id = Uuid::new_v4().to_string();
    let stored_filename = make_stored_filename(&request.original_filename, request.mime_type.as_deref());

    let model = upload::ActiveModel {
        id: Set(id),
        original_filename: Set(request.original_filename),
        stored_filename: Set(stored_filename),
        mime_type: Set(request.mime_type),
        total_size: Set(request.total_size as i64),
        total_chunks: Set(request.total_chunks as i32),
        uploaded_chunks: Set(0),
        checksum_sha256: Set(checksum.to_hex()),
        status: Set(UploadStatus::Pending),
        uploaded_chunk_set: Set(DbJson(Default::default())),
        failure_reason: Set(None),
        completed_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let inserted = model
        .insert(database)
        .await
        .map_err(ServerError::database_error)?;

    tracing::info!(
        upload_id = %inserted.id,
        total_chunks = inserted.total_chunks,
        total_size = inserted.total_size,
        "Upload initialized"
    );

    Ok(inserted)
}

/// Ingests one chunk.
///
/// Runs entirely under a row-level exclusive lock on the upload so
/// two concurrent receivers for the same `(upload_id, chunk_index)`
/// produce one successful write and one idempotent no-op.
#[instrument(skip_all, fields(upload_id = %request.upload_id, chunk_index = request.chunk_index))]
pub async fn receive_chunk(
    state: &State,
    request: UploadChunkRequest,
) -> ServerResult<UploadChunkResponse> {
    let database = state.database().await?;
    let storage = state.storage().await?;

    let txn = database
        .begin()
        .await
        .map_err(ServerError::database_error)?;

    let upload = database.find_and_lock_upload(&txn, &request.upload_id).await?;

    match upload.status {
        // A client retrying after a lost response must see success.
        UploadStatus::Completed => {
            txn.commit().await.map_err(ServerError::database_error)?;
            return Ok(chunk_receipt(&upload, request.chunk_index));
        }
        UploadStatus::Failed | UploadStatus::Cancelled => {
            return Err(ServerError::StateConflict {
                status: upload.status.to_string(),
            });
        }
        UploadStatus::Pending | UploadStatus::Uploading => {}
    }

    if request.chunk_index >= upload.total_chunks as u32 {
        return Err(ServerError::validation(format!(
            "chunk_index must be below {}",
            upload.total_chunks
        )));
    }

    if upload.uploaded_chunk_set.0.contains(&request.chunk_index) {
        txn.commit().await.map_err(ServerError::database_error)?;
        return Ok(chunk_receipt(&upload, request.chunk_index));
    }

    let data = BASE64_STANDARD
        .decode(request.chunk_data.as_bytes())
        .map_err(|_| ServerError::validation("chunk_data is not valid base64"))?;

    let declared = Hash::from_hex(&request.checksum)
        .map_err(|_| ServerError::validation("checksum must be 64 hexadecimal characters"))?;

    if !Hash::sha256_from_bytes(&data).verify(&declared) {
        return Err(ServerError::ChecksumMismatch { context: "chunk" });
    }

    let chunk_path = upload.chunk_path(request.chunk_index);
    storage.put(&chunk_path, &data).await?;

    // Re-read and re-hash what the backend stored
    let stored = storage.get(&chunk_path).await?;
    if !Hash::sha256_from_bytes(&stored).verify(&declared) {
        let _ = storage.delete(&chunk_path).await;
        return Err(ServerError::StorageError(anyhow!(
            "Stored chunk failed re-verification"
        )));
    }

    let mut chunk_set = upload.uploaded_chunk_set.0.clone();
    chunk_set.insert(request.chunk_index);
    let uploaded_chunks = chunk_set.len() as i32;

    let updated = Upload::update(upload::ActiveModel {
        id: Set(upload.id.clone()),
        uploaded_chunks: Set(uploaded_chunks),
        uploaded_chunk_set: Set(DbJson(chunk_set)),
        status: Set(UploadStatus::Uploading),
        updated_at: Set(Utc::now()),
        ..Default::default()
    })
    .exec(&txn)
    .await
    .map_err(ServerError::database_error)?;

    txn.commit().await.map_err(ServerError::database_error)?;

    tracing::debug!(
        uploaded_chunks,
        total_chunks = updated.total_chunks,
        "Chunk received"
    );

    Ok(chunk_receipt(&updated, request.chunk_index))
}

/// Assembles and verifies a fully-uploaded session.
///
/// Chunks are concatenated in index order into the durable blob,
/// whose SHA-256 must match the client's declaration. On success the
/// chunk directory is deleted and variant generation is dispatched.
#[instrument(skip_all, fields(upload_id))]
pub async fn complete(
    state: &State,
    upload_id: &str,
    generate_variants: bool,
) -> ServerResult<(UploadModel, Vec<ImageModel>)> {
    let database = state.database().await?;
    let storage = state.storage().await?;

    let txn = database
        .begin()
        .await
        .map_err(ServerError::database_error)?;

    let upload = database.find_and_lock_upload(&txn, upload_id).await?;

    match upload.status {
        UploadStatus::Completed => {
            txn.commit().await.map_err(ServerError::database_error)?;
            let images = database.find_images_for_upload(upload_id).await?;
            return Ok((upload, images));
        }
        UploadStatus::Failed | UploadStatus::Cancelled => {
            return Err(ServerError::StateConflict {
                status: upload.status.to_string(),
            });
        }
        UploadStatus::Pending | UploadStatus::Uploading => {}
    }

    let missing = upload.missing_chunks();
    if !missing.is_empty() {
        return Err(ServerError::MissingChunks {
            count: missing.len(),
            missing,
        });
    }

    // Assemble into the durable blob, hashing along the way
    let blob_path = upload.blob_path();
    let chunk_paths: Vec<_> = (0..upload.total_chunks as u32)
        .map(|i| upload.chunk_path(i))
        .collect();

    let reader = concatenated_chunks(storage.clone(), chunk_paths);
    let (mut hashed, compute) = StreamHasher::new(reader, Sha256::new());
    storage.put_stream(&blob_path, &mut hashed).await?;

    let (digest, assembled_size) = compute
        .get()
        .ok_or(ServerError::InternalServerError)?;
    let actual = Hash::Sha256(digest.as_slice().try_into().unwrap());

    let declared = Hash::from_hex(&upload.checksum_sha256)
        .map_err(|_| ServerError::InternalServerError)?;

    let now = Utc::now();

    if !actual.verify(&declared) {
        tracing::warn!(
            expected = %upload.checksum_sha256,
            actual = %actual.to_hex(),
            "Assembled blob failed checksum verification"
        );

        storage.delete(&blob_path).await?;

        Upload::update(upload::ActiveModel {
            id: Set(upload.id.clone()),
            status: Set(UploadStatus::Failed),
            failure_reason: Set(Some("checksum mismatch".to_string())),
            updated_at: Set(now),
            ..Default::default()
        })
        .exec(&txn)
        .await
        .map_err(ServerError::database_error)?;

        let _ = storage.delete_prefix(&upload.chunk_prefix()).await;

        txn.commit().await.map_err(ServerError::database_error)?;

        return Err(ServerError::ChecksumMismatch {
            context: "assembled file",
        });
    }

    let updated = Upload::update(upload::ActiveModel {
        id: Set(upload.id.clone()),
        status: Set(UploadStatus::Completed),
        completed_at: Set(Some(now)),
        updated_at: Set(now),
        ..Default::default()
    })
    .exec(&txn)
    .await
    .map_err(ServerError::database_error)?;

    let mut images = Vec::new();
    if generate_variants {
        images.push(ensure_original_image(&txn, &updated, *assembled_size as i64).await?);
    }

    txn.commit().await.map_err(ServerError::database_error)?;

    storage.delete_prefix(&upload.chunk_prefix()).await?;

    tracing::info!(
        size = assembled_size,
        chunks = updated.total_chunks,
        "Upload completed and assembled"
    );

    let is_image = updated
        .mime_type
        .as_deref()
        .map(depot_mime::is_supported_image)
        .unwrap_or(false);

    if generate_variants && is_image {
        state.enqueue_job(Job::GenerateVariants {
            upload_id: updated.id.clone(),
        });
    }

    Ok((updated, images))
}

/// Reports the status of an upload session.
pub async fn status(state: &State, upload_id: &str) -> ServerResult<UploadStatusResponse> {
    let database = state.database().await?;
    let upload = database.find_upload(upload_id).await?;

    Ok(UploadStatusResponse {
        upload_id: upload.id.clone(),
        status: upload.status.to_string(),
        progress: upload.progress(),
        uploaded_chunks: upload.uploaded_chunks as u32,
        total_chunks: upload.total_chunks as u32,
        completed_at: upload.completed_at,
    })
}

/// Reports which chunks are still needed.
pub async fn resume(state: &State, upload_id: &str) -> ServerResult<ResumeUploadResponse> {
    let database = state.database().await?;
    let upload = database.find_upload(upload_id).await?;

    let can_resume = matches!(
        upload.status,
        UploadStatus::Pending | UploadStatus::Uploading
    );

    Ok(ResumeUploadResponse {
        can_resume,
        uploaded_chunks: upload.uploaded_chunk_set.0.iter().copied().collect(),
        missing_chunks: upload.missing_chunks(),
        progress: upload.progress(),
    })
}

/// Cancels an in-flight upload, reclaiming its chunks.
///
/// Returns false without touching anything if the upload does not
/// exist or has already reached a terminal state.
#[instrument(skip_all, fields(upload_id))]
pub async fn cancel(state: &State, upload_id: &str) -> ServerResult<bool> {
    let database = state.database().await?;
    let storage = state.storage().await?;

    let txn = database
        .begin()
        .await
        .map_err(ServerError::database_error)?;

    let upload = match database.find_and_lock_upload(&txn, upload_id).await {
        Ok(upload) => upload,
        Err(ServerError::NoSuchUpload) => return Ok(false),
        Err(e) => return Err(e),
    };

    if upload.status.is_terminal() {
        return Ok(false);
    }

    storage.delete_prefix(&upload.chunk_prefix()).await?;

    Upload::update(upload::ActiveModel {
        id: Set(upload.id.clone()),
        status: Set(UploadStatus::Cancelled),
        failure_reason: Set(Some("Cancelled".to_string())),
        updated_at: Set(Utc::now()),
        ..Default::default()
    })
    .exec(&txn)
    .await
    .map_err(ServerError::database_error)?;

    txn.commit().await.map_err(ServerError::database_error)?;

    tracing::info!("Upload cancelled");

    Ok(true)
}

/// Recomputes the assembled blob's checksum.
///
/// Only valid for completed uploads.
pub async fn verify_checksum(state: &State, upload_id: &str) -> ServerResult<bool> {
    let database = state.database().await?;
    let storage = state.storage().await?;

    let upload = database.find_upload(upload_id).await?;

    if upload.status != UploadStatus::Completed {
        return Err(ServerError::StateConflict {
            status: upload.status.to_string(),
        });
    }

    let mut file = File::open(storage.path_on_fs(&upload.blob_path()))
        .await
        .map_err(ServerError::storage_error)?;

    let (actual, _) = Hash::sha256_from_reader(&mut file)
        .await
        .map_err(ServerError::storage_error)?;

    let declared = Hash::from_hex(&upload.checksum_sha256)
        .map_err(|_| ServerError::InternalServerError)?;

    Ok(actual.verify(&declared))
}

/// Records the `original` image row for a freshly-completed upload.
///
/// Reuses an existing row for the `(upload, original)` pair.
pub(crate) async fn ensure_original_image<C: sea_orm::ConnectionTrait>(
    connection: &C,
    upload: &UploadModel,
    size_bytes: i64,
) -> ServerResult<ImageModel> {
    let existing = Image::find()
        .filter(image::Column::UploadId.eq(&upload.id))
        .filter(image::Column::Variant.eq(ImageVariant::Original))
        .one(connection)
        .await
        .map_err(ServerError::database_error)?;

    if let Some(existing) = existing {
        return Ok(existing);
    }

    let mime_type = upload
        .mime_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());

    image::ActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        upload_id: Set(upload.id.clone()),
        variant: Set(ImageVariant::Original),
        path: Set(upload.blob_path()),
        width: Set(None),
        height: Set(None),
        size_bytes: Set(size_bytes),
        mime_type: Set(mime_type),
        created_at: Set(Utc::now()),
    }
    .insert(connection)
    .await
    .map_err(ServerError::database_error)
}

/// Builds the per-chunk progress report.
fn chunk_receipt(upload: &UploadModel, chunk_index: u32) -> UploadChunkResponse {
    UploadChunkResponse {
        upload_id: upload.id.clone(),
        chunk_index,
        uploaded_chunks: upload.uploaded_chunks as u32,
        total_chunks: upload.total_chunks as u32,
        progress: upload.progress(),
        status: upload.status.to_string(),
    }
}

/// Exposes an image row over the API.
pub(crate) fn image_info(image: &ImageModel) -> ImageInfo {
    ImageInfo {
        id: image.id.clone(),
        upload_id: image.upload_id.clone(),
        variant: image.variant.to_string(),
        path: image.path.clone(),
        width: image.width.map(|w| w as u32),
        height: image.height.map(|h| h as u32),
        size_bytes: image.size_bytes as u64,
        mime_type: image.mime_type.clone(),
    }
}

/// Derives the durable blob name for a new session.
fn make_stored_filename(original_filename: &str, mime_type: Option<&str>) -> String {
    let from_name = original_filename
        .rsplit('.')
        .next()
        .filter(|ext| {
            ext.len() <= 10
                && !ext.is_empty()
                && ext.len() < original_filename.len()
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| ext.to_ascii_lowercase());

    let extension = from_name.or_else(|| {
        mime_type
            .and_then(depot_mime::ImageFormat::from_mime)
            .map(|f| f.extension().to_string())
    });

    match extension {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}

/// Streams chunk files in index order as one continuous reader.
///
/// Files are opened lazily so completing a 10,000-chunk upload does
/// not hold thousands of descriptors at once.
fn chunk_byte_stream(
    storage: Arc<Box<dyn StorageBackend>>,
    chunk_paths: Vec<String>,
) -> impl futures_core::Stream<Item = Result<Bytes, std::io::Error>> + Send {
    try_stream! {
        for path in chunk_paths {
            let fs_path = storage.path_on_fs(&path);
            let mut file = File::open(&fs_path).await?;
            let mut buf = vec![0u8; 65536];

            loop {
                let read = file.read(&mut buf).await?;
                if read == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..read]);
            }
        }
    }
}

fn concatenated_chunks(
    storage: Arc<Box<dyn StorageBackend>>,
    chunk_paths: Vec<String>,
) -> impl AsyncRead + Unpin + Send {
    StreamReader::new(Box::pin(chunk_byte_stream(storage, chunk_paths)))
}
