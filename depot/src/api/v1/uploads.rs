//! Chunked upload endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to initialize a chunked upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeUploadRequest {
    /// The file name as seen by the client.
    pub original_filename: String,

    /// Total number of chunks the client will send.
    pub total_chunks: u32,

    /// Total size of the file, in bytes.
    pub total_size: u64,

    /// The SHA-256 checksum of the whole file, in hexadecimal.
    ///
    /// Uppercase input is accepted; the server stores it lowercased.
    pub checksum_sha256: String,

    /// MIME type of the file, if known.
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Response from initializing a chunked upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeUploadResponse {
    /// The upload session ID.
    pub upload_id: String,

    /// Current status of the upload.
    pub status: String,

    /// Total number of chunks expected.
    pub total_chunks: u32,

    /// Number of chunks received so far.
    ///
    /// Non-zero when initialization deduplicated against an
    /// existing completed upload.
    pub uploaded_chunks: u32,
}

/// Request carrying one chunk of an upload.
///
/// The chunk payload is base64-encoded inside the JSON body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadChunkRequest {
    /// The upload session ID.
    pub upload_id: String,

    /// Zero-based index of this chunk.
    pub chunk_index: u32,

    /// Total number of chunks, restated by the client.
    #[serde(default)]
    pub total_chunks: Option<u32>,

    /// Base64-encoded chunk payload.
    pub chunk_data: String,

    /// The SHA-256 checksum of the decoded chunk, in hexadecimal.
    pub checksum: String,

    /// The file name, restated by the client.
    #[serde(default)]
    pub original_filename: Option<String>,

    /// Decoded size of this chunk, restated by the client.
    #[serde(default)]
    pub chunk_size: Option<u64>,

    /// Total size of the file, restated by the client.
    #[serde(default)]
    pub total_size: Option<u64>,
}

/// Per-chunk progress report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadChunkResponse {
    pub upload_id: String,
    pub chunk_index: u32,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,

    /// Percentage of chunks received, rounded to two decimals.
    pub progress: f64,

    pub status: String,
}

/// Request to complete an upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteUploadRequest {
    /// Whether to generate resized image variants.
    #[serde(default = "default_generate_variants")]
    pub generate_variants: bool,
}

fn default_generate_variants() -> bool {
    true
}

/// Response from completing an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    pub upload_id: String,
    pub status: String,
    pub completed_at: Option<DateTime<Utc>>,

    /// Image records available at completion time.
    ///
    /// Resized variants are generated in the background and appear
    /// later.
    pub images: Vec<ImageInfo>,
}

/// Status of an upload session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub upload_id: String,
    pub status: String,
    pub progress: f64,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Resume information for a partial upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeUploadResponse {
    /// True iff the upload can still accept chunks.
    pub can_resume: bool,

    /// Chunk indices received so far, ascending.
    pub uploaded_chunks: Vec<u32>,

    /// Chunk indices still missing, ascending.
    pub missing_chunks: Vec<u32>,

    pub progress: f64,
}

/// Result of re-verifying a completed upload's checksum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyChecksumResponse {
    pub upload_id: String,
    pub checksum_valid: bool,
}

/// Result of cancelling an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelUploadResponse {
    pub upload_id: String,
    pub cancelled: bool,
}

/// A single image variant record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    pub upload_id: String,
    pub variant: String,
    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    pub size_bytes: u64,
    pub mime_type: String,
}
