//! A chunked upload session.

use std::collections::BTreeSet;

use sea_orm::entity::prelude::*;

use super::Json;

pub type UploadModel = Model;

/// The state of an upload.
#[derive(EnumIter, DeriveActiveEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(1))")]
pub enum UploadStatus {
    /// The upload has been initialized but no chunk has arrived.
    #[sea_orm(string_value = "P")]
    Pending,

    /// At least one chunk has been received.
    #[sea_orm(string_value = "U")]
    Uploading,

    /// All chunks were received and the assembled blob's checksum
    /// has been confirmed.
    #[sea_orm(string_value = "C")]
    Completed,

    /// The upload failed (checksum mismatch, storage error, or
    /// reclaimed by garbage collection).
    #[sea_orm(string_value = "F")]
    Failed,

    /// The upload was cancelled by the client.
    #[sea_orm(string_value = "X")]
    Cancelled,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true if no further state transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A chunked upload session.
///
/// The session exclusively owns its chunk blobs
/// (`chunks/<id>/chunk_<i>`) while pending or uploading, and the
/// assembled blob (`uploads/<stored_filename>`) once completed. The
/// chunk directory is deleted when the session reaches a terminal
/// state.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "upload")]
pub struct Model {
    /// Opaque unique ID of the upload session.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The file name as seen by the client.
    pub original_filename: String,

    /// Name of the assembled blob in storage.
    #[sea_orm(unique)]
    pub stored_filename: String,

    /// MIME type of the file, if declared by the client.
    pub mime_type: Option<String>,

    /// Total size of the file, in bytes.
    pub total_size: i64,

    /// Total number of chunks expected.
    pub total_chunks: i32,

    /// Number of distinct chunks received so far.
    ///
    /// Always equal to the cardinality of `uploaded_chunk_set`.
    pub uploaded_chunks: i32,

    /// The client-declared SHA-256 of the whole file, lowercased
    /// hexadecimal.
    #[sea_orm(indexed)]
    pub checksum_sha256: String,

    /// The state of the upload.
    pub status: UploadStatus,

    /// Set of chunk indices received so far.
    pub uploaded_chunk_set: Json<BTreeSet<u32>>,

    /// Why the upload failed or was cancelled.
    pub failure_reason: Option<String>,

    /// Timestamp when the assembled blob was confirmed.
    pub completed_at: Option<ChronoDateTimeUtc>,

    /// Timestamp when the session was created.
    pub created_at: ChronoDateTimeUtc,

    /// Timestamp of the last mutation.
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::image::Entity")]
    Image,
}

impl Related<super::image::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Image.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Percentage of chunks received, rounded to two decimals.
    pub fn progress(&self) -> f64 {
        if self.total_chunks <= 0 {
            return 0.0;
        }

        let raw = self.uploaded_chunks as f64 / self.total_chunks as f64 * 100.0;
        (raw * 100.0).round() / 100.0
    }

    /// Chunk indices not yet received, ascending.
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks as u32)
            .filter(|i| !self.uploaded_chunk_set.0.contains(i))
            .collect()
    }

    /// Storage prefix holding this upload's transient chunks.
    pub fn chunk_prefix(&self) -> String {
        format!("chunks/{}", self.id)
    }

    /// Storage path of one chunk.
    pub fn chunk_path(&self, index: u32) -> String {
        format!("chunks/{}/chunk_{}", self.id, index)
    }

    /// Storage path of the assembled blob.
    pub fn blob_path(&self) -> String {
        format!("uploads/{}", self.stored_filename)
    }
}
