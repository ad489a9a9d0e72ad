//! Blob storage.

mod local;

use std::path::PathBuf;

use tokio::io::AsyncRead;

use crate::error::ServerResult;

pub(crate) use self::local::LocalBackend;
pub use self::local::LocalStorageConfig;

/// A path-keyed blob store.
///
/// Three prefixes are in use: `chunks/<upload_id>/chunk_<i>`
/// (transient), `uploads/<stored_filename>` (durable), and
/// `images/<variant>/<uuid>.<ext>` (durable).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Stores a whole object.
    ///
    /// The write is atomic to concurrent readers.
    async fn put(&self, path: &str, data: &[u8]) -> ServerResult<()>;

    /// Stores a whole object from a stream, returning the number of
    /// bytes written.
    ///
    /// The write is atomic to concurrent readers.
    async fn put_stream(
        &self,
        path: &str,
        stream: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ServerResult<u64>;

    /// Reads a whole object.
    async fn get(&self, path: &str) -> ServerResult<Vec<u8>>;

    /// Returns whether an object exists.
    async fn exists(&self, path: &str) -> ServerResult<bool>;

    /// Deletes an object.
    async fn delete(&self, path: &str) -> ServerResult<()>;

    /// Deletes all objects under a prefix.
    ///
    /// Safe to call repeatedly; a missing prefix is not an error.
    async fn delete_prefix(&self, prefix: &str) -> ServerResult<()>;

    /// Returns the filesystem path backing an object.
    fn path_on_fs(&self, path: &str) -> PathBuf;
}
