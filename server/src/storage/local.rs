//! Local file storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::{self, AsyncRead};
use uuid::Uuid;

use super::StorageBackend;
use crate::error::{ServerError, ServerResult};

#[derive(Debug)]
pub struct LocalBackend {
    config: LocalStorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    /// The directory to store all blobs under.
    pub path: PathBuf,
}

impl LocalBackend {
    pub async fn new(config: LocalStorageConfig) -> ServerResult<Self> {
        fs::create_dir_all(&config.path).await.map_err(|e| {
            ServerError::StorageError(anyhow::anyhow!(
                "Failed to create storage directory {}: {}",
                config.path.display(),
                e
            ))
        })?;

        Ok(Self { config })
    }

    fn get_path(&self, p: &str) -> PathBuf {
        self.config.path.join(p)
    }

    /// Picks a temporary sibling path so the final rename stays on
    /// one filesystem.
    fn get_tmp_path(&self, dest: &Path) -> PathBuf {
        let mut name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(&format!(".tmp-{}", Uuid::new_v4()));

        dest.with_file_name(name)
    }

    async fn prepare_parent(&self, dest: &Path) -> ServerResult<()> {
        let parent = dest.parent().ok_or_else(|| {
            ServerError::StorageError(anyhow::anyhow!(
                "Storage path {} has no parent",
                dest.display()
            ))
        })?;

        fs::create_dir_all(parent).await.map_err(|e| {
            ServerError::StorageError(anyhow::anyhow!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })
    }

    async fn commit_tmp(&self, tmp: &Path, dest: &Path) -> ServerResult<()> {
        if let Err(e) = fs::rename(tmp, dest).await {
            let _ = fs::remove_file(tmp).await;
            return Err(ServerError::StorageError(anyhow::anyhow!(
                "Failed to move {} to {}: {}",
                tmp.display(),
                dest.display(),
                e
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn put(&self, path: &str, data: &[u8]) -> ServerResult<()> {
        let dest = self.get_path(path);
        self.prepare_parent(&dest).await?;

        let tmp = self.get_tmp_path(&dest);
        if let Err(e) = fs::write(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(ServerError::storage_error(e));
        }

        self.commit_tmp(&tmp, &dest).await
    }

    async fn put_stream(
        &self,
        path: &str,
        mut stream: &mut (dyn AsyncRead + Unpin + Send),
    ) -> ServerResult<u64> {
        let dest = self.get_path(path);
        self.prepare_parent(&dest).await?;

        let tmp = self.get_tmp_path(&dest);
        let mut file = File::create(&tmp)
            .await
            .map_err(ServerError::storage_error)?;

        let written = match io::copy(&mut stream, &mut file).await {
            Ok(written) => written,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&tmp).await;
                return Err(ServerError::storage_error(e));
            }
        };

        file.sync_all().await.map_err(ServerError::storage_error)?;
        drop(file);

        self.commit_tmp(&tmp, &dest).await?;

        Ok(written)
    }

    async fn get(&self, path: &str) -> ServerResult<Vec<u8>> {
        fs::read(self.get_path(path))
            .await
            .map_err(ServerError::storage_error)
    }

    async fn exists(&self, path: &str) -> ServerResult<bool> {
        match fs::metadata(self.get_path(path)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ServerError::storage_error(e)),
        }
    }

    async fn delete(&self, path: &str) -> ServerResult<()> {
        fs::remove_file(self.get_path(path))
            .await
            .map_err(ServerError::storage_error)?;

        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> ServerResult<()> {
        match fs::remove_dir_all(self.get_path(prefix)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServerError::storage_error(e)),
        }
    }

    fn path_on_fs(&self, path: &str) -> PathBuf {
        self.get_path(path)
    }
}
