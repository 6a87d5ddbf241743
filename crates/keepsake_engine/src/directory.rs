//! A directory acting as the remote host.
//!
//! Layout: `<root>/manifest.json` and `<root>/chunks/<path>`. Every file is
//! written to a temporary name and renamed into place, so a reader never
//! sees a partial chunk or manifest.

use crate::error::{SyncError, SyncResult};
use crate::remote::{Manifest, RemoteBackend};
use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

const MANIFEST_FILE: &str = "manifest.json";
const CHUNK_DIR: &str = "chunks";

/// Remote backup storage in a local or mounted directory.
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    /// Uses `root` as the remote. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_path(&self, path: &str) -> SyncResult<PathBuf> {
        let relative = Path::new(path);
        let valid = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(SyncError::network_fatal(format!("invalid chunk path {path:?}")));
        }
        Ok(self.root.join(CHUNK_DIR).join(relative))
    }
}

fn io_error(context: &str, err: io::Error) -> SyncError {
    SyncError::network_retryable(format!("{context}: {err}"))
}

async fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut tmp = target.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).await?;
    tokio::io::AsyncWriteExt::write_all(&mut file, bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, target).await
}

#[async_trait]
impl RemoteBackend for DirectoryBackend {
    async fn upload_chunk(&self, path: &str, bytes: &[u8], _checksum: &str) -> SyncResult<String> {
        let target = self.chunk_path(path)?;
        write_atomic(&target, bytes)
            .await
            .map_err(|e| io_error(path, e))?;
        Ok(path.to_string())
    }

    async fn fetch_manifest(&self) -> SyncResult<Option<Manifest>> {
        match fs::read(self.root.join(MANIFEST_FILE)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| SyncError::integrity(format!("unreadable manifest: {e}"))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(MANIFEST_FILE, e)),
        }
    }

    async fn publish_manifest(&self, manifest: &Manifest) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(manifest)
            .map_err(|e| SyncError::network_fatal(format!("manifest encoding: {e}")))?;
        write_atomic(&self.root.join(MANIFEST_FILE), &bytes)
            .await
            .map_err(|e| io_error(MANIFEST_FILE, e))
    }

    async fn download_chunk(&self, path: &str) -> SyncResult<Vec<u8>> {
        match fs::read(self.chunk_path(path)?).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(SyncError::NotFound(path.to_string()))
            }
            Err(e) => Err(io_error(path, e)),
        }
    }

    async fn delete_chunk(&self, path: &str) -> SyncResult<()> {
        let target = self.chunk_path(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(path, e)),
        }
        // Drop the per-backup directory once it is empty.
        if let Some(parent) = target.parent() {
            if parent != self.root.join(CHUNK_DIR) {
                let _ = fs::remove_dir(parent).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::sha256_hex;
    use tempfile::tempdir;

    #[tokio::test]
    async fn chunks_and_manifest_persist() {
        let dir = tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path());

        assert_eq!(backend.fetch_manifest().await.unwrap(), None);

        let path = backend
            .upload_chunk("b1/00000", b"hello", &sha256_hex(b"hello"))
            .await
            .unwrap();
        let manifest = Manifest {
            format_version: 1,
            backup_id: "b1".into(),
            created_at: 1,
            total_size: 5,
            payload_checksum: sha256_hex(b"hello"),
            chunks: Vec::new(),
        };
        backend.publish_manifest(&manifest).await.unwrap();

        let reopened = DirectoryBackend::new(dir.path());
        assert_eq!(reopened.fetch_manifest().await.unwrap(), Some(manifest));
        assert_eq!(reopened.download_chunk(&path).await.unwrap(), b"hello");
        assert!(dir.path().join("chunks/b1/00000").exists());
    }

    #[tokio::test]
    async fn delete_removes_empty_backup_dir() {
        let dir = tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path());
        backend.upload_chunk("b1/00000", b"x", "").await.unwrap();

        backend.delete_chunk("b1/00000").await.unwrap();
        backend.delete_chunk("b1/00000").await.unwrap();
        assert!(!dir.path().join("chunks/b1").exists());
        assert!(matches!(
            backend.download_chunk("b1/00000").await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn escaping_paths_rejected() {
        let dir = tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path());
        for bad in ["../evil", "/etc/passwd", "", "a/../../b"] {
            assert!(backend.upload_chunk(bad, b"x", "").await.is_err(), "{bad}");
        }
    }
}
