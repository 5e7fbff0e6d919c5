//! Artifact storage backend trait and filesystem implementation.

use crate::types::{ArtifactInfo, ArtifactKey, StagedArtifact};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::ids::JobId;
use kiln_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

const STAGING_PREFIX: &str = ".staging-";

/// Trait for artifact storage backends.
///
/// Writes are two-phase: `stage` stores the bytes out of sight, `commit`
/// publishes them under their key in one step and `discard` throws them away.
#[async_trait]
pub trait ArtifactBackend: Send + Sync {
    /// Write `content` for `key` without making it visible.
    async fn stage(&self, key: &ArtifactKey, content: &[u8]) -> Result<StagedArtifact>;

    /// Publish staged content, replacing any previous content for the key.
    async fn commit(&self, staged: StagedArtifact) -> Result<ArtifactInfo>;

    /// Drop staged content.
    async fn discard(&self, staged: StagedArtifact) -> Result<()>;

    /// Read published content.
    async fn read(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>>;

    /// Published artifacts of one attempt of a job.
    async fn list(&self, job_id: JobId, attempt: u32) -> Result<Vec<ArtifactInfo>>;
}

/// Filesystem backend laid out as `<root>/<job>/<attempt>/<name>`.
pub struct FilesystemBackend {
    root_dir: PathBuf,
}

impl FilesystemBackend {
    pub fn new(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    fn attempt_dir(&self, job_id: JobId, attempt: u32) -> PathBuf {
        self.root_dir
            .join(job_id.as_uuid().to_string())
            .join(attempt.to_string())
    }

    fn key_path(&self, key: &ArtifactKey) -> PathBuf {
        self.attempt_dir(key.job_id, key.attempt).join(&key.name)
    }
}

fn storage_err(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Storage(format!("Failed to {} {}: {}", action, path.display(), e))
}

async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[async_trait]
impl ArtifactBackend for FilesystemBackend {
    async fn stage(&self, key: &ArtifactKey, content: &[u8]) -> Result<StagedArtifact> {
        let dir = self.attempt_dir(key.job_id, key.attempt);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_err("create", &dir, e))?;

        // Fixed-length name: the artifact name may already use all of NAME_MAX.
        let staging_path =
            dir.join(format!("{STAGING_PREFIX}{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&staging_path, content)
            .await
            .map_err(|e| storage_err("write", &staging_path, e))?;

        Ok(StagedArtifact {
            key: key.clone(),
            staging_path,
            size_bytes: content.len() as u64,
            sha256: hex::encode(Sha256::digest(content)),
        })
    }

    async fn commit(&self, staged: StagedArtifact) -> Result<ArtifactInfo> {
        let final_path = self.key_path(&staged.key);
        tokio::fs::rename(&staged.staging_path, &final_path)
            .await
            .map_err(|e| storage_err("publish", &final_path, e))?;

        Ok(ArtifactInfo {
            name: staged.key.name,
            size_bytes: staged.size_bytes,
            sha256: staged.sha256,
            stored_at: Utc::now(),
        })
    }

    async fn discard(&self, staged: StagedArtifact) -> Result<()> {
        match tokio::fs::remove_file(&staged.staging_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err("remove", &staged.staging_path, e)),
        }
    }

    async fn read(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(key);
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err("read", &path, e)),
        }
    }

    async fn list(&self, job_id: JobId, attempt: u32) -> Result<Vec<ArtifactInfo>> {
        let dir = self.attempt_dir(job_id, attempt);
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(storage_err("read", &dir, e)),
        };

        let mut entries = vec![];
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| storage_err("read", &dir, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(STAGING_PREFIX) {
                continue;
            }

            let path = entry.path();
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| storage_err("stat", &path, e))?;
            let stored_at: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            let sha256 = sha256_file(&path)
                .await
                .map_err(|e| storage_err("hash", &path, e))?;

            entries.push(ArtifactInfo {
                name,
                size_bytes: metadata.len(),
                sha256,
                stored_at,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

impl Default for FilesystemBackend {
    fn default() -> Self {
        Self::new(PathBuf::from("/var/lib/kiln/artifacts"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_staged_content_is_invisible_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path().to_path_buf());
        let key = ArtifactKey::new(JobId::new(), 1, "disk.qcow2");

        let staged = backend.stage(&key, b"image").await.unwrap();
        assert!(backend.read(&key).await.unwrap().is_none());
        assert!(backend.list(key.job_id, 1).await.unwrap().is_empty());

        let info = backend.commit(staged).await.unwrap();
        assert_eq!(info.size_bytes, 5);
        assert_eq!(backend.read(&key).await.unwrap().unwrap(), b"image".to_vec());

        let listed = backend.list(key.job_id, 1).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].sha256, info.sha256);
    }

    #[tokio::test]
    async fn test_discard_leaves_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path().to_path_buf());
        let key = ArtifactKey::new(JobId::new(), 1, "log.txt");

        let first = backend.stage(&key, b"first").await.unwrap();
        backend.commit(first).await.unwrap();
        let second = backend.stage(&key, b"second").await.unwrap();
        backend.discard(second).await.unwrap();

        assert_eq!(backend.read(&key).await.unwrap().unwrap(), b"first".to_vec());
    }

    #[tokio::test]
    async fn test_longest_valid_name_can_be_staged() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path().to_path_buf());
        let key = ArtifactKey::new(JobId::new(), 1, "a".repeat(crate::keys::MAX_NAME_LEN));

        let staged = backend.stage(&key, b"x").await.unwrap();
        backend.commit(staged).await.unwrap();
        assert_eq!(backend.read(&key).await.unwrap().unwrap(), b"x".to_vec());
    }

    #[tokio::test]
    async fn test_attempts_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path().to_path_buf());
        let job_id = JobId::new();

        let staged = backend
            .stage(&ArtifactKey::new(job_id, 1, "disk.raw"), b"a1")
            .await
            .unwrap();
        backend.commit(staged).await.unwrap();

        let second = ArtifactKey::new(job_id, 2, "disk.raw");
        assert!(backend.read(&second).await.unwrap().is_none());
    }
}
