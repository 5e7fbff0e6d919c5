//! Artifact types and configuration.

use kiln_core::ids::JobId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use kiln_core::wire::ArtifactInfo;

/// Artifact store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Directory holding artifact blobs.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// Largest accepted upload.
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/var/lib/kiln/artifacts")
}

fn default_max_artifact_bytes() -> u64 {
    512 * 1024 * 1024
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            max_artifact_bytes: default_max_artifact_bytes(),
        }
    }
}

/// Storage address of one artifact: the job, the attempt that produced it,
/// and the artifact name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub job_id: JobId,
    pub attempt: u32,
    pub name: String,
}

impl ArtifactKey {
    pub fn new(job_id: JobId, attempt: u32, name: impl Into<String>) -> Self {
        Self {
            job_id,
            attempt,
            name: name.into(),
        }
    }
}

/// Content written by a backend but not yet visible under its key.
#[derive(Debug)]
pub struct StagedArtifact {
    pub key: ArtifactKey,
    pub staging_path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
}
