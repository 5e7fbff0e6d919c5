//! Artifact storage for Kiln.
//!
//! Uploads are accepted only from the current lease holder of a job and
//! become readable once the job has reached a terminal state.

pub mod backend;
pub mod keys;
pub mod store;
pub mod types;

pub use backend::{ArtifactBackend, FilesystemBackend};
pub use keys::validate_name;
pub use store::ArtifactStore;
pub use types::{ArtifactConfig, ArtifactInfo, ArtifactKey, StagedArtifact};
