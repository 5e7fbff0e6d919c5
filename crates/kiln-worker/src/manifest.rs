//! Typed view of osbuild manifests carried as job payloads.
//!
//! Stages and inputs are internally tagged on `"type"`, so decoding picks
//! the variant from the tag and an unknown tag is a decode error rather
//! than a silently ignored blob.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Invalid manifest: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unsupported manifest version {0:?}")]
    Version(String),
}

pub const MANIFEST_VERSION: &str = "2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    #[serde(default)]
    pub pipelines: Vec<Pipeline>,
    /// Source descriptions are passed through to the build tool untouched.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub sources: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Stage {
    /// Populates `/etc/passwd` and `/etc/group` from a commit so UIDs and
    /// GIDs stay stable across updates.
    #[serde(rename = "org.osbuild.ostree.passwd")]
    OstreePasswd {
        options: OstreePasswdOptions,
        inputs: OstreePasswdInputs,
    },
}

impl Stage {
    pub fn type_name(&self) -> &'static str {
        match self {
            Stage::OstreePasswd { .. } => "org.osbuild.ostree.passwd",
        }
    }

    pub fn ostree_passwd(options: OstreePasswdOptions, commit: impl Into<String>) -> Self {
        Stage::OstreePasswd {
            options,
            inputs: OstreePasswdInputs {
                tree: Input::ostree_checkout(vec![commit.into()]),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OstreePasswdOptions {
    /// Ref to create for the commit.
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    /// Parent commit id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OstreePasswdInputs {
    pub tree: Input,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Input {
    #[serde(rename = "org.osbuild.ostree.checkout")]
    OstreeCheckout {
        origin: InputOrigin,
        #[serde(default)]
        references: Vec<String>,
    },
}

impl Input {
    pub fn ostree_checkout(references: Vec<String>) -> Self {
        Input::OstreeCheckout {
            origin: InputOrigin::Source,
            references,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputOrigin {
    #[serde(rename = "org.osbuild.source")]
    Source,
    #[serde(rename = "org.osbuild.pipeline")]
    Pipeline,
}

impl Manifest {
    pub fn from_slice(payload: &[u8]) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_json::from_slice(payload)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(ManifestError::Version(manifest.version));
        }
        Ok(manifest)
    }

    pub fn stage_count(&self) -> usize {
        self.pipelines.iter().map(|p| p.stages.len()).sum()
    }
}
