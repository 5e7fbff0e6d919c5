//! Build execution.

use async_trait::async_trait;
use kiln_core::job::TerminalStatus;
use kiln_core::wire::LeaseResponse;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, warn};

use crate::config::ExecutorConfig;
use crate::manifest::Manifest;

/// A file produced by a build, uploaded under `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub name: String,
    pub content: Vec<u8>,
}

/// What a build produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub status: TerminalStatus,
    pub result: Value,
    pub artifacts: Vec<OutputArtifact>,
}

impl ExecutionOutcome {
    pub fn finished(result: Value) -> Self {
        Self {
            status: TerminalStatus::Finished,
            result,
            artifacts: vec![],
        }
    }

    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self {
            status: TerminalStatus::Failed,
            result: json!({ "error": message.to_string() }),
            artifacts: vec![],
        }
    }

    pub fn with_artifact(mut self, name: impl Into<String>, content: Vec<u8>) -> Self {
        self.artifacts.push(OutputArtifact {
            name: name.into(),
            content,
        });
        self
    }
}

/// Runs the build described by a leased job.
///
/// Build failures are reported through the outcome, not as errors. The
/// future may be dropped mid-way when the lease is lost.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    async fn execute(&self, lease: &LeaseResponse) -> ExecutionOutcome;
}

/// Executes manifests with an external build command.
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    async fn setup_workspace(&self, lease: &LeaseResponse) -> std::io::Result<PathBuf> {
        let workspace = self
            .config
            .work_dir
            .join(format!("{}-{}", lease.job_id.as_uuid(), lease.attempt));
        fs::create_dir_all(workspace.join("output")).await?;
        info!(path = %workspace.display(), "Workspace created");
        Ok(workspace)
    }

    async fn cleanup_workspace(&self, workspace: &Path) {
        if let Err(e) = fs::remove_dir_all(workspace).await {
            warn!(path = %workspace.display(), error = %e, "Failed to clean up workspace");
        }
    }

    fn render_args(&self, manifest: &Path, output: &Path) -> Vec<String> {
        let manifest = manifest.to_string_lossy();
        let output = output.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|arg| arg.replace("{manifest}", &manifest).replace("{output}", &output))
            .collect()
    }

    async fn run(&self, lease: &LeaseResponse, workspace: &Path) -> ExecutionOutcome {
        let manifest = match Manifest::from_slice(&lease.payload) {
            Ok(manifest) => manifest,
            Err(e) => return ExecutionOutcome::failed(e),
        };

        let manifest_path = workspace.join("manifest.json");
        let output_dir = workspace.join("output");
        if let Err(e) = fs::write(&manifest_path, &lease.payload).await {
            return ExecutionOutcome::failed(format!("Failed to write manifest: {e}"));
        }

        info!(
            job_id = %lease.job_id,
            attempt = lease.attempt,
            stages = manifest.stage_count(),
            program = %self.config.program,
            "Starting build"
        );

        let output = tokio::process::Command::new(&self.config.program)
            .args(self.render_args(&manifest_path, &output_dir))
            .current_dir(workspace)
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                error!(program = %self.config.program, error = %e, "Failed to start build command");
                return ExecutionOutcome::failed(format!("Failed to start build command: {e}"));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(job_id = %lease.job_id, code = ?output.status.code(), "Build command failed");
            return ExecutionOutcome {
                status: TerminalStatus::Failed,
                result: json!({
                    "error": "build command failed",
                    "exit_code": output.status.code(),
                    "stderr": tail(&stderr, 4096),
                }),
                artifacts: vec![],
            };
        }

        let artifacts = match collect_outputs(&output_dir).await {
            Ok(artifacts) => artifacts,
            Err(e) => return ExecutionOutcome::failed(format!("Failed to read build output: {e}")),
        };

        ExecutionOutcome {
            status: TerminalStatus::Finished,
            result: json!({
                "stages": manifest.stage_count(),
                "artifacts": artifacts.iter().map(|a| a.name.clone()).collect::<Vec<_>>(),
            }),
            artifacts,
        }
    }
}

#[async_trait]
impl BuildExecutor for CommandExecutor {
    async fn execute(&self, lease: &LeaseResponse) -> ExecutionOutcome {
        let workspace = match self.setup_workspace(lease).await {
            Ok(workspace) => workspace,
            Err(e) => return ExecutionOutcome::failed(format!("Failed to create workspace: {e}")),
        };

        let outcome = self.run(lease, &workspace).await;
        self.cleanup_workspace(&workspace).await;
        outcome
    }
}

/// Regular files under `dir`, named by their relative path with `-` between
/// components so every name is a single segment.
async fn collect_outputs(dir: &Path) -> std::io::Result<Vec<OutputArtifact>> {
    let mut files: Vec<(Vec<String>, PathBuf)> = vec![];
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().into_owned();
            // Leading dots are reserved by the artifact store.
            if file_name.starts_with('.') {
                warn!(path = %path.display(), "Skipping hidden build output");
                continue;
            }

            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let parts = path
                    .strip_prefix(dir)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push((parts, path));
            }
        }
    }

    files.sort();
    let mut seen = HashSet::new();
    let mut artifacts = vec![];
    for (parts, path) in files {
        let name = parts.join("-");
        if !seen.insert(name.clone()) {
            warn!(
                path = %path.display(),
                artifact = %name,
                "Build output name collides, skipping"
            );
            continue;
        }
        artifacts.push(OutputArtifact {
            name,
            content: fs::read(&path).await?,
        });
    }

    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(artifacts)
}

fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
