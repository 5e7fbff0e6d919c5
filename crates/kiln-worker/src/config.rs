//! Worker configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Base URL of the Kiln server.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Architecture advertised when polling.
    #[serde(default = "default_arch")]
    pub arch: String,
    /// Job types this worker can build.
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub poll: PollConfig,
    /// Seconds between lease renewals. Keep well under the lease duration.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Poll cadence when no work is available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

/// External build command.
///
/// The payload is written to `<work_dir>/<job>/manifest.json`; the command
/// runs with `{manifest}` and `{output}` substituted in its arguments and
/// every regular file left in the output directory is uploaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_server_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_arch() -> String {
    std::env::consts::ARCH.to_string()
}

fn default_heartbeat_interval() -> u64 {
    3
}

fn default_request_timeout() -> u64 {
    30
}

fn default_initial_interval() -> u64 {
    1000
}

fn default_max_interval() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_program() -> String {
    "osbuild".to_string()
}

fn default_args() -> Vec<String> {
    vec![
        "--output-directory".to_string(),
        "{output}".to_string(),
        "{manifest}".to_string(),
    ]
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/var/lib/kiln/worker")
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            arch: default_arch(),
            types: vec![],
            poll: PollConfig::default(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            request_timeout_secs: default_request_timeout(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval(),
            max_interval_ms: default_max_interval(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            work_dir: default_work_dir(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_partial_yaml() {
        let config: WorkerConfig = serde_yaml::from_str(
            "server_url: http://kiln:8080\ntypes: [qemu, ami]\npoll:\n  max_interval_ms: 5000\n",
        )
        .unwrap();

        assert_eq!(config.server_url, "http://kiln:8080");
        assert_eq!(config.types, vec!["qemu", "ami"]);
        assert_eq!(config.arch, std::env::consts::ARCH);
        assert_eq!(config.poll.initial_interval_ms, 1000);
        assert_eq!(config.poll.max_interval_ms, 5000);
        assert_eq!(config.heartbeat_interval_secs, 3);
        assert_eq!(config.executor.program, "osbuild");
    }
}
