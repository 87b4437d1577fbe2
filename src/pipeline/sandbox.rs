use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, RemoveContainerOptions, StartContainerOptions,
};
use futures_util::StreamExt;
use serde::Deserialize;

use crate::errors::ConfigError;

/// Image used when `.soot/sandbox.toml` does not name one.
const DEFAULT_IMAGE: &str = "soot/agent-sandbox:latest";

/// Output of one command executed inside a sandbox.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An isolated, ephemeral execution environment. The pipeline only ever
/// talks to this interface; the concrete provider is a collaborator.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run a command to completion, capturing combined output.
    async fn exec(
        &self,
        cmd: Vec<String>,
        workdir: Option<String>,
        env: Vec<(String, String)>,
    ) -> Result<ExecOutput>;

    /// Tear the environment down. Idempotent from the caller's view.
    async fn terminate(&self) -> Result<()>;
}

/// Provisions sandboxes. One sandbox per job, never shared.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn provision(&self, config: &SandboxConfig) -> Result<Box<dyn Sandbox>>;
}

/// Resource configuration for a sandbox container.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub image: Option<String>,
    pub memory: String,
    pub cpus: f64,
    /// Wall-clock ceiling for the agent command, in seconds.
    pub timeout: u64,
    pub env: HashMap<String, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: None,
            memory: "4g".to_string(),
            cpus: 2.0,
            timeout: 600,
            env: HashMap::new(),
        }
    }
}

/// Raw TOML structure for `.soot/sandbox.toml`
#[derive(Debug, Deserialize)]
struct SandboxToml {
    sandbox: Option<SandboxSection>,
}

#[derive(Debug, Deserialize)]
struct SandboxSection {
    image: Option<String>,
    memory: Option<String>,
    cpus: Option<f64>,
    timeout: Option<u64>,
    env: Option<HashMap<String, String>>,
}

impl SandboxConfig {
    /// Load sandbox config from `.soot/sandbox.toml` in the project
    /// directory. Returns defaults if the file doesn't exist.
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = project_dir.join(".soot").join("sandbox.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(&config_path).map_err(|source| ConfigError::SandboxRead {
                path: config_path.clone(),
                source,
            })?;

        let toml: SandboxToml =
            toml::from_str(&content).map_err(|source| ConfigError::SandboxParse {
                path: config_path,
                source,
            })?;

        let mut config = Self::default();
        if let Some(section) = toml.sandbox {
            if let Some(image) = section.image {
                config.image = Some(image);
            }
            if let Some(memory) = section.memory {
                config.memory = memory;
            }
            if let Some(cpus) = section.cpus {
                config.cpus = cpus;
            }
            if let Some(timeout) = section.timeout {
                config.timeout = timeout;
            }
            if let Some(env) = section.env {
                config.env = env;
            }
        }

        Ok(config)
    }
}

/// Parse a human memory size ("4g", "512m", "1024") into bytes.
fn parse_memory_bytes(s: &str) -> Option<i64> {
    let s = s.trim().to_lowercase();
    let (digits, multiplier) = match s.chars().last()? {
        'g' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        'm' => (&s[..s.len() - 1], 1024 * 1024),
        'k' => (&s[..s.len() - 1], 1024),
        _ => (s.as_str(), 1),
    };
    digits.parse::<i64>().ok().map(|n| n * multiplier)
}

// ── Docker provider ──────────────────────────────────────────────────

/// Provisions Docker containers over the local daemon socket.
pub struct DockerProvider {
    docker: Docker,
}

impl DockerProvider {
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl SandboxProvider for DockerProvider {
    async fn provision(&self, config: &SandboxConfig) -> Result<Box<dyn Sandbox>> {
        let image = config.image.clone().unwrap_or_else(|| DEFAULT_IMAGE.to_string());

        // Pull the image if the daemon doesn't have it yet. Progress
        // messages are discarded; only a hard failure aborts.
        let mut pull = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: Some(image.clone()),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = pull.next().await {
            progress.with_context(|| format!("Failed to pull sandbox image {}", image))?;
        }

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let body = ContainerCreateBody {
            image: Some(image),
            // Keep the container alive; all work happens via exec.
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            env: Some(env),
            host_config: Some(HostConfig {
                memory: parse_memory_bytes(&config.memory),
                nano_cpus: Some((config.cpus * 1_000_000_000.0) as i64),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions>, body)
            .await
            .context("Failed to create sandbox container")?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions>)
            .await
            .context("Failed to start sandbox container")?;

        tracing::debug!(container_id = %created.id, "Sandbox container started");

        Ok(Box::new(DockerSandbox {
            docker: self.docker.clone(),
            container_id: created.id,
        }))
    }
}

/// One running sandbox container.
pub struct DockerSandbox {
    docker: Docker,
    container_id: String,
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn exec(
        &self,
        cmd: Vec<String>,
        workdir: Option<String>,
        env: Vec<(String, String)>,
    ) -> Result<ExecOutput> {
        let env: Vec<String> = env.into_iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        let exec = self
            .docker
            .create_exec(
                &self.container_id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    env: if env.is_empty() { None } else { Some(env) },
                    working_dir: workdir,
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .context("Failed to create exec in sandbox")?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .context("Failed to start exec in sandbox")?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk.context("Sandbox exec stream error")? {
                        bollard::container::LogOutput::StdOut { message } => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        bollard::container::LogOutput::StdErr { message } => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .context("Failed to inspect exec in sandbox")?;

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code: inspect.exit_code.unwrap_or(-1),
        })
    }

    async fn terminate(&self) -> Result<()> {
        self.docker
            .remove_container(
                &self.container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .context("Failed to remove sandbox container")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_sandbox_config_defaults() {
        let config = SandboxConfig::default();
        assert!(config.image.is_none());
        assert_eq!(config.memory, "4g");
        assert_eq!(config.cpus, 2.0);
        assert_eq!(config.timeout, 600);
        assert!(config.env.is_empty());
    }

    #[test]
    fn test_sandbox_config_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::load(dir.path()).unwrap();
        assert!(config.image.is_none());
        assert_eq!(config.memory, "4g");
    }

    #[test]
    fn test_sandbox_config_load_full() {
        let dir = tempfile::tempdir().unwrap();
        let soot_dir = dir.path().join(".soot");
        fs::create_dir_all(&soot_dir).unwrap();
        fs::write(
            soot_dir.join("sandbox.toml"),
            r#"
[sandbox]
image = "node:22-slim"
memory = "8g"
cpus = 4.0
timeout = 900

[sandbox.env]
NODE_ENV = "production"
"#,
        )
        .unwrap();

        let config = SandboxConfig::load(dir.path()).unwrap();
        assert_eq!(config.image.as_deref(), Some("node:22-slim"));
        assert_eq!(config.memory, "8g");
        assert_eq!(config.cpus, 4.0);
        assert_eq!(config.timeout, 900);
        assert_eq!(config.env.get("NODE_ENV").unwrap(), "production");
    }

    #[test]
    fn test_sandbox_config_load_partial() {
        let dir = tempfile::tempdir().unwrap();
        let soot_dir = dir.path().join(".soot");
        fs::create_dir_all(&soot_dir).unwrap();
        fs::write(
            soot_dir.join("sandbox.toml"),
            r#"
[sandbox]
image = "python:3.12-slim"
"#,
        )
        .unwrap();

        let config = SandboxConfig::load(dir.path()).unwrap();
        assert_eq!(config.image.as_deref(), Some("python:3.12-slim"));
        assert_eq!(config.memory, "4g"); // default
        assert_eq!(config.cpus, 2.0); // default
    }

    #[test]
    fn test_sandbox_config_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let soot_dir = dir.path().join(".soot");
        fs::create_dir_all(&soot_dir).unwrap();
        fs::write(soot_dir.join("sandbox.toml"), "not valid toml {{{{").unwrap();

        assert!(SandboxConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_parse_memory_bytes() {
        assert_eq!(parse_memory_bytes("4g"), Some(4 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("64k"), Some(64 * 1024));
        assert_eq!(parse_memory_bytes("1048576"), Some(1048576));
        assert_eq!(parse_memory_bytes("lots"), None);
    }

    #[test]
    fn test_exec_output_success() {
        assert!(ExecOutput::default().success());
        assert!(
            !ExecOutput {
                exit_code: 1,
                ..Default::default()
            }
            .success()
        );
    }
}
