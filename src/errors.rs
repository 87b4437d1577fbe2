//! Typed error hierarchy for the Soot orchestrator.
//!
//! Two top-level enums cover the two fallible subsystems:
//! - `PipelineError` — terminal failures of a fix job, returned to the caller
//! - `ConfigError` — environment / sandbox-config parsing failures
//!
//! Validation problems, webhook delivery failures, and broadcast send
//! failures are deliberately NOT represented here: they are recovered
//! locally and logged, never surfaced to the job caller.

use thiserror::Error;

/// Terminal failures of a fix job. There is no retry anywhere in the
/// pipeline — a failed job must be resubmitted with a fresh id.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Sandbox provisioning failed: {message}")]
    Provisioning {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Agent exited with code {exit_code}")]
    AgentExecution {
        exit_code: i64,
        stdout: String,
        stderr: String,
    },

    #[error("Integration failed on branch {branch}: {message}")]
    Integration {
        message: String,
        branch: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Invalid repository URL: {0}")]
    InvalidRepoUrl(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::Provisioning {
            message: message.into(),
            source: None,
        }
    }

    pub fn provisioning_with(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Provisioning {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn integration(message: impl Into<String>, branch: impl Into<String>) -> Self {
        Self::Integration {
            message: message.into(),
            branch: branch.into(),
            source: None,
        }
    }
}

/// Errors from environment and sandbox-config parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {name}")]
    MissingVar { name: &'static str },

    #[error("Invalid value '{value}' for {name}: {message}")]
    InvalidVar {
        name: &'static str,
        value: String,
        message: String,
    },

    #[error("Failed to read sandbox config at {path}: {source}")]
    SandboxRead {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse sandbox config at {path}: {source}")]
    SandboxParse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
