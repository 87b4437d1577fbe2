use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::pipeline::sandbox::SandboxConfig;

/// Runtime configuration for Soot.
///
/// Everything is environment-driven (a `.env` file is honored via dotenvy
/// in `main`), with sandbox resource limits loadable from
/// `.soot/sandbox.toml`. Only effects are configured here — the pipeline
/// reads behavior flags, the gateway reads nothing beyond its bind port.
#[derive(Debug, Clone)]
pub struct SootConfig {
    /// Repository used by `run_fix_default_repo`.
    pub default_repo_url: String,
    /// GitHub token for authenticated clone, push, and PR creation.
    /// Optional so that read-only analysis runs work without one.
    pub github_token: Option<String>,
    /// Event-ingestion URL; unset disables webhook emission entirely.
    pub event_webhook_url: Option<String>,
    /// Size of the concurrency token pool (the sole admission control).
    pub max_concurrent: usize,
    /// Return immediately and report progress via events only.
    pub run_in_background: bool,
    /// Enable the preview + browser-check validation pass.
    pub run_smoke_test: bool,
    /// Coding-agent executable invoked inside the sandbox.
    pub agent_cmd: String,
    /// Forwarded into the sandbox for the agent.
    pub anthropic_api_key: Option<String>,
    /// Preview URL template with a `{branch}` placeholder.
    pub preview_url_template: Option<String>,
    /// How long to wait for a preview to become ready.
    pub preview_timeout: Duration,
    /// Browser-check service endpoint; unset skips the check.
    pub validation_endpoint: Option<String>,
    /// Sandbox container resources.
    pub sandbox: SandboxConfig,
}

const DEFAULT_REPO_URL: &str = "https://github.com/soot-dev/sample-repo";
const DEFAULT_MAX_CONCURRENT: usize = 3;
const DEFAULT_PREVIEW_TIMEOUT_SECS: u64 = 180;

impl Default for SootConfig {
    fn default() -> Self {
        Self {
            default_repo_url: DEFAULT_REPO_URL.to_string(),
            github_token: None,
            event_webhook_url: None,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            run_in_background: false,
            run_smoke_test: false,
            agent_cmd: "claude".to_string(),
            anthropic_api_key: None,
            preview_url_template: None,
            preview_timeout: Duration::from_secs(DEFAULT_PREVIEW_TIMEOUT_SECS),
            validation_endpoint: None,
            sandbox: SandboxConfig::default(),
        }
    }
}

impl SootConfig {
    /// Build the configuration from the process environment, reading
    /// sandbox resources from `.soot/sandbox.toml` under `project_dir`
    /// when present.
    pub fn from_env(project_dir: &Path) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            default_repo_url: env_var("SOOT_DEFAULT_REPO_URL")
                .unwrap_or(defaults.default_repo_url),
            github_token: env_var("GITHUB_TOKEN"),
            event_webhook_url: env_var("SOOT_EVENT_WEBHOOK_URL"),
            max_concurrent: env_parse("RUN_FIX_MAX_CONCURRENT", defaults.max_concurrent)?,
            run_in_background: env_flag("RUN_FIX_IN_BACKGROUND"),
            run_smoke_test: env_flag("RUN_FIX_SMOKE_TEST"),
            agent_cmd: env_var("AGENT_CMD").unwrap_or(defaults.agent_cmd),
            anthropic_api_key: env_var("ANTHROPIC_API_KEY"),
            preview_url_template: env_var("SOOT_PREVIEW_URL_TEMPLATE"),
            preview_timeout: Duration::from_secs(env_parse(
                "SOOT_PREVIEW_TIMEOUT_SECS",
                DEFAULT_PREVIEW_TIMEOUT_SECS,
            )?),
            validation_endpoint: env_var("SOOT_VALIDATION_ENDPOINT"),
            sandbox: SandboxConfig::load(project_dir)?,
        })
    }

    /// Token required for anything that pushes; analysis runs do not call this.
    pub fn require_github_token(&self) -> Result<&str, ConfigError> {
        self.github_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingVar {
                name: "GITHUB_TOKEN",
            })
    }

    /// Resolve the preview URL for a branch, if a template is configured.
    pub fn preview_url_for(&self, branch: &str) -> Option<String> {
        self.preview_url_template
            .as_ref()
            .map(|t| t.replace("{branch}", &branch.replace('/', "-")))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Truthy values: "1", "true", "yes" (case-insensitive). Anything else,
/// including unset, is false.
fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn env_parse<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::InvalidVar {
            name,
            value: raw,
            message: e.to_string(),
        }),
    }
}
