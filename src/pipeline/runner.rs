use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, anyhow};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::SootConfig;
use crate::errors::PipelineError;
use crate::event::{LifecycleEvent, MAX_SLOT, MIN_SLOT};

use super::github::{
    CodeHost, GitHubClient, PullRequestSpec, authenticated_clone_url, parse_owner_repo_from_url,
};
use super::job::{AnalysisOutcome, FixOutcome, Job, JobOptions, JobStage};
use super::sandbox::{DockerProvider, ExecOutput, Sandbox, SandboxProvider};
use super::validation::{SmokeTester, ValidationOutcome};
use super::webhook::{ProgressReporter, WebhookEmitter};

const CLONE_TIMEOUT: Duration = Duration::from_secs(120);
const PUSH_TIMEOUT: Duration = Duration::from_secs(120);

const GIT_USER_NAME: &str = "Soot Agent";
const GIT_USER_EMAIL: &str = "agent@soot.dev";
const REPO_DIR: &str = "/repo";

/// Convert an instruction to a branch-safe slug, limited to `max_len`
/// characters.
pub fn slugify(text: &str, max_len: usize) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    slug.chars()
        .take(max_len)
        .collect::<String>()
        .trim_end_matches('-')
        .to_string()
}

/// Hands out observer slots 1..=9, round-robin. Slots are a display
/// identity, not a resource: more concurrent jobs than slots simply reuse
/// them, which observers handle via the full-reset semantics of
/// `agent_created`.
struct SlotCycle {
    next: AtomicUsize,
}

impl SlotCycle {
    fn new() -> Self {
        Self {
            next: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> u8 {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        (n % MAX_SLOT as usize) as u8 + MIN_SLOT
    }
}

/// Handle returned for background submissions.
pub struct JobHandle {
    pub job_id: Uuid,
    pub slot: u8,
    pub join: JoinHandle<Result<FixOutcome, PipelineError>>,
}

/// Orchestrates fix jobs: admission through the concurrency token pool,
/// sandbox provisioning, agent execution, integration, and optional
/// validation, with progress reported as fire-and-forget lifecycle
/// events.
///
/// The semaphore is the only shared mutable state between jobs (plus the
/// atomic slot counter); each job owns its sandbox exclusively.
pub struct FixRunner {
    config: SootConfig,
    semaphore: Arc<Semaphore>,
    slots: SlotCycle,
    reporter: Arc<dyn ProgressReporter>,
    sandboxes: Arc<dyn SandboxProvider>,
    host: Arc<dyn CodeHost>,
    smoke: SmokeTester,
}

impl FixRunner {
    /// Wire up the real collaborators: Docker sandboxes, the GitHub REST
    /// host, and the webhook emitter.
    pub fn new(config: SootConfig) -> anyhow::Result<Self> {
        let provider = Arc::new(DockerProvider::new()?);
        let host = Arc::new(GitHubClient::new(
            config.github_token.clone().unwrap_or_default(),
        ));
        let reporter = Arc::new(WebhookEmitter::new(config.event_webhook_url.clone()));
        Ok(Self::with_collaborators(config, provider, host, reporter))
    }

    /// Full dependency injection, used by tests and embedders.
    pub fn with_collaborators(
        config: SootConfig,
        sandboxes: Arc<dyn SandboxProvider>,
        host: Arc<dyn CodeHost>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        let smoke = SmokeTester::new(config.preview_timeout, config.validation_endpoint.clone());
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            slots: SlotCycle::new(),
            reporter,
            sandboxes,
            host,
            smoke,
            config,
        }
    }

    pub fn config(&self) -> &SootConfig {
        &self.config
    }

    /// Run a fix to completion. Blocks (asynchronously) while the token
    /// pool is exhausted — the pool is the system's sole admission
    /// control.
    pub async fn run_fix(
        &self,
        instruction: &str,
        repo_url: &str,
        options: JobOptions,
    ) -> Result<FixOutcome, PipelineError> {
        let job = Job::new(instruction, repo_url, self.slots.next());
        self.run_job(job, options).await
    }

    /// Convenience wrapper over the configured default repository, with
    /// options resolved from config.
    pub async fn run_fix_default_repo(
        &self,
        instruction: &str,
    ) -> Result<FixOutcome, PipelineError> {
        let repo_url = self.config.default_repo_url.clone();
        let options = JobOptions {
            run_in_background: false,
            run_smoke_test: self.config.run_smoke_test,
        };
        self.run_fix(instruction, &repo_url, options).await
    }

    /// Queue a fix and return immediately. The permit is acquired inside
    /// the spawned task, so an exhausted pool delays the job, not the
    /// caller.
    pub fn spawn_fix(
        self: Arc<Self>,
        instruction: &str,
        repo_url: &str,
        options: JobOptions,
    ) -> JobHandle {
        let job = Job::new(instruction, repo_url, self.slots.next());
        let job_id = job.id;
        let slot = job.slot;
        let join = tokio::spawn(async move { self.run_job(job, options).await });
        JobHandle { job_id, slot, join }
    }

    /// Read-only variant: runs the agent against a clone and returns its
    /// transcript. No branch, no push, no PR.
    pub async fn run_analysis(
        &self,
        instruction: &str,
        repo_url: Option<&str>,
    ) -> Result<AnalysisOutcome, PipelineError> {
        let repo_url = repo_url.unwrap_or(&self.config.default_repo_url).to_string();
        let owner_repo = parse_owner_repo_from_url(&repo_url)
            .ok_or_else(|| PipelineError::InvalidRepoUrl(repo_url.clone()))?;

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow!("Concurrency pool closed"))?;
        let _permit = permit; // Held until the job reaches a terminal stage

        let mut job = Job::new(instruction, &repo_url, self.slots.next());
        self.reporter.report(&LifecycleEvent::AgentCreated {
            agent_id: job.slot,
            task_name: task_label(instruction),
        });
        job.advance(JobStage::Provisioning);

        let sandbox = self
            .sandboxes
            .provision(&self.config.sandbox)
            .await
            .map_err(|e| PipelineError::provisioning_with("Sandbox creation failed", e))?;

        let result = self.analyze_in(&mut job, sandbox.as_ref(), &owner_repo).await;
        self.teardown(sandbox.as_ref()).await;
        job.advance(match result {
            Ok(_) => JobStage::Succeeded,
            Err(_) => JobStage::Failed,
        });
        result
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn run_job(&self, job: Job, options: JobOptions) -> Result<FixOutcome, PipelineError> {
        // Everything that pushes needs the token, so fail before taking
        // a permit or provisioning anything.
        let token = self
            .config
            .require_github_token()
            .map_err(|e| PipelineError::Other(e.into()))?
            .to_string();
        let owner_repo = parse_owner_repo_from_url(&job.repo_url)
            .ok_or_else(|| PipelineError::InvalidRepoUrl(job.repo_url.clone()))?;

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow!("Concurrency pool closed"))?;
        let _permit = permit; // Held until the job reaches a terminal stage

        let mut job = job;
        tracing::info!(job_id = %job.id, slot = job.slot, repo = %job.repo_url, "Fix job admitted");
        self.reporter.report(&LifecycleEvent::AgentCreated {
            agent_id: job.slot,
            task_name: task_label(&job.instruction),
        });
        job.advance(JobStage::Provisioning);

        let sandbox = self
            .sandboxes
            .provision(&self.config.sandbox)
            .await
            .map_err(|e| PipelineError::provisioning_with("Sandbox creation failed", e))?;

        let result = self
            .execute(&mut job, sandbox.as_ref(), &owner_repo, &token, options)
            .await;
        self.teardown(sandbox.as_ref()).await;

        job.advance(match result {
            Ok(_) => JobStage::Succeeded,
            Err(_) => JobStage::Failed,
        });
        match &result {
            Ok(outcome) => {
                tracing::info!(job_id = %job.id, pr_url = ?outcome.pr_url, "Fix job succeeded")
            }
            Err(e) => tracing::error!(job_id = %job.id, error = %e, "Fix job failed"),
        }
        result
    }

    async fn execute(
        &self,
        job: &mut Job,
        sandbox: &dyn Sandbox,
        owner_repo: &str,
        token: &str,
        options: JobOptions,
    ) -> Result<FixOutcome, PipelineError> {
        // ── Provisioning: clone, identity, working branch ────────────
        let clone_url = authenticated_clone_url(owner_repo, token);
        let clone = timeout(
            CLONE_TIMEOUT,
            sandbox.exec(
                vec!["git".into(), "clone".into(), clone_url, REPO_DIR.into()],
                None,
                vec![],
            ),
        )
        .await
        .map_err(|_| PipelineError::provisioning("Clone timed out"))?
        .map_err(|e| PipelineError::provisioning_with("Clone failed", e))?;
        if !clone.success() {
            return Err(PipelineError::provisioning(format!(
                "Clone failed: {}",
                clone.stderr.trim()
            )));
        }

        let base = self
            .git(sandbox, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .map(|out| out.stdout.trim().to_string())
            .unwrap_or_default();
        let base = if base.is_empty() { "main".to_string() } else { base };

        for args in [
            vec!["config", "user.name", GIT_USER_NAME],
            vec!["config", "user.email", GIT_USER_EMAIL],
        ] {
            self.git(sandbox, &args)
                .await
                .map_err(|e| PipelineError::provisioning_with("Git identity setup failed", e))?;
        }

        let branch = branch_name_for(&job.instruction, job.created_at.timestamp());
        let checkout = self
            .git(sandbox, &["checkout", "-b", &branch])
            .await
            .map_err(|e| PipelineError::provisioning_with("Branch creation failed", e))?;
        if !checkout.success() {
            return Err(PipelineError::provisioning(format!(
                "Branch creation failed: {}",
                checkout.stderr.trim()
            )));
        }

        // ── Executing: the coding agent ──────────────────────────────
        self.reporter
            .report(&LifecycleEvent::AgentStartWorking { agent_id: job.slot });
        job.advance(JobStage::Executing);

        let agent = self.run_agent(sandbox, &job.instruction).await?;
        let agent_output = agent.stdout;

        // ── No-change short-circuit ──────────────────────────────────
        let diff = self.git(sandbox, &["diff", "--stat"]).await;
        let status = self.git(sandbox, &["status", "--porcelain"]).await;
        let untouched = matches!(&diff, Ok(d) if d.stdout.trim().is_empty())
            && matches!(&status, Ok(s) if s.stdout.trim().is_empty());
        if untouched {
            tracing::info!(job_id = %job.id, "Agent completed but made no file changes");
            self.reporter.report(&LifecycleEvent::AgentStartTesting {
                agent_id: job.slot,
                preview_link: String::new(),
                validation_link: String::new(),
            });
            return Ok(FixOutcome {
                pr_url: None,
                branch,
                output: agent_output,
                preview_link: String::new(),
                validation_link: String::new(),
            });
        }

        // ── Integrating: commit, push, pull request ──────────────────
        job.advance(JobStage::Integrating);

        self.git(sandbox, &["add", "-A"])
            .await
            .map_err(|e| PipelineError::Integration {
                message: "Staging failed".to_string(),
                branch: branch.clone(),
                source: Some(e),
            })?;

        let commit_msg = format!("fix: {}", task_label(&job.instruction));
        let commit = self
            .git(sandbox, &["commit", "-m", &commit_msg])
            .await
            .map_err(|e| PipelineError::Integration {
                message: "Commit failed".to_string(),
                branch: branch.clone(),
                source: Some(e),
            })?;
        if !commit.success() {
            return Err(PipelineError::integration(
                format!("Commit failed: {}", commit.stderr.trim()),
                branch,
            ));
        }

        let push = timeout(
            PUSH_TIMEOUT,
            sandbox.exec(
                vec!["git".into(), "push".into(), "origin".into(), branch.clone()],
                Some(REPO_DIR.into()),
                vec![],
            ),
        )
        .await
        .map_err(|_| PipelineError::integration("Push timed out", branch.clone()))?
        .map_err(|e| PipelineError::Integration {
            message: "Push failed".to_string(),
            branch: branch.clone(),
            source: Some(e),
        })?;
        if !push.success() {
            return Err(PipelineError::integration(
                format!("Push failed: {}", push.stderr.trim()),
                branch,
            ));
        }

        let spec = PullRequestSpec {
            owner_repo: owner_repo.to_string(),
            branch: branch.clone(),
            base,
            title: format!("soot-fix: {}", task_label(&job.instruction)),
            body: pr_body(&job.instruction),
        };
        let pr_url = self
            .host
            .open_pull_request(&spec)
            .await
            .map_err(|e| PipelineError::Integration {
                // The branch survives even when the PR does not.
                message: format!("Changes pushed to {} but PR creation failed", branch),
                branch: branch.clone(),
                source: Some(e),
            })?;

        // ── Validating (optional, never fails the job) ───────────────
        let validation = if options.run_smoke_test {
            job.advance(JobStage::Validating);
            self.smoke.run(self.config.preview_url_for(&branch)).await
        } else {
            ValidationOutcome::default()
        };

        self.reporter.report(&LifecycleEvent::AgentStartTesting {
            agent_id: job.slot,
            preview_link: validation.preview_link.clone(),
            validation_link: validation.validation_link.clone(),
        });

        Ok(FixOutcome {
            pr_url: Some(pr_url),
            branch,
            output: agent_output,
            preview_link: validation.preview_link,
            validation_link: validation.validation_link,
        })
    }

    async fn analyze_in(
        &self,
        job: &mut Job,
        sandbox: &dyn Sandbox,
        owner_repo: &str,
    ) -> Result<AnalysisOutcome, PipelineError> {
        // Public clone when no token is configured; analysis never pushes.
        let clone_url = match &self.config.github_token {
            Some(token) if !token.is_empty() => authenticated_clone_url(owner_repo, token),
            _ => format!("https://github.com/{}.git", owner_repo),
        };
        let clone = timeout(
            CLONE_TIMEOUT,
            sandbox.exec(
                vec!["git".into(), "clone".into(), clone_url, REPO_DIR.into()],
                None,
                vec![],
            ),
        )
        .await
        .map_err(|_| PipelineError::provisioning("Clone timed out"))?
        .map_err(|e| PipelineError::provisioning_with("Clone failed", e))?;
        if !clone.success() {
            return Err(PipelineError::provisioning(format!(
                "Clone failed: {}",
                clone.stderr.trim()
            )));
        }

        self.reporter
            .report(&LifecycleEvent::AgentStartWorking { agent_id: job.slot });
        job.advance(JobStage::Executing);

        let agent = self.run_agent(sandbox, &job.instruction).await?;

        // Settle the slot for observers; nothing was deployed.
        self.reporter.report(&LifecycleEvent::AgentStartTesting {
            agent_id: job.slot,
            preview_link: String::new(),
            validation_link: String::new(),
        });

        Ok(AnalysisOutcome {
            output: agent.stdout,
        })
    }

    /// Invoke the coding agent inside the sandbox under the configured
    /// wall-clock ceiling, mapping non-zero exit to the terminal
    /// execution error.
    async fn run_agent(
        &self,
        sandbox: &dyn Sandbox,
        instruction: &str,
    ) -> Result<ExecOutput, PipelineError> {
        let cmd = vec![
            self.config.agent_cmd.clone(),
            "--print".into(),
            "--dangerously-skip-permissions".into(),
            instruction.to_string(),
        ];
        let mut env = Vec::new();
        if let Some(key) = &self.config.anthropic_api_key {
            env.push(("ANTHROPIC_API_KEY".to_string(), key.clone()));
        }

        let agent_timeout = Duration::from_secs(self.config.sandbox.timeout);
        let out = timeout(
            agent_timeout,
            sandbox.exec(cmd, Some(REPO_DIR.into()), env),
        )
        .await
        .map_err(|_| PipelineError::AgentExecution {
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("Agent timed out after {}s", agent_timeout.as_secs()),
        })?
        .map_err(|e| PipelineError::AgentExecution {
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("Agent could not be started: {:#}", e),
        })?;

        if !out.success() {
            return Err(PipelineError::AgentExecution {
                exit_code: out.exit_code,
                stdout: out.stdout,
                stderr: out.stderr,
            });
        }
        Ok(out)
    }

    async fn git(&self, sandbox: &dyn Sandbox, args: &[&str]) -> anyhow::Result<ExecOutput> {
        let mut cmd = vec!["git".to_string()];
        cmd.extend(args.iter().map(|s| s.to_string()));
        sandbox
            .exec(cmd, Some(REPO_DIR.into()), vec![])
            .await
            .with_context(|| format!("git {} failed to run", args.first().unwrap_or(&"")))
    }

    /// Best-effort teardown on every exit path; a leaked container is a
    /// log line, never a job failure.
    async fn teardown(&self, sandbox: &dyn Sandbox) {
        if let Err(e) = sandbox.terminate().await {
            tracing::warn!(error = %e, "Sandbox teardown failed");
        }
    }
}

/// Instruction truncated to a label-sized string for events, commit
/// messages, and PR titles.
fn task_label(instruction: &str) -> String {
    let label: String = instruction.chars().take(72).collect();
    label
}

fn branch_name_for(instruction: &str, unix_ts: i64) -> String {
    format!("soot-fix/{}-{}", slugify(instruction, 40), unix_ts)
}

fn pr_body(instruction: &str) -> String {
    format!(
        "## Instructions\n\n{}\n\n---\n\n*Opened by Soot*",
        instruction
    )
}
