//! Fix pipeline — sandboxed agent runs from instruction to pull request.
//!
//! ## Overview
//!
//! A fix job takes a one-line instruction, provisions an isolated sandbox,
//! clones the target repository inside it, runs an AI coding agent, pushes
//! a working branch, opens a pull request, and optionally smoke-tests a
//! deployable preview. Progress is reported as fire-and-forget lifecycle
//! events; the caller gets the terminal result.
//!
//! ## Module Map
//!
//! ```text
//! ┌────────┐  run_fix()   ┌──────────────────────────────────────────────┐
//! │ Caller │ ───────────> │  runner.rs  (FixRunner, token pool, slots)   │
//! └────────┘ <─────────── │      │                                       │
//!              FixOutcome │      │ SandboxProvider::provision()          │
//!                         │      v                                       │
//!                         │  sandbox.rs  (Sandbox trait, DockerProvider) │
//!                         │      │  git clone / agent / push via exec    │
//!                         │      │                                       │
//!                         │      │ CodeHost::open_pull_request()         │
//!                         │      v                                       │
//!                         │  github.rs   (GitHubClient, URL parsing)     │
//!                         │      │                                       │
//!                         │      │ SmokeTester::run()  (optional)        │
//!                         │      v                                       │
//!                         │  validation.rs  (preview poll, browser check)│
//!                         └──────────────────────────────────────────────┘
//!                                 │
//!                                 │ ProgressReporter::report()
//!                                 v
//!                          webhook.rs  (fire-and-forget POST → gateway)
//! ```
//!
//! ## Supporting Modules
//!
//! | Module       | Responsibility                                        |
//! |--------------|-------------------------------------------------------|
//! | `job`        | `Job`, `JobStage` (monotonic), `JobOptions`, outcomes |
//! | `sandbox`    | Sandbox traits + bollard-backed Docker provider       |
//! | `github`     | owner/repo parsing, PR creation over REST             |
//! | `validation` | bounded preview wait + automated browser check        |
//! | `webhook`    | `ProgressReporter` seam + `WebhookEmitter`            |
//!
//! ## Job Flow
//!
//! 1. `FixRunner::run_fix()` acquires an owned permit from the token pool
//!    (the system's sole admission control) and assigns a 1..=9 observer
//!    slot.
//! 2. `agent_created` is emitted; a sandbox is provisioned and the repo
//!    cloned onto a fresh `soot-fix/<slug>-<ts>` branch.
//! 3. `agent_start_working` is emitted; the coding agent runs inside the
//!    sandbox under the configured wall-clock ceiling.
//! 4. Changes are committed, pushed, and a PR opened via `CodeHost`.
//!    A run with no file changes short-circuits to success without a PR.
//! 5. With the smoke test enabled, the preview is polled until ready and
//!    a browser check collects a validation link — failures here degrade
//!    to warnings, never failing the job.
//! 6. `agent_start_testing` is emitted with the collected links and the
//!    permit drops with the job.

pub mod github;
pub mod job;
pub mod runner;
pub mod sandbox;
pub mod validation;
pub mod webhook;

pub use job::{AnalysisOutcome, FixOutcome, Job, JobOptions, JobStage};
pub use runner::{FixRunner, JobHandle};
