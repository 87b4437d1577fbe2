use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use soot::config::SootConfig;
use soot::gateway::{ServerConfig, start_server};
use soot::pipeline::{FixRunner, JobOptions};

#[derive(Parser)]
#[command(name = "soot")]
#[command(version, about = "Sandboxed fix-agent orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding `.soot/sandbox.toml`; defaults to the cwd.
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the event gateway (ingestion endpoint + broadcast WebSocket)
    Serve {
        /// Port to serve on
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Enable dev mode (permissive CORS, bind all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Run one fix job to completion
    Fix {
        /// What to do (e.g. "Fix the bug in auth.py")
        instruction: String,

        /// Git URL to clone (defaults to the configured sample repo)
        #[arg(long)]
        repo: Option<String>,

        /// Queue the job and print its handle immediately
        #[arg(long)]
        background: bool,

        /// Smoke-test the deployed preview after the PR is opened
        #[arg(long)]
        smoke_test: bool,

        /// Override the concurrency token pool size
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
    /// Run the agent read-only: no branch, no push, no PR
    Analyze {
        /// What to look into
        instruction: String,

        /// Git URL to clone (defaults to the configured sample repo)
        #[arg(long)]
        repo: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let mut config = SootConfig::from_env(&project_dir)?;

    match cli.command {
        Commands::Serve { port, dev } => {
            let runner = Arc::new(FixRunner::new(config)?);
            start_server(ServerConfig { port, dev_mode: dev }, runner).await?;
        }
        Commands::Fix {
            instruction,
            repo,
            background,
            smoke_test,
            max_concurrent,
        } => {
            if let Some(max) = max_concurrent {
                config.max_concurrent = max;
            }
            let options = JobOptions {
                run_in_background: background || config.run_in_background,
                run_smoke_test: smoke_test || config.run_smoke_test,
            };
            let repo_url = repo.unwrap_or_else(|| config.default_repo_url.clone());
            let runner = Arc::new(FixRunner::new(config)?);

            let outcome = if options.run_in_background {
                let handle = runner.spawn_fix(&instruction, &repo_url, options);
                println!("Queued job {} on slot {}", handle.job_id, handle.slot);
                handle.join.await.context("Fix task panicked")??
            } else {
                runner.run_fix(&instruction, &repo_url, options).await?
            };

            match &outcome.pr_url {
                Some(pr_url) => {
                    println!("PR created: {}", pr_url);
                    println!("Branch: {}", outcome.branch);
                }
                None => println!("Agent completed but made no file changes."),
            }
            if !outcome.preview_link.is_empty() {
                println!("Preview: {}", outcome.preview_link);
            }
            if !outcome.validation_link.is_empty() {
                println!("Validation run: {}", outcome.validation_link);
            }
            if !outcome.output.is_empty() {
                println!("\n{}", outcome.output);
            }
        }
        Commands::Analyze { instruction, repo } => {
            let runner = Arc::new(FixRunner::new(config)?);
            let outcome = runner.run_analysis(&instruction, repo.as_deref()).await?;
            println!("{}", outcome.output);
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("soot={}", default_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
