use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle stage of a fix job. Transitions are monotonic — a stage is
/// never revisited for a given job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Provisioning,
    Executing,
    Integrating,
    Validating,
    Succeeded,
    Failed,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Provisioning => "provisioning",
            Self::Executing => "executing",
            Self::Integrating => "integrating",
            Self::Validating => "validating",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "provisioning" => Ok(Self::Provisioning),
            "executing" => Ok(Self::Executing),
            "integrating" => Ok(Self::Integrating),
            "validating" => Ok(Self::Validating),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job stage: {}", s)),
        }
    }
}

/// One fix request, owned by the pipeline for its lifetime and dropped
/// once the run returns to its caller. Nothing is persisted.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub instruction: String,
    pub repo_url: String,
    /// Bounded 1..=9 identifier shown to observers; reused across jobs.
    pub slot: u8,
    pub created_at: DateTime<Utc>,
    pub stage: JobStage,
}

impl Job {
    pub fn new(instruction: &str, repo_url: &str, slot: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            instruction: instruction.to_string(),
            repo_url: repo_url.to_string(),
            slot,
            created_at: Utc::now(),
            stage: JobStage::Queued,
        }
    }

    /// Advance to a later stage. Backwards or sideways requests are
    /// ignored and logged — the monotonicity invariant wins over the
    /// caller's bookkeeping.
    pub fn advance(&mut self, next: JobStage) {
        if next <= self.stage {
            tracing::warn!(
                job_id = %self.id,
                from = %self.stage,
                to = %next,
                "Ignoring non-monotonic stage transition"
            );
            return;
        }
        tracing::debug!(job_id = %self.id, from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
    }
}

/// Per-call knobs, resolved against config defaults by the runner.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobOptions {
    pub run_in_background: bool,
    pub run_smoke_test: bool,
}

/// Successful result of a fix run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixOutcome {
    /// Absent when the agent completed without touching any files.
    pub pr_url: Option<String>,
    pub branch: String,
    /// Captured agent transcript (stdout).
    pub output: String,
    /// Empty when validation was skipped or the preview never came up.
    pub preview_link: String,
    pub validation_link: String,
}

/// Result of a read-only analysis run (no branch, push, or PR).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_stage_roundtrip() {
        for s in &[
            "queued",
            "provisioning",
            "executing",
            "integrating",
            "validating",
            "succeeded",
            "failed",
        ] {
            let parsed: JobStage = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<JobStage>().is_err());
    }

    #[test]
    fn test_job_stage_serde_produces_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStage::Provisioning).unwrap(),
            "\"provisioning\""
        );
        assert_eq!(
            serde_json::from_str::<JobStage>("\"succeeded\"").unwrap(),
            JobStage::Succeeded
        );
    }

    #[test]
    fn test_job_stage_ordering_is_pipeline_order() {
        assert!(JobStage::Queued < JobStage::Provisioning);
        assert!(JobStage::Provisioning < JobStage::Executing);
        assert!(JobStage::Executing < JobStage::Integrating);
        assert!(JobStage::Integrating < JobStage::Validating);
        assert!(JobStage::Validating < JobStage::Succeeded);
    }

    #[test]
    fn test_terminal_stages() {
        assert!(JobStage::Succeeded.is_terminal());
        assert!(JobStage::Failed.is_terminal());
        assert!(!JobStage::Validating.is_terminal());
    }

    #[test]
    fn test_job_advance_is_monotonic() {
        let mut job = Job::new("fix it", "https://github.com/o/r", 1);
        assert_eq!(job.stage, JobStage::Queued);
        job.advance(JobStage::Provisioning);
        assert_eq!(job.stage, JobStage::Provisioning);
        // Backwards transition is ignored.
        job.advance(JobStage::Queued);
        assert_eq!(job.stage, JobStage::Provisioning);
        // Skipping ahead is fine (validation can be skipped).
        job.advance(JobStage::Succeeded);
        assert_eq!(job.stage, JobStage::Succeeded);
    }

    #[test]
    fn test_job_new_assigns_identity() {
        let a = Job::new("x", "https://github.com/o/r", 2);
        let b = Job::new("x", "https://github.com/o/r", 2);
        assert_ne!(a.id, b.id);
        assert_eq!(a.slot, 2);
    }
}
