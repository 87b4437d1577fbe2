//! Lifecycle events — the wire-level unit broadcast to observers.
//!
//! Events are emitted by the fix pipeline as fire-and-forget webhooks,
//! ingested by the gateway, and fanned out to every registered WebSocket
//! connection. They carry no sequence numbers: consumers must tolerate
//! arbitrary arrival order and duplicates (see `reconciler`).

use serde::{Deserialize, Serialize};

/// Slot identifiers are small integers reused across jobs.
pub const MIN_SLOT: u8 = 1;
pub const MAX_SLOT: u8 = 9;

/// A discrete, typed notification of job progress.
///
/// Wire format is internally tagged JSON, e.g.
/// `{"type":"agent_created","agent_id":3,"task_name":"fix the login bug"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A job was admitted and a sandbox is being provisioned for it.
    AgentCreated { agent_id: u8, task_name: String },
    /// The coding agent started working inside the sandbox.
    AgentStartWorking { agent_id: u8 },
    /// The job reached its terminal progression; links may be empty when
    /// validation was skipped or never became ready.
    AgentStartTesting {
        agent_id: u8,
        preview_link: String,
        validation_link: String,
    },
}

impl LifecycleEvent {
    /// The slot this event refers to.
    pub fn agent_id(&self) -> u8 {
        match self {
            Self::AgentCreated { agent_id, .. }
            | Self::AgentStartWorking { agent_id }
            | Self::AgentStartTesting { agent_id, .. } => *agent_id,
        }
    }

    /// Whether the slot id falls inside the bounded 1..=9 range.
    pub fn has_valid_slot(&self) -> bool {
        (MIN_SLOT..=MAX_SLOT).contains(&self.agent_id())
    }
}
