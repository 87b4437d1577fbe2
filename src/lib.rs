//! Soot — sandboxed fix-agent orchestrator.
//!
//! Turns a one-line fix instruction into a provisioned sandbox, a running
//! coding agent, a pushed branch with a pull request, and an optional
//! validation pass — then broadcasts the job's lifecycle to any number of
//! observers in near-real-time.

pub mod config;
pub mod errors;
pub mod event;
pub mod gateway;
pub mod pipeline;
pub mod reconciler;
