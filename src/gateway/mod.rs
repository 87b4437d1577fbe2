//! Event broadcast gateway — ingest lifecycle events, fan out to observers.
//!
//! ## Overview
//!
//! The gateway is the delivery half of the system: the fix pipeline POSTs
//! lifecycle events to an internal endpoint, and every long-lived observer
//! connection registered on the bus receives each event as JSON over its
//! WebSocket. Observers rebuild per-slot state with `crate::reconciler`.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐  POST /internal/event  ┌───────────────────────────────┐
//! │ Pipeline │ ─────────────────────> │  server.rs (axum Router)      │
//! └──────────┘                        │      │                        │
//!                                     │      │ EventBus::publish()    │
//! ┌──────────┐     GET /ws            │      v                        │
//! │ Observer │ <────────────────────> │  bus.rs (snapshot fan-out)    │
//! │  (many)  │    JSON events         │      │                        │
//! └──────────┘                        │      │ per-connection mpsc    │
//!                                     │      v                        │
//!                                     │  ws.rs (socket loop, ping)    │
//!                                     └───────────────────────────────┘
//! ```
//!
//! ## Delivery Semantics
//!
//! At-least-once to connections registered at publish time; no delivery
//! to connections not yet registered; no replay on new registration. One
//! slow or dead consumer is evicted after a bounded send timeout and
//! never stalls the broadcast to the others.

pub mod bus;
pub mod server;
pub mod ws;

pub use bus::{ConnectionId, EventBus};
pub use server::{AppState, ServerConfig, build_router, start_server};
