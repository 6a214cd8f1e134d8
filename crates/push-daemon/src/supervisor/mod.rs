//! Agent process supervision.
//!
//! Spawns, tracks, and reaps the external agent CLI process that executes a
//! task inside its workspace.

mod manager;

pub use manager::{AgentHandle, AgentStatus, AgentSupervisor, SupervisorError};
