//! Per-task workspace management.
//!
//! Every task executes in its own git worktree on its own branch so agents
//! can never trample each other's changes.

mod manager;

pub use manager::{WorkspaceError, WorkspaceManager};
