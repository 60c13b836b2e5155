//! Persistence layer for the banking MCP server
//!
//! This crate provides the durable record stores, the availability gate that
//! lets the server fall back to memory-only operation, and the stateful
//! services built on them: the agent registry, the task manager and the
//! session store.

pub mod error;
pub mod gate;
pub mod manager;
pub mod repositories;
pub mod services;

pub use error::{Error, Result};
pub use gate::{GateStatus, GatedStore, StoreGate};
pub use manager::{connect_or_degrade, DatabaseConfig, StorageManager};
pub use services::{AgentRegistry, SessionStore, TaskManager};

/// Re-export core types for convenience
pub use banking_mcp_core as core;
