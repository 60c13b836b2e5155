//! Orchestration server for the AI banking platform
//!
//! Wires the storage services into the context router, the agent dispatch
//! client and the orchestrator, and exposes them over HTTP.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod routing;
pub mod seed;
pub mod server;


pub use error::{AppError, Error, Result};

pub use banking_mcp_core as core;
pub use banking_mcp_storage as storage;
