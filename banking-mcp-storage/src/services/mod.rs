//! Stateful services over the in-memory indexes and the durable store

pub mod agent;
pub mod session;
pub mod task;

pub use agent::AgentRegistry;
pub use session::SessionStore;
pub use task::TaskManager;
