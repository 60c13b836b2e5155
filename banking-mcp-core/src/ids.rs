//! Identifier minting

use uuid::Uuid;

pub const TASK_PREFIX: &str = "task_";
pub const SESSION_PREFIX: &str = "sess_";
pub const AGENT_PREFIX: &str = "agent_";

fn prefixed(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4())
}

pub fn new_task_id() -> String {
    prefixed(TASK_PREFIX)
}

pub fn new_session_id() -> String {
    prefixed(SESSION_PREFIX)
}

pub fn new_agent_id() -> String {
    prefixed(AGENT_PREFIX)
}
