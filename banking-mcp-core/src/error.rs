//! Domain error taxonomy
//!
//! Only [`Error::Validation`] and [`Error::NotFound`] reach callers directly.
//! A routing failure is recorded on the task as a REJECTED outcome; agent call
//! failures are typed by the server's dispatch client.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: String, id: String },

    #[error("No route: {reason}")]
    Routing { reason: String },

    #[error("Illegal task transition: {message}")]
    StateTransition { message: String },

    #[error("Malformed document: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("Internal failure: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl Error {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// `entity_type` is the display name ("Task", "Agent", "Session")
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// "No agent available" and friends
    pub fn routing<S: Into<String>>(reason: S) -> Self {
        Self::Routing {
            reason: reason.into(),
        }
    }

    pub fn state_transition<S: Into<String>>(message: S) -> Self {
        Self::StateTransition {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Short label used in logs and HTTP error bodies
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Routing { .. } => "routing",
            Self::StateTransition { .. } => "state_transition",
            Self::Serialization(_) => "serialization",
            Self::Configuration { .. } => "configuration",
            Self::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
