//! Unified error taxonomy for the studio.
//!
//! Mirrors the teacher's `SoulBrowserError` (one enum, one place that knows
//! the HTTP status and retry classification) but built directly on
//! `thiserror` instead of a vendored error-model crate.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum StudioError {
    #[error("{message}")]
    Validation { message: String },

    #[error("{message}")]
    Conflict { message: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("{message}")]
    Transport { message: String },

    #[error("{message}")]
    Navigation { message: String },

    #[error("{message}")]
    Model { message: String },

    #[error("{reason}")]
    Budget { reason: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl StudioError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn navigation(message: impl Into<String>) -> Self {
        Self::Navigation {
            message: message.into(),
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status an external router should surface for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Conflict { .. } => 409,
            Self::NotFound { .. } => 404,
            Self::Transport { .. } | Self::Navigation { .. } | Self::Model { .. } => 500,
            Self::Budget { .. } => 200,
            Self::Internal { .. } => 500,
        }
    }

    /// True for the "Target closed"/"Target page" class of CDP error that
    /// signals a dead page handle rather than a genuine operational
    /// failure. The Perception Loop uses this to trigger its one-shot
    /// re-acquisition before falling back to a normal cycle error.
    pub fn is_navigation_invalidation(message: &str) -> bool {
        message.contains("Target closed") || message.contains("Target page")
    }

    /// Whether the message is safe to surface to an external caller
    /// verbatim, vs. one that should be replaced with a generic message.
    pub fn is_user_safe(&self) -> bool {
        !matches!(self, Self::Internal { .. })
    }
}

impl From<std::io::Error> for StudioError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(format!("io error: {err}"))
    }
}

impl From<serde_json::Error> for StudioError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(format!("invalid JSON: {err}"))
    }
}

impl From<anyhow::Error> for StudioError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

pub type StudioResult<T> = Result<T, StudioError>;
