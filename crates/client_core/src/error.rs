use thiserror::Error;

use crate::routes::Operation;

/// Why a single route candidate was rejected.
#[derive(Debug, Error)]
pub enum RouteFailure {
    #[error("{method} {url}: transport error: {message}")]
    Transport {
        method: &'static str,
        url: String,
        message: String,
    },
    #[error("{method} {url}: status {status}: {message}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        message: String,
    },
    #[error("{method} {url}: unexpected response shape: {detail}")]
    Shape {
        method: &'static str,
        url: String,
        detail: String,
    },
    #[error("could not build request: {0}")]
    Request(String),
}

impl RouteFailure {
    /// The part of the failure worth showing to a person (server detail when present).
    pub fn message(&self) -> String {
        match self {
            RouteFailure::Transport { message, .. } | RouteFailure::Status { message, .. } => {
                message.clone()
            }
            RouteFailure::Shape { detail, .. } => detail.clone(),
            RouteFailure::Request(message) => message.clone(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RouteFailure::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no route available for {operation} after {attempts} attempt(s): {last}")]
    NoRouteAvailable {
        operation: Operation,
        attempts: usize,
        last: Box<RouteFailure>,
    },
    #[error("authentication rejected: {message}")]
    AuthRejected { message: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not signed in")]
    NotAuthenticated,
    #[error("conversation {0} is not active")]
    InactiveContext(String),
    #[error("failed to encode request payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }
}
