pub use anyhow::{anyhow, bail, Context, Error, Result};
pub use log::{debug, error, info, warn};

use crate::polling::JobStatus;
use reqwest::StatusCode;

/// Non-2xx responses and transport failures of the remote service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },
    #[error("Request was rejected as invalid: {message}")]
    Validation { message: String },
    #[error("Request quota exceeded, wait a moment or raise your plan limits: {message}")]
    RateLimited { message: String },
    #[error("Server responded with {status}: {message}")]
    Status { status: u16, message: String },
    #[error("No api token configured, set --token or VULNFACTS_TOKEN")]
    MissingToken,
    #[error("Failed to send request")]
    Transport(#[from] reqwest::Error),
    #[error("Failed to decode response")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn from_status(status: StatusCode, message: String) -> Self {
        match status.as_u16() {
            401 | 403 => ApiError::Auth {
                status: status.as_u16(),
                message,
            },
            422 => ApiError::Validation { message },
            429 => ApiError::RateLimited { message },
            code => ApiError::Status {
                status: code,
                message,
            },
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth { .. } | ApiError::MissingToken)
    }
}

/// Ways an asynchronous job can fail to produce a result.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Job finished with status {status}: {message}")]
    Failed { status: JobStatus, message: String },
    #[error("Malformed job response: {0}")]
    Malformed(String),
    #[error("Exceeded polling max attempts ({attempts})")]
    Exhausted { attempts: u32 },
    #[error("Request failed while polling")]
    Api(#[from] ApiError),
}

/// Whether an error indicates a systemic problem that has to abort the whole run.
pub fn is_run_fatal(err: &Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<ApiError>()
            .map(ApiError::is_auth)
            .unwrap_or(false)
    })
}
