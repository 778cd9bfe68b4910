//! Error types for ppm-agent.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::api_types::Envelope;

/// Input that failed validation before reaching the firewall.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid range: {0}")]
    Range(String),

    #[error("Invalid slug: '{0}'")]
    Slug(String),

    #[error("Invalid port: '{0}'")]
    Port(String),

    #[error("Invalid IP: '{0}'")]
    Ip(String),

    #[error("Unrecognized server spec: '{0}'")]
    ServerSpec(String),

    #[error("Duplicated server slug: '{0}'")]
    DuplicateSlug(String),

    #[error("No servers given")]
    NoServers,
}

/// Failures of the packet-filter layer.
#[derive(Error, Debug)]
pub enum FirewallError {
    #[error("{program} {args} failed: {stderr}")]
    Command {
        program: String,
        args: String,
        stderr: String,
    },

    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is required but not installed")]
    ToolMissing(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Firewall is disabled: {0}")]
    Disabled(String),

    #[error(transparent)]
    InvalidRange(#[from] ValidationError),

    #[error("Firewall not initialized")]
    NotInitialized,

    #[error("Firewall already initialized")]
    AlreadyInitialized,

    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("{range} is not supported by the {backend} backend")]
    UnsupportedRange { range: String, backend: &'static str },
}

/// Failures talking to the range authority.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Response too large: {0} bytes")]
    TooLarge(usize),

    #[error("Malformed ranges response: {0}")]
    Malformed(String),
}

/// Failure of the startup whitelist bootstrap for one server.
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Failed to block traffic for server {slug}: {source}")]
    DefaultDeny {
        slug: String,
        #[source]
        source: FirewallError,
    },

    #[error("Failed to fetch IP ranges for server {slug}: {source}")]
    Fetch {
        slug: String,
        #[source]
        source: FetchError,
    },

    #[error("Failed to whitelist {range} for server {slug}: {source}")]
    Allow {
        slug: String,
        range: String,
        #[source]
        source: FirewallError,
    },

    #[error(transparent)]
    Firewall(#[from] FirewallError),
}

/// Per-request failures of the control API, each mapped to a status code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0}")]
    Validation(&'static str),

    #[error("{0}")]
    Authentication(&'static str),

    #[error("Unknown route")]
    NotFound,

    #[error("Unknown method")]
    MethodNotAllowed,

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("{0}")]
    Operation(&'static str),

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Authentication(_) | ApiError::Operation(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(Envelope::<()>::failure(self.to_string()))).into_response()
    }
}
