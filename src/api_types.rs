//! Wire types shared by the control API and the range authority client.

use serde::{Deserialize, Serialize};

/// Uniform JSON response envelope.
///
/// Exactly one of `error` / `message` is populated, selected by `success`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn new(success: bool, description: impl Into<String>) -> Self {
        let description = description.into();
        let (error, message) = if success {
            (None, Some(description))
        } else {
            (Some(description), None)
        };
        Self {
            success,
            error,
            message,
            data: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(true, message)
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::new(false, error)
    }
}

/// Signed body of `POST`/`DELETE /whitelist/{slug}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub ranges: Vec<String>,
    /// Unix seconds at which the request was signed.
    pub timestamp: i64,
    /// Carried for the authority's bookkeeping; not consulted here.
    pub seed: String,
    /// Freshness window in seconds.
    pub ttl: i64,
}

/// `data` payload of `GET {authority}/ranges/{slug}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialRanges {
    /// Ranges allowed to reach the agent control port (and the server port).
    pub infra: Vec<String>,
    /// Ranges allowed to reach the server port only.
    pub proxies: Vec<String>,
}

/// Direction of a whitelist mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitelistAction {
    Add,
    Remove,
}

impl WhitelistAction {
    /// Error text returned to the caller when a range fails.
    pub fn failure_message(self) -> &'static str {
        match self {
            WhitelistAction::Add => "Failed to add IP to whitelist",
            WhitelistAction::Remove => "Failed to remove IP from whitelist",
        }
    }
}
