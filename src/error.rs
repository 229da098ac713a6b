use thiserror::Error;

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

/// Authentication failed before an access token was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("login failed: {message}{}", status_suffix(.status))]
pub struct LoginError {
    pub message: String,
    /// `None` when the request never produced a response.
    pub status: Option<u16>,
}

/// The heartbeat tree could not be fetched or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("heartbeat fetch failed: {message}{}", status_suffix(.status))]
pub struct HeartbeatError {
    pub message: String,
    pub status: Option<u16>,
}

impl LoginError {
    pub fn new(message: impl Into<String>, status: Option<u16>) -> Self {
        Self { message: message.into(), status }
    }
}

impl HeartbeatError {
    pub fn new(message: impl Into<String>, status: Option<u16>) -> Self {
        Self { message: message.into(), status }
    }
}
