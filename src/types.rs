use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub environments: Vec<Environment>,
    pub slack_webhook_url: String,
    pub poll_interval: Duration,
    pub full_state_interval: Duration,
    pub full_state_on_start: bool,
    pub request_timeout: Duration,
}

/// One monitored deployment, as read from the environments JSON.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: String,
    pub mail: String,
    pub secret: String,
    pub url: String,
    /// Passed through untouched to the login endpoint.
    #[serde(default)]
    pub otp_info: Option<serde_json::Value>,
    /// Filled in from `DEFAULT_TOLERANCE` when absent.
    #[serde(default)]
    pub tolerance: Option<u32>,
    /// Dotted service paths, e.g. `Storage.AnonymizationAPI`.
    #[serde(default)]
    pub skip: Vec<String>,
}

impl Environment {
    pub fn tolerance(&self) -> u32 {
        self.tolerance.unwrap_or(crate::config::DEFAULT_TOLERANCE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeartbeatLeaf {
    pub status: i64,
    pub version: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Health {
    Healthy,
    Unhealthy,
}

impl Health {
    pub fn is_healthy(self) -> bool {
        matches!(self, Health::Healthy)
    }
}

/// Environment-wide failure classes tracked next to per-service keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    LoginError,
    HeartbeatError,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::LoginError => "LoginError",
            FailureClass::HeartbeatError => "HeartbeatError",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FailureClass::LoginError => "Login",
            FailureClass::HeartbeatError => "Heartbeat fetch",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a failure counter or signature entry is about. Service names and
/// failure classes live in separate key spaces, so a service called
/// `LoginError` does not share a counter with login failures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackedKey {
    Service(String),
    Class(FailureClass),
}

impl TrackedKey {
    pub fn service(name: impl Into<String>) -> Self {
        TrackedKey::Service(name.into())
    }
}

impl fmt::Display for TrackedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackedKey::Service(name) => f.write_str(name),
            TrackedKey::Class(class) => write!(f, "[{}]", class),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SlackPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub blocks: Vec<serde_json::Value>,
}
