use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{HeartbeatError, LoginError};
use crate::normalize::HeartbeatNode;
use crate::types::Environment;

pub const LOGIN_PATH: &str = "/api/auth/user/login";
pub const HEARTBEAT_PATH: &str = "/api/heartbeat/all";

/// Network side of a poll: authentication and heartbeat retrieval.
#[allow(async_fn_in_trait)]
pub trait EnvironmentApi {
    async fn login(&self, env: &Environment) -> Result<String, LoginError>;
    async fn fetch_heartbeat(&self, env: &Environment, token: &str) -> Result<HeartbeatNode, HeartbeatError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    otp_info: Option<&'a serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: Option<String>,
}

#[derive(Clone)]
pub struct HttpEnvironmentApi {
    client: reqwest::Client,
}

impl HttpEnvironmentApi {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn with_timeout(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::new(client))
    }
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Pulls a human readable reason out of an error response body.
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string));
    match from_json {
        Some(message) => message,
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string(),
    }
}

impl EnvironmentApi for HttpEnvironmentApi {
    async fn login(&self, env: &Environment) -> Result<String, LoginError> {
        let request = LoginRequest {
            email: &env.mail,
            password: &env.secret,
            otp_info: env.otp_info.as_ref(),
        };
        let res = self
            .client
            .post(endpoint(&env.url, LOGIN_PATH))
            .json(&request)
            .send()
            .await
            .map_err(|e| LoginError::new(e.to_string(), e.status().map(|s| s.as_u16())))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(LoginError::new(error_message(status, &body), Some(status.as_u16())));
        }

        let body: LoginResponse = res
            .json()
            .await
            .map_err(|e| LoginError::new(format!("invalid login response: {}", e), Some(status.as_u16())))?;
        debug!(environment = %env.id, "logged in");
        body.access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LoginError::new("login response carried no access token", Some(status.as_u16())))
    }

    async fn fetch_heartbeat(&self, env: &Environment, token: &str) -> Result<HeartbeatNode, HeartbeatError> {
        let res = self
            .client
            .get(endpoint(&env.url, HEARTBEAT_PATH))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| HeartbeatError::new(e.to_string(), e.status().map(|s| s.as_u16())))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(HeartbeatError::new(error_message(status, &body), Some(status.as_u16())));
        }

        res.json::<HeartbeatNode>()
            .await
            .map_err(|e| HeartbeatError::new(format!("invalid heartbeat response: {}", e), Some(status.as_u16())))
    }
}
