use anyhow::{anyhow, Context, Result};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use crate::types::{Config, Environment};

pub const DEFAULT_TOLERANCE: u32 = 3;
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 300;
pub const DEFAULT_FULL_STATE_INTERVAL_HOURS: u64 = 24;
/// Longer full-state intervals fall back to the default.
pub const MAX_FULL_STATE_INTERVAL_HOURS: u64 = 24 * 366;
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Trait for abstracting environment variable access
pub trait EnvironmentProvider {
    fn get_var(&self, key: &str) -> Option<String>;
}

/// Production implementation using std::env
pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Mock implementation for testing
#[derive(Debug, Default)]
pub struct MockEnvironment {
    vars: HashMap<String, String>,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
        }
    }

    pub fn set_var<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_var<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set_var(key, value);
        self
    }
}

impl EnvironmentProvider for MockEnvironment {
    fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn load_config() -> Result<Config> {
    load_config_with_env(&SystemEnvironment)
}

pub fn load_config_with_env<E: EnvironmentProvider>(env: &E) -> Result<Config> {
    let slack_webhook_url = env.get_var("SLACK_WEBHOOK_URL")
        .ok_or_else(|| anyhow!("SLACK_WEBHOOK_URL must be provided via Secret env"))?;

    let raw_environments = match env.get_var("ENVIRONMENTS_FILE") {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read ENVIRONMENTS_FILE {}", path))?,
        None => env.get_var("ENVIRONMENTS")
            .ok_or_else(|| anyhow!("ENVIRONMENTS_FILE or ENVIRONMENTS env var must be set"))?,
    };

    let default_tolerance: u32 = env.get_var("DEFAULT_TOLERANCE")
        .unwrap_or_else(|| DEFAULT_TOLERANCE.to_string())
        .trim()
        .parse()
        .context("Invalid DEFAULT_TOLERANCE")?;
    if default_tolerance == 0 {
        return Err(anyhow!("DEFAULT_TOLERANCE must be a positive integer"));
    }

    let environments = parse_environments(&raw_environments, default_tolerance)?;

    let poll_interval_seconds: u64 = env.get_var("POLL_INTERVAL_SECONDS")
        .and_then(|v| v.trim().parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECONDS);

    let full_state_interval_hours: u64 = env.get_var("FULL_STATE_INTERVAL_HOURS")
        .and_then(|v| v.trim().parse().ok())
        .filter(|v| *v > 0 && *v <= MAX_FULL_STATE_INTERVAL_HOURS)
        .unwrap_or(DEFAULT_FULL_STATE_INTERVAL_HOURS);
    let full_state_interval_seconds = full_state_interval_hours
        .checked_mul(3600)
        .unwrap_or(DEFAULT_FULL_STATE_INTERVAL_HOURS * 3600);

    let request_timeout_seconds: u64 = env.get_var("REQUEST_TIMEOUT_SECONDS")
        .and_then(|v| v.trim().parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS);

    let full_state_on_start = env.get_var("FULL_STATE_ON_START")
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(true);

    Ok(Config {
        environments,
        slack_webhook_url,
        poll_interval: Duration::from_secs(poll_interval_seconds),
        full_state_interval: Duration::from_secs(full_state_interval_seconds),
        full_state_on_start,
        request_timeout: Duration::from_secs(request_timeout_seconds),
    })
}

/// Parses the JSON environment list, filling in `default_tolerance` where a
/// descriptor does not set one.
pub fn parse_environments(raw: &str, default_tolerance: u32) -> Result<Vec<Environment>> {
    let mut environments: Vec<Environment> = serde_json::from_str(raw)
        .context("Invalid environments JSON")?;
    if environments.is_empty() {
        return Err(anyhow!("At least one environment must be configured"));
    }

    let mut seen = HashSet::new();
    for env in environments.iter_mut() {
        if env.id.trim().is_empty() {
            return Err(anyhow!("Environment id must not be empty"));
        }
        if env.url.trim().is_empty() {
            return Err(anyhow!("Environment {} has an empty url", env.id));
        }
        if !seen.insert(env.id.clone()) {
            return Err(anyhow!("Duplicate environment id {}", env.id));
        }
        match env.tolerance {
            Some(0) => return Err(anyhow!("Environment {} tolerance must be a positive integer", env.id)),
            Some(_) => {}
            None => env.tolerance = Some(default_tolerance),
        }
        env.skip.retain(|path| !path.trim().is_empty());
    }
    Ok(environments)
}
