// Public modules
pub mod types;
pub mod error;
pub mod config;
pub mod normalize;
pub mod health;
pub mod tracker;
pub mod gate;
pub mod slack;
pub mod client;
pub mod monitor;

// Re-export commonly used items
pub use types::*;
pub use error::{LoginError, HeartbeatError};
pub use config::{load_config, load_config_with_env, parse_environments, EnvironmentProvider, SystemEnvironment, MockEnvironment};
pub use normalize::{flatten, flatten_with_skip, FlatHeartbeatMap, HeartbeatNode};
pub use health::classify;
pub use tracker::{FailureTracker, Inclusion};
pub use gate::{DiffGate, FullStateFlag, StateSignature};
pub use slack::{build_slack_payload, send_to_slack, EnvironmentChunks, Notifier, SlackNotifier};
pub use client::{EnvironmentApi, HttpEnvironmentApi};
pub use monitor::{CycleOutcome, DispatchOutcome, Monitor};
