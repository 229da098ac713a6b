use anyhow::{Context, Result};
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::info;

use heartbeat_reporter::config::DEFAULT_FULL_STATE_INTERVAL_HOURS;
use heartbeat_reporter::{load_config, FullStateFlag, HttpEnvironmentApi, Monitor, SlackNotifier};

const DEFAULT_FULL_STATE_INTERVAL: Duration = Duration::from_secs(DEFAULT_FULL_STATE_INTERVAL_HOURS * 3600);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cfg = load_config()?;
    let ids: Vec<&str> = cfg.environments.iter().map(|e| e.id.as_str()).collect();
    info!("environments = {:?}", ids);

    let api = HttpEnvironmentApi::with_timeout(cfg.request_timeout)
        .context("Failed to build heartbeat HTTP client")?;
    let slack_client = reqwest::Client::builder()
        .timeout(cfg.request_timeout)
        .build()
        .context("Failed to build Slack HTTP client")?;
    let notifier = SlackNotifier::new(slack_client, cfg.slack_webhook_url.clone());

    let full_state = FullStateFlag::new(cfg.full_state_on_start);
    let mut monitor = Monitor::new(cfg.environments.clone(), full_state.clone());

    let mut poll = time::interval(cfg.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let first_full_state = Instant::now()
        .checked_add(cfg.full_state_interval)
        .unwrap_or_else(|| Instant::now() + DEFAULT_FULL_STATE_INTERVAL);
    let mut full_state_timer = time::interval_at(first_full_state, cfg.full_state_interval);
    full_state_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        poll_secs = cfg.poll_interval.as_secs(),
        full_state_secs = cfg.full_state_interval.as_secs(),
        "starting heartbeat polling"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // Cycles run inline, so a slow cycle delays the next tick instead of overlapping it.
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, stopping");
                break;
            }
            _ = full_state_timer.tick() => {
                info!("Full-state report due on next cycle");
                full_state.trigger();
            }
            _ = poll.tick() => {
                monitor.run_cycle(&api, &notifier).await;
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}
