use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use heartbeat_reporter::{
    DispatchOutcome, Environment, EnvironmentApi, FailureClass, FullStateFlag, HeartbeatError,
    HeartbeatNode, LoginError, Monitor, Notifier, SlackPayload,
};

#[derive(Clone)]
enum Script {
    LoginFails,
    HeartbeatFails,
    Tree(Value),
}

/// Answers each environment according to whatever script is currently set.
#[derive(Default)]
struct ScriptedApi {
    scripts: Mutex<HashMap<String, Script>>,
    logins: Mutex<Vec<String>>,
}

impl ScriptedApi {
    fn set(&self, env: &str, script: Script) {
        self.scripts.lock().unwrap().insert(env.to_string(), script);
    }

    fn script(&self, env: &str) -> Script {
        self.scripts.lock().unwrap().get(env).cloned().unwrap_or(Script::LoginFails)
    }
}

impl EnvironmentApi for ScriptedApi {
    async fn login(&self, env: &Environment) -> Result<String, LoginError> {
        self.logins.lock().unwrap().push(env.id.clone());
        match self.script(&env.id) {
            Script::LoginFails => Err(LoginError::new("invalid credentials", Some(401))),
            _ => Ok(format!("token-{}", env.id)),
        }
    }

    async fn fetch_heartbeat(&self, env: &Environment, token: &str) -> Result<HeartbeatNode, HeartbeatError> {
        assert_eq!(token, format!("token-{}", env.id));
        match self.script(&env.id) {
            Script::Tree(value) => Ok(HeartbeatNode::from_value(&value)),
            Script::HeartbeatFails => Err(HeartbeatError::new("gateway timeout", Some(504))),
            Script::LoginFails => unreachable!("heartbeat fetched without a login"),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<SlackPayload>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn last_text(&self) -> String {
        let sent = self.sent.lock().unwrap();
        let payload = sent.last().expect("nothing was sent");
        payload
            .blocks
            .iter()
            .filter_map(|b| b["text"]["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Notifier for RecordingNotifier {
    async fn send(&self, payload: &SlackPayload) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("webhook unreachable"));
        }
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

fn environment(id: &str, tolerance: u32, skip: &[&str]) -> Environment {
    Environment {
        id: id.to_string(),
        mail: "ops@example.com".to_string(),
        secret: "secret".to_string(),
        url: format!("https://{}.example.com", id),
        otp_info: None,
        tolerance: Some(tolerance),
        skip: skip.iter().map(|s| s.to_string()).collect(),
    }
}

fn tree(backend: i64, storage: i64) -> Value {
    json!({
        "Backend": {"status": backend, "version": "1.0.0", "message": "backend"},
        "Storage": {
            "StorageAPI": {"status": storage, "version": "2.0.0", "message": "storage"},
            "AnonymizationAPI": {"status": 200}
        }
    })
}

#[tokio::test]
async fn test_sustained_outage_alerts_once() {
    let api = ScriptedApi::default();
    let notifier = RecordingNotifier::default();
    let mut monitor = Monitor::new(vec![environment("prod", 3, &[])], FullStateFlag::new(false));

    api.set("prod", Script::Tree(tree(200, 500)));
    let mut dispatches = Vec::new();
    for _ in 0..5 {
        let outcome = monitor.run_cycle(&api, &notifier).await;
        dispatches.push(outcome.dispatch);
    }

    assert_eq!(
        dispatches,
        vec![
            DispatchOutcome::NothingToSend,
            DispatchOutcome::NothingToSend,
            DispatchOutcome::NothingToSend,
            DispatchOutcome::Sent,
            DispatchOutcome::NothingToSend,
        ]
    );
    assert_eq!(notifier.count(), 1);
    let text = notifier.last_text();
    assert!(text.starts_with("*prod*\n"));
    assert!(text.contains(":x: *StorageAPI* v2.0.0 (status 500): storage"));
    assert!(!text.contains("Backend"));
    assert_eq!(monitor.tracker().count("prod", "StorageAPI"), 5);
}

#[tokio::test]
async fn test_recovery_requires_full_tolerance_again() {
    let api = ScriptedApi::default();
    let notifier = RecordingNotifier::default();
    let mut monitor = Monitor::new(vec![environment("prod", 3, &[])], FullStateFlag::new(false));

    api.set("prod", Script::Tree(tree(200, 500)));
    for _ in 0..4 {
        monitor.run_cycle(&api, &notifier).await;
    }
    assert_eq!(notifier.count(), 1);

    api.set("prod", Script::Tree(tree(200, 200)));
    let outcome = monitor.run_cycle(&api, &notifier).await;
    assert_eq!(outcome.dispatch, DispatchOutcome::NothingToSend);
    assert_eq!(monitor.tracker().count("prod", "StorageAPI"), 0);

    api.set("prod", Script::Tree(tree(200, 503)));
    let alerts: Vec<usize> = {
        let mut v = Vec::new();
        for _ in 0..4 {
            v.push(monitor.run_cycle(&api, &notifier).await.alerts);
        }
        v
    };
    assert_eq!(alerts, vec![0, 0, 0, 1]);
    assert_eq!(notifier.count(), 2);
}

#[tokio::test]
async fn test_full_state_reports_every_service_then_clears() {
    let api = ScriptedApi::default();
    let notifier = RecordingNotifier::default();
    let flag = FullStateFlag::new(true);
    let mut monitor = Monitor::new(vec![environment("prod", 3, &[])], flag.clone());

    api.set("prod", Script::Tree(tree(200, 500)));
    let outcome = monitor.run_cycle(&api, &notifier).await;

    assert!(outcome.full_state);
    assert_eq!(outcome.chunks, 3);
    assert_eq!(outcome.alerts, 0);
    assert_eq!(outcome.dispatch, DispatchOutcome::Sent);
    let text = notifier.last_text();
    assert!(text.contains(":white_check_mark: *Backend*"));
    assert!(text.contains(":x: *StorageAPI*"));
    assert!(text.contains(":white_check_mark: *AnonymizationAPI*"));
    assert!(!flag.observe());

    // Same state, no full-state request: nothing new to say.
    let outcome = monitor.run_cycle(&api, &notifier).await;
    assert!(!outcome.full_state);
    assert_eq!(outcome.dispatch, DispatchOutcome::NothingToSend);
    assert_eq!(notifier.count(), 1);
}

#[tokio::test]
async fn test_full_state_is_sent_even_when_state_is_unchanged() {
    let api = ScriptedApi::default();
    let notifier = RecordingNotifier::default();
    let flag = FullStateFlag::new(true);
    let mut monitor = Monitor::new(vec![environment("prod", 3, &[])], flag.clone());

    api.set("prod", Script::Tree(tree(200, 200)));
    monitor.run_cycle(&api, &notifier).await;
    let first = monitor.gate().last_dispatched().cloned();

    flag.trigger();
    let outcome = monitor.run_cycle(&api, &notifier).await;

    assert_eq!(outcome.dispatch, DispatchOutcome::Sent);
    assert_eq!(notifier.count(), 2);
    assert_eq!(monitor.gate().last_dispatched().cloned(), first);
}

#[tokio::test]
async fn test_login_failure_does_not_block_other_environments() {
    let api = ScriptedApi::default();
    let notifier = RecordingNotifier::default();
    let mut monitor = Monitor::new(
        vec![environment("prod", 1, &[]), environment("staging", 1, &[])],
        FullStateFlag::new(true),
    );

    api.set("prod", Script::LoginFails);
    api.set("staging", Script::Tree(tree(200, 200)));

    let outcome = monitor.run_cycle(&api, &notifier).await;
    assert_eq!(outcome.environments_polled, 2);
    assert_eq!(outcome.environments_unreachable, 1);
    assert_eq!(outcome.services_checked, 3);
    assert_eq!(outcome.dispatch, DispatchOutcome::Sent);

    let sent = notifier.sent.lock().unwrap().clone();
    let blocks = &sent[0].blocks;
    assert_eq!(blocks.len(), 3);
    let prod = blocks[0]["text"]["text"].as_str().unwrap();
    assert!(prod.starts_with("*prod*\n:rotating_light: Login failed 1 times in a row"));
    assert!(prod.contains("invalid credentials (HTTP 401)"));
    assert_eq!(blocks[1]["type"], "divider");
    assert!(blocks[2]["text"]["text"].as_str().unwrap().starts_with("*staging*\n"));

    // Second failure crosses tolerance 1 and alerts with no service detail.
    let outcome = monitor.run_cycle(&api, &notifier).await;
    assert_eq!(outcome.alerts, 1);
    assert_eq!(outcome.dispatch, DispatchOutcome::Sent);
    let text = notifier.last_text();
    assert_eq!(
        text,
        "*prod*\n:rotating_light: Login failed 2 times in a row, still failing: invalid credentials (HTTP 401)"
    );
    assert_eq!(monitor.tracker().class_count("prod", FailureClass::LoginError), 2);
}

#[tokio::test]
async fn test_heartbeat_failure_short_circuits_services() {
    let api = ScriptedApi::default();
    let notifier = RecordingNotifier::default();
    let mut monitor = Monitor::new(vec![environment("prod", 2, &[])], FullStateFlag::new(false));

    api.set("prod", Script::Tree(tree(200, 500)));
    monitor.run_cycle(&api, &notifier).await;
    assert_eq!(monitor.tracker().count("prod", "StorageAPI"), 1);

    api.set("prod", Script::HeartbeatFails);
    for _ in 0..3 {
        monitor.run_cycle(&api, &notifier).await;
    }

    // Services were not evaluated while the heartbeat was unavailable.
    assert_eq!(monitor.tracker().count("prod", "StorageAPI"), 1);
    assert_eq!(monitor.tracker().class_count("prod", FailureClass::HeartbeatError), 3);
    assert_eq!(monitor.tracker().class_count("prod", FailureClass::LoginError), 0);
    assert_eq!(notifier.count(), 1);
    assert!(notifier.last_text().contains("Heartbeat fetch failed 3 times in a row, still failing: gateway timeout (HTTP 504)"));

    api.set("prod", Script::Tree(tree(200, 500)));
    monitor.run_cycle(&api, &notifier).await;
    assert_eq!(monitor.tracker().class_count("prod", FailureClass::HeartbeatError), 0);
    assert_eq!(monitor.tracker().count("prod", "StorageAPI"), 2);
}

#[tokio::test]
async fn test_skipped_services_are_never_tracked_or_reported() {
    let api = ScriptedApi::default();
    let notifier = RecordingNotifier::default();
    let mut monitor = Monitor::new(
        vec![environment("prod", 1, &["Storage.StorageAPI"])],
        FullStateFlag::new(true),
    );

    api.set("prod", Script::Tree(tree(200, 500)));
    for _ in 0..3 {
        monitor.run_cycle(&api, &notifier).await;
    }

    assert_eq!(notifier.count(), 1);
    let text = notifier.last_text();
    assert!(!text.contains("StorageAPI"));
    assert!(text.contains("AnonymizationAPI"));
    assert_eq!(monitor.tracker().count("prod", "StorageAPI"), 0);
    assert!(monitor.gate().last_dispatched().unwrap().get("prod", "StorageAPI").is_none());
}

#[tokio::test]
async fn test_failed_dispatch_is_swallowed_and_flag_still_consumed() {
    let api = ScriptedApi::default();
    let notifier = RecordingNotifier::default();
    notifier.fail.store(true, Ordering::SeqCst);
    let flag = FullStateFlag::new(true);
    let mut monitor = Monitor::new(vec![environment("prod", 3, &[])], flag.clone());

    api.set("prod", Script::Tree(tree(200, 200)));
    let outcome = monitor.run_cycle(&api, &notifier).await;

    assert_eq!(outcome.dispatch, DispatchOutcome::Failed);
    assert!(!flag.observe());
    assert!(monitor.gate().last_dispatched().is_none());
    assert_eq!(monitor.pending().len(), 1);
    assert_eq!(monitor.pending()[0].chunks.len(), 3);
}

#[test]
fn test_cycle_order_follows_configuration() {
    let api = ScriptedApi::default();
    let notifier = RecordingNotifier::default();
    let mut monitor = Monitor::new(
        vec![
            environment("dev", 3, &[]),
            environment("staging", 3, &[]),
            environment("prod", 3, &[]),
        ],
        FullStateFlag::new(false),
    );
    for id in ["dev", "staging", "prod"] {
        api.set(id, Script::Tree(tree(200, 200)));
    }

    let outcome = tokio_test::block_on(monitor.run_cycle(&api, &notifier));

    assert_eq!(outcome.dispatch, DispatchOutcome::NothingToSend);
    assert_eq!(*api.logins.lock().unwrap(), vec!["dev", "staging", "prod"]);
    assert_eq!(monitor.environments().len(), 3);
}

#[tokio::test]
async fn test_alert_from_failed_dispatch_is_delivered_next_cycle() {
    let api = ScriptedApi::default();
    let notifier = RecordingNotifier::default();
    let mut monitor = Monitor::new(vec![environment("prod", 1, &[])], FullStateFlag::new(false));

    api.set("prod", Script::Tree(json!({"Backend": {"status": 500}})));
    let first = monitor.run_cycle(&api, &notifier).await;
    assert_eq!(first.dispatch, DispatchOutcome::NothingToSend);

    notifier.fail.store(true, Ordering::SeqCst);
    let alert = monitor.run_cycle(&api, &notifier).await;
    assert_eq!(alert.alerts, 1);
    assert_eq!(alert.dispatch, DispatchOutcome::Failed);
    assert_eq!(monitor.pending().len(), 1);

    notifier.fail.store(false, Ordering::SeqCst);
    let retry = monitor.run_cycle(&api, &notifier).await;
    assert_eq!(retry.alerts, 0);
    assert_eq!(retry.redelivered, 1);
    assert_eq!(retry.dispatch, DispatchOutcome::Sent);
    assert_eq!(notifier.count(), 1);
    assert_eq!(notifier.last_text(), "*prod*\n:x: *Backend* (status 500)");
    assert!(monitor.pending().is_empty());
    assert!(monitor.gate().last_dispatched().is_some());

    let later = monitor.run_cycle(&api, &notifier).await;
    assert_eq!(later.dispatch, DispatchOutcome::NothingToSend);
    assert_eq!(notifier.count(), 1);
}

#[tokio::test]
async fn test_undelivered_alert_is_dropped_once_state_matches_last_report() {
    let api = ScriptedApi::default();
    let notifier = RecordingNotifier::default();
    let mut monitor = Monitor::new(vec![environment("prod", 1, &[])], FullStateFlag::new(true));

    api.set("prod", Script::Tree(json!({"Backend": {"status": 200}})));
    assert_eq!(monitor.run_cycle(&api, &notifier).await.dispatch, DispatchOutcome::Sent);

    api.set("prod", Script::Tree(json!({"Backend": {"status": 500}})));
    monitor.run_cycle(&api, &notifier).await;
    notifier.fail.store(true, Ordering::SeqCst);
    assert_eq!(monitor.run_cycle(&api, &notifier).await.dispatch, DispatchOutcome::Failed);

    // Recovered before the retry: the last delivered report is accurate again.
    notifier.fail.store(false, Ordering::SeqCst);
    api.set("prod", Script::Tree(json!({"Backend": {"status": 200}})));
    let outcome = monitor.run_cycle(&api, &notifier).await;

    assert_eq!(outcome.dispatch, DispatchOutcome::Suppressed);
    assert_eq!(notifier.count(), 1);
    assert!(monitor.pending().is_empty());
}

#[tokio::test]
async fn test_service_named_like_a_failure_class_still_alerts() {
    let api = ScriptedApi::default();
    let notifier = RecordingNotifier::default();
    let mut monitor = Monitor::new(vec![environment("prod", 1, &[])], FullStateFlag::new(false));

    api.set("prod", Script::Tree(json!({"LoginError": {"status": 500}})));
    let mut alerts = Vec::new();
    for _ in 0..5 {
        alerts.push(monitor.run_cycle(&api, &notifier).await.alerts);
    }

    assert_eq!(alerts, vec![0, 1, 0, 0, 0]);
    assert_eq!(monitor.tracker().count("prod", "LoginError"), 5);
    assert_eq!(monitor.tracker().class_count("prod", FailureClass::LoginError), 0);
    assert_eq!(notifier.count(), 1);
}
