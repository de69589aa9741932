//! End-to-end flows through the engine with in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use aman_core::config::AppConfig;
use aman_core::mocks::{
    MemoryAuthorizer, MemoryCommandLog, MemoryTransport, MockCamera, MockModuleHost,
};
use aman_core::traits::Authorizer;
use aman_core::types::SourceChannel;
use aman_dispatch::{AgentEngine, Dispatcher};
use aman_modules::ModuleRegistry;

struct Harness {
    engine: AgentEngine,
    handles: Vec<tokio::task::JoinHandle<()>>,
    authorizer: Arc<MemoryAuthorizer>,
    transport: Arc<MemoryTransport>,
    log: Arc<MemoryCommandLog>,
    _dir: tempfile::TempDir,
}

fn harness(master: Option<&str>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.modules.module_dir = dir.path().join("modules").to_string_lossy().into_owned();
    config.modules.update_dir = dir.path().join("updates").to_string_lossy().into_owned();

    let authorizer = Arc::new(match master {
        Some(m) => MemoryAuthorizer::with_master(m),
        None => MemoryAuthorizer::new(),
    });
    let transport = Arc::new(MemoryTransport::new());
    let log = Arc::new(MemoryCommandLog::new());
    let registry = Arc::new(ModuleRegistry::new(
        config.modules.clone(),
        config.sandbox.clone(),
        Arc::new(MockModuleHost::new()),
        log.clone(),
    ));
    let (shutdown_tx, _) = watch::channel(false);
    let dispatcher = Arc::new(Dispatcher::new(
        &config,
        authorizer.clone(),
        transport.clone(),
        transport.clone(),
        Arc::new(MockCamera::new()),
        log.clone(),
        registry,
        shutdown_tx,
    ));

    let (engine, rx) = AgentEngine::new(&config, authorizer.clone(), dispatcher);
    let handles = engine.start(rx);

    Harness {
        engine,
        handles,
        authorizer,
        transport,
        log,
        _dir: dir,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

#[tokio::test]
async fn setup_registers_master_who_can_then_command() {
    let h = harness(None);

    // before setup, nobody is authorized and nothing comes back
    h.engine
        .submit("AMAN:status", "111", SourceChannel::Sms)
        .await;

    h.engine
        .submit("AMAN_SETUP:SET_MASTER", "111", SourceChannel::Sms)
        .await;
    assert!(h.authorizer.is_master("111").await);

    h.engine
        .submit("AMAN:status", "111", SourceChannel::Sms)
        .await;

    let transport = h.transport.clone();
    wait_until(move || transport.sent_count() == 1).await;
    let sent = h.transport.sent();
    assert_eq!(sent[0].0, "111");
    assert!(sent[0].1.contains("AMAN agent"));
}

#[tokio::test]
async fn sms_command_sends_logs_and_responds() {
    let h = harness(Some("master"));
    h.authorizer.seed_authorized(&["delegate".to_string()]);

    h.engine
        .submit(
            "AMAN:sms to=15551234567 message=Hello",
            "delegate",
            SourceChannel::Sms,
        )
        .await;

    let transport = h.transport.clone();
    wait_until(move || transport.sent_count() == 2).await;
    let sent = h.transport.sent();
    assert!(sent.contains(&("15551234567".to_string(), "Hello".to_string())));
    assert!(sent.contains(&(
        "delegate".to_string(),
        "SMS sent to 15551234567".to_string()
    )));

    let records = h.log.commands();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, "sms");
    assert!(records[0].success);
}

#[tokio::test]
async fn pause_gate_holds_until_resume() {
    let h = harness(Some("master"));

    h.engine.submit("AMAN:pause", "master", SourceChannel::Sms).await;
    let transport = h.transport.clone();
    wait_until(move || transport.sent_count() == 1).await;

    // dropped while paused: no response, no log entry
    h.engine.submit("AMAN:status", "master", SourceChannel::Sms).await;
    h.engine.submit("AMAN:resume", "master", SourceChannel::Sms).await;

    let transport = h.transport.clone();
    wait_until(move || transport.sent_count() == 2).await;
    let sent = h.transport.sent();
    assert_eq!(sent[0].1, "Agent paused");
    assert_eq!(sent[1].1, "Agent resumed");

    let actions: Vec<String> = h.log.commands().iter().map(|r| r.action.clone()).collect();
    assert_eq!(actions, vec!["pause".to_string(), "resume".to_string()]);
}

#[tokio::test]
async fn learned_command_runs_stored_action() {
    let h = harness(Some("master"));

    h.engine
        .submit(
            "AMAN:learn command=check action=status",
            "master",
            SourceChannel::Sms,
        )
        .await;
    h.engine.submit("AMAN:check", "master", SourceChannel::Sms).await;

    let transport = h.transport.clone();
    wait_until(move || transport.sent_count() == 2).await;
    let sent = h.transport.sent();
    assert_eq!(sent[0].1, "Learned command 'check'");
    assert!(sent[1].1.contains("AMAN agent"));
}

#[tokio::test]
async fn shutdown_command_stops_background_loops() {
    let h = harness(Some("master"));

    h.engine.submit("AMAN:shutdown", "master", SourceChannel::Sms).await;

    let transport = h.transport.clone();
    wait_until(move || transport.sent_count() == 1).await;
    assert_eq!(h.transport.sent()[0].1, "Shutting down");

    for handle in h.handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not stop")
            .expect("loop panicked");
    }
}
