//! The command state machine.
//!
//! Each command moves through RECEIVED → AUTHORIZING → VALIDATING →
//! EXECUTING → LOGGED → RESPONDED, terminal on success or any failure. No
//! retries: the originator must resend. Nothing in here may crash the drain
//! loop; every handler fault is caught at the EXECUTING boundary.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::watch;

use aman_core::config::AppConfig;
use aman_core::traits::{Authorizer, Camera, CommandLog, Transport};
use aman_core::types::{
    CommandLogRecord, HandlerResult, ParsedCommand, PendingCommand, SourceChannel,
};
use aman_core::Error;
use aman_modules::{ModuleFetcher, ModuleRegistry};

/// Actions reserved to the master identity, with the denial text returned to
/// an authorized-but-non-master sender.
const MASTER_ONLY: &[(&str, &str)] = &[
    ("add_number", "Unauthorized: Only master can manage numbers"),
    ("remove_number", "Unauthorized: Only master can manage numbers"),
    ("list_numbers", "Unauthorized: Only master can manage numbers"),
    ("load_module", "Unauthorized: Only master can load modules"),
    ("update", "Unauthorized: Only master can update the agent"),
    ("shutdown", "Unauthorized: Only master can shut down the agent"),
];

pub struct Dispatcher {
    pub(crate) authorizer: Arc<dyn Authorizer>,
    sms_transport: Arc<dyn Transport>,
    app_transport: Arc<dyn Transport>,
    pub(crate) camera: Arc<dyn Camera>,
    log: Arc<dyn CommandLog>,
    pub(crate) registry: Arc<ModuleRegistry>,
    /// Learned command aliases: name → stored command text.
    pub(crate) learned: DashMap<String, String>,
    pub(crate) update_fetcher: ModuleFetcher,
    pub(crate) update_dir: String,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) started_at: Instant,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &AppConfig,
        authorizer: Arc<dyn Authorizer>,
        sms_transport: Arc<dyn Transport>,
        app_transport: Arc<dyn Transport>,
        camera: Arc<dyn Camera>,
        log: Arc<dyn CommandLog>,
        registry: Arc<ModuleRegistry>,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            authorizer,
            sms_transport,
            app_transport,
            camera,
            log,
            registry,
            learned: DashMap::new(),
            update_fetcher: ModuleFetcher::new(&config.modules.download),
            update_dir: config.modules.update_dir.clone(),
            shutdown,
            started_at: Instant::now(),
        }
    }

    /// A receiver observing the shutdown flag flipped by the `shutdown`
    /// built-in.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Set the shutdown flag from outside the command path, e.g. on SIGINT
    /// or input EOF.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub(crate) fn transport_for(&self, source: SourceChannel) -> &Arc<dyn Transport> {
        match source {
            SourceChannel::Sms => &self.sms_transport,
            SourceChannel::MessagingApp => &self.app_transport,
        }
    }

    /// Process one dequeued command to completion: authorize, validate,
    /// execute, log, respond.
    pub async fn process(&self, pending: PendingCommand) {
        // RECEIVED → AUTHORIZING is immediate; parsing first so authorization
        // failures can be attributed to an action in the security log.
        let Some(parsed) = aman_command::parse(&pending.command) else {
            tracing::trace!(sender = %pending.sender, "Empty command ignored");
            return;
        };

        // AUTHORIZING: fails closed, reveals nothing to the sender.
        if !self.authorizer.is_authorized(&pending.sender).await {
            tracing::warn!(
                sender = %pending.sender,
                action = %parsed.action,
                "Unauthorized command rejected"
            );
            metrics::counter!("aman_unauthorized_total").increment(1);
            return;
        }

        // Pause gate: a paused agent drops everything except unpause/resume,
        // with no log entry and no response.
        if self.authorizer.is_paused().await
            && !matches!(parsed.action.as_str(), "unpause" | "resume")
        {
            tracing::debug!(action = %parsed.action, "Agent paused, command dropped");
            return;
        }

        if let Some(denial) = self.master_denial(&parsed, &pending.sender).await {
            self.finish(&pending, &parsed, false, 0, Some(denial.to_string()), {
                HandlerResult::respond(denial)
            })
            .await;
            return;
        }

        // VALIDATING: invalid parameters short-circuit to a usage message.
        let verdict = aman_command::validate(&parsed.action, &parsed.parameters);
        if !verdict.valid {
            self.finish(
                &pending,
                &parsed,
                false,
                0,
                Some(verdict.message.clone()),
                HandlerResult::respond(verdict.message),
            )
            .await;
            return;
        }

        // EXECUTING: faults are caught here and converted, never propagated.
        let started = Instant::now();
        let outcome = self
            .execute_action(&parsed, &pending.sender, pending.source, false)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (result, success, error) = match outcome {
            Ok(result) => (result, true, None),
            Err(e) => {
                let text = user_facing_error(&e);
                tracing::debug!(action = %parsed.action, error = %e, "Command execution failed");
                (HandlerResult::respond(text), false, Some(e.to_string()))
            }
        };

        self.finish(&pending, &parsed, success, elapsed_ms, error, result)
            .await;
    }

    pub(crate) async fn master_denial(
        &self,
        parsed: &ParsedCommand,
        sender: &str,
    ) -> Option<&'static str> {
        let denial = MASTER_ONLY
            .iter()
            .find(|(action, _)| *action == parsed.action)
            .map(|(_, denial)| *denial)?;
        if self.authorizer.is_master(sender).await {
            None
        } else {
            Some(denial)
        }
    }

    /// LOGGED then RESPONDED. The log write is best-effort; a response send
    /// failure is logged and swallowed.
    async fn finish(
        &self,
        pending: &PendingCommand,
        parsed: &ParsedCommand,
        success: bool,
        elapsed_ms: u64,
        error: Option<String>,
        result: HandlerResult,
    ) {
        metrics::counter!("aman_commands_processed_total").increment(1);

        let record = CommandLogRecord::new(
            parsed.action.clone(),
            pending.sender.clone(),
            pending.source,
            success,
            elapsed_ms,
            error,
        );
        if let Err(e) = self.log.append_command(record).await {
            tracing::warn!(action = %parsed.action, error = %e, "Command log append failed");
        }

        if result.should_respond && !result.message.is_empty() {
            let transport = self.transport_for(pending.source);
            if let Err(e) = transport.send(&pending.sender, &result.message).await {
                tracing::warn!(
                    recipient = %pending.sender,
                    error = %e,
                    "Response send failed"
                );
            }
        }
    }
}

/// Map an execution error to the text shown to the sender.
fn user_facing_error(error: &Error) -> String {
    match error {
        Error::ModuleUnhandled(action) => format!("Unknown command: {}", action),
        Error::ModuleTimeout(action) => format!("Command timed out: {}", action),
        e if e.is_module_error() => e.to_string(),
        Error::Unauthorized(msg) => format!("Unauthorized: {}", msg),
        e => format!("Error: {}", e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use aman_core::config::AppConfig;
    use aman_core::mocks::{
        MemoryAuthorizer, MemoryCommandLog, MemoryTransport, MockCamera, MockModuleHost,
    };
    use aman_core::traits::ModuleHost;

    pub(crate) struct Fixture {
        pub dispatcher: Dispatcher,
        pub authorizer: Arc<MemoryAuthorizer>,
        pub transport: Arc<MemoryTransport>,
        pub log: Arc<MemoryCommandLog>,
        pub camera: Arc<MockCamera>,
        pub host: Arc<MockModuleHost>,
        pub shutdown_rx: watch::Receiver<bool>,
        pub _dir: tempfile::TempDir,
    }

    pub(crate) fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.modules.module_dir = dir.path().join("modules").to_string_lossy().into_owned();
        config.modules.update_dir = dir.path().join("updates").to_string_lossy().into_owned();

        let authorizer = Arc::new(MemoryAuthorizer::with_master("master"));
        authorizer.seed_authorized(&["delegate".to_string()]);
        let transport = Arc::new(MemoryTransport::new());
        let log = Arc::new(MemoryCommandLog::new());
        let camera = Arc::new(MockCamera::new());
        let host = Arc::new(MockModuleHost::new());
        let registry = Arc::new(ModuleRegistry::new(
            config.modules.clone(),
            config.sandbox.clone(),
            host.clone() as Arc<dyn ModuleHost>,
            log.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = Dispatcher::new(
            &config,
            authorizer.clone(),
            transport.clone(),
            transport.clone(),
            camera.clone(),
            log.clone(),
            registry,
            shutdown_tx,
        );

        Fixture {
            dispatcher,
            authorizer,
            transport,
            log,
            camera,
            host,
            shutdown_rx,
            _dir: dir,
        }
    }

    pub(crate) fn pending(command: &str, sender: &str) -> PendingCommand {
        PendingCommand::new(command, sender, SourceChannel::Sms)
    }

    #[tokio::test]
    async fn empty_command_is_silently_ignored() {
        let f = fixture();
        f.dispatcher.process(pending("   ", "master")).await;
        assert_eq!(f.transport.sent_count(), 0);
        assert!(f.log.commands().is_empty());
    }

    #[tokio::test]
    async fn unauthorized_sender_gets_nothing() {
        let f = fixture();
        f.dispatcher.process(pending("status", "stranger")).await;
        assert_eq!(f.transport.sent_count(), 0);
        assert!(f.log.commands().is_empty());
    }

    #[tokio::test]
    async fn sms_scenario_executes_logs_and_responds() {
        let f = fixture();
        f.dispatcher
            .process(pending("sms to=15551234567 message=Hello", "delegate"))
            .await;

        let sent = f.transport.sent();
        // one outbound SMS plus one response to the sender
        assert!(sent.contains(&("15551234567".to_string(), "Hello".to_string())));
        assert!(sent.contains(&(
            "delegate".to_string(),
            "SMS sent to 15551234567".to_string()
        )));

        let records = f.log.commands();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "sms");
        assert!(records[0].success);
    }

    #[tokio::test]
    async fn validation_failure_returns_usage_message() {
        let f = fixture();
        f.dispatcher.process(pending("sms message=Hi", "delegate")).await;

        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Usage: sms"));
        let records = f.log.commands();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
    }

    #[tokio::test]
    async fn master_only_action_denied_for_delegate() {
        let f = fixture();
        f.dispatcher
            .process(pending(
                "load_module name=Weather url=http://x/weather.pkg",
                "delegate",
            ))
            .await;

        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Unauthorized: Only master can load modules");
        // no module was registered, no fetch was attempted
        assert!(f.dispatcher.registry.is_empty());
    }

    #[tokio::test]
    async fn master_only_denial_is_logged_as_failure() {
        let f = fixture();
        f.dispatcher.process(pending("shutdown", "delegate")).await;
        let records = f.log.commands();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert!(!*f.shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn pause_gate_drops_without_log_or_response() {
        let f = fixture();
        f.authorizer.set_paused(true).await;

        f.dispatcher.process(pending("status", "delegate")).await;
        assert_eq!(f.transport.sent_count(), 0);
        assert!(f.log.commands().is_empty());

        f.dispatcher.process(pending("resume", "delegate")).await;
        assert!(!f.authorizer.is_paused().await);
        assert_eq!(f.transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn unknown_action_without_module_reports_unknown_command() {
        let f = fixture();
        f.dispatcher
            .process(pending("unknowncmd foo=bar", "delegate"))
            .await;

        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Unknown command: unknowncmd");
        let records = f.log.commands();
        assert!(!records[0].success);
    }

    #[tokio::test]
    async fn log_failure_does_not_fail_command() {
        let f = fixture();
        f.log.set_failing(true);
        f.dispatcher.process(pending("status", "master")).await;
        // response still goes out
        assert_eq!(f.transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn transport_failure_is_swallowed() {
        let f = fixture();
        f.transport.set_failing(true);
        f.dispatcher.process(pending("status", "master")).await;
        let records = f.log.commands();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
    }
}
