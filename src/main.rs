//! AMAN agent binary.
//!
//! Wires the collaborators and runs a line-oriented harness on stdin: each
//! line is `sender|text`, and outbound messages are printed to stdout in
//! place of a real SMS or messaging-app gateway.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;

use aman_core::audit::FileCommandLog;
use aman_core::config::AppConfig;
use aman_core::mocks::{MemoryAuthorizer, MockCamera};
use aman_core::tracing_setup::configure_tracing;
use aman_core::traits::Transport;
use aman_core::types::SourceChannel;
use aman_dispatch::{AgentEngine, Dispatcher};
use aman_modules::{LibraryModuleHost, ModuleRegistry};

/// Prints outbound messages instead of delivering them.
struct ConsoleTransport {
    channel: &'static str,
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send(&self, recipient: &str, text: &str) -> aman_core::Result<()> {
        println!("[{}] -> {}: {}", self.channel, recipient, text);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config load failed ({}), falling back to defaults", e);
            AppConfig::default()
        }
    };
    configure_tracing(config.agent.json_logs)?;

    let authorizer = Arc::new(match &config.agent.master {
        Some(master) => MemoryAuthorizer::with_master(master.clone()),
        None => MemoryAuthorizer::new(),
    });
    authorizer.seed_authorized(&config.agent.authorized);

    let log = Arc::new(FileCommandLog::new(
        &config.agent.command_log_path,
        &config.agent.module_log_path,
    ));
    let registry = Arc::new(ModuleRegistry::new(
        config.modules.clone(),
        config.sandbox.clone(),
        Arc::new(LibraryModuleHost::new()),
        log.clone(),
    ));

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let dispatcher = Arc::new(Dispatcher::new(
        &config,
        authorizer.clone(),
        Arc::new(ConsoleTransport { channel: "sms" }),
        Arc::new(ConsoleTransport { channel: "app" }),
        Arc::new(MockCamera::new()),
        log,
        registry,
        shutdown_tx,
    ));

    let (engine, rx) = AgentEngine::new(&config, authorizer, dispatcher.clone());
    let handles = engine.start(rx);

    tracing::info!(
        prefix = %config.agent.command_prefix,
        "Agent started, reading sender|text lines from stdin"
    );

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                dispatcher.request_shutdown();
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let Some((sender, text)) = line.split_once('|') else {
                            tracing::warn!("Expected sender|text");
                            continue;
                        };
                        engine.submit(text.trim(), sender.trim(), SourceChannel::Sms).await;
                    }
                    None => {
                        tracing::info!("Input closed");
                        dispatcher.request_shutdown();
                    }
                }
            }
        }
    }

    for handle in handles {
        let _ = handle.await;
    }
    tracing::info!("Agent stopped");
    Ok(())
}
