//! The agent engine: inbound intake plus the background loops.
//!
//! `submit` is the single entry point for raw inbound messages from any
//! channel. `start` spawns the drain, monitor, and maintenance loops; the
//! monitor and maintenance loops are supervised and restart with a backoff
//! if they abort.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use aman_core::config::{AgentConfig, AppConfig, DispatchConfig};
use aman_core::traits::Authorizer;
use aman_core::types::{PendingCommand, SourceChannel};

use crate::dispatcher::Dispatcher;
use crate::inbound::{classify, Inbound};
use crate::queue::CommandQueue;

pub struct AgentEngine {
    agent: AgentConfig,
    dispatch: DispatchConfig,
    authorizer: Arc<dyn Authorizer>,
    dispatcher: Arc<Dispatcher>,
    queue: CommandQueue,
}

impl AgentEngine {
    /// Build the engine and its command queue. The returned receiver feeds
    /// the drain loop and must be handed to `start`.
    pub fn new(
        config: &AppConfig,
        authorizer: Arc<dyn Authorizer>,
        dispatcher: Arc<Dispatcher>,
    ) -> (Self, mpsc::Receiver<PendingCommand>) {
        let (queue, rx) = CommandQueue::bounded(config.dispatch.queue_capacity);
        (
            Self {
                agent: config.agent.clone(),
                dispatch: config.dispatch.clone(),
                authorizer,
                dispatcher,
                queue,
            },
            rx,
        )
    }

    /// Accept one raw inbound message from a channel.
    ///
    /// Non-prefixed text is ignored. The setup message registers the sender
    /// as master exactly once, with no acknowledgement either way. Prefixed
    /// commands are enqueued; a full queue drops the command.
    pub async fn submit(&self, raw: &str, sender: &str, source: SourceChannel) {
        match classify(raw, &self.agent) {
            Inbound::Setup => {
                if self.authorizer.try_set_master(sender).await {
                    tracing::info!(sender = %sender, "Master registered");
                } else {
                    tracing::debug!(sender = %sender, "Setup ignored, master already set");
                }
            }
            Inbound::Command(text) => {
                self.queue.submit(PendingCommand::new(text, sender, source));
            }
            Inbound::Ignored => {
                tracing::trace!(sender = %sender, "Non-command message ignored");
            }
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Spawn the drain, monitor, and maintenance loops. The handles resolve
    /// once the shutdown flag is set.
    pub fn start(&self, rx: mpsc::Receiver<PendingCommand>) -> Vec<JoinHandle<()>> {
        let backoff = Duration::from_millis(self.dispatch.error_backoff_ms);

        let drain = tokio::spawn(drain_loop(self.dispatcher.clone(), rx));

        let monitor = {
            let dispatcher = self.dispatcher.clone();
            let queue = self.queue.clone();
            let interval = Duration::from_millis(self.dispatch.monitor_interval_ms);
            spawn_supervised("monitor", backoff, dispatcher.shutdown_signal(), move || {
                monitor_loop(dispatcher.clone(), queue.clone(), interval)
            })
        };

        let maintenance = {
            let dispatcher = self.dispatcher.clone();
            let interval = Duration::from_millis(self.dispatch.maintenance_interval_ms);
            spawn_supervised("maintenance", backoff, dispatcher.shutdown_signal(), move || {
                maintenance_loop(dispatcher.clone(), interval)
            })
        };

        vec![drain, monitor, maintenance]
    }
}

/// Pull commands off the queue one at a time, in arrival order. The
/// dispatcher catches handler faults, so one bad command never stops the
/// drain.
async fn drain_loop(dispatcher: Arc<Dispatcher>, mut rx: mpsc::Receiver<PendingCommand>) {
    let mut shutdown = dispatcher.shutdown_signal();
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            pending = rx.recv() => {
                let Some(pending) = pending else { break };
                dispatcher.process(pending).await;
            }
        }
    }
    tracing::info!("Drain loop stopped");
}

/// Periodic health pass: artifact integrity and queue depth.
async fn monitor_loop(dispatcher: Arc<Dispatcher>, queue: CommandQueue, interval: Duration) {
    let mut shutdown = dispatcher.shutdown_signal();
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tick.tick() => {
                let tampered = dispatcher.registry.verify_integrity().await;
                if !tampered.is_empty() {
                    tracing::warn!(modules = ?tampered, "Unloaded tampered modules");
                }
                metrics::gauge!("aman_queue_depth").set(queue.depth() as f64);
                let paused = dispatcher.authorizer.is_paused().await;
                tracing::debug!(
                    paused,
                    queue_depth = queue.depth(),
                    modules = dispatcher.registry.len(),
                    "Agent heartbeat"
                );
            }
        }
    }
    tracing::info!("Monitor loop stopped");
}

/// Periodic idle-module eviction.
async fn maintenance_loop(dispatcher: Arc<Dispatcher>, interval: Duration) {
    let mut shutdown = dispatcher.shutdown_signal();
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tick.tick() => {
                let evicted = dispatcher.registry.evict_idle().await;
                if !evicted.is_empty() {
                    tracing::info!(modules = ?evicted, "Evicted idle modules");
                }
            }
        }
    }
    tracing::info!("Maintenance loop stopped");
}

/// Run a loop future, restarting it after a backoff if its task aborts. A
/// clean return ends supervision.
fn spawn_supervised<F, Fut>(
    name: &'static str,
    backoff: Duration,
    shutdown: watch::Receiver<bool>,
    factory: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match tokio::spawn(factory()).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::error!(task = name, error = %e, "Background loop aborted, restarting");
                    tokio::time::sleep(backoff).await;
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::tests::fixture;
    use aman_core::config::AppConfig;
    use aman_core::mocks::MemoryAuthorizer;

    #[tokio::test]
    async fn setup_message_registers_master_once() {
        let authorizer = Arc::new(MemoryAuthorizer::new());
        let f = fixture();
        let config = AppConfig::default();
        let (engine, _rx) = AgentEngine::new(
            &config,
            authorizer.clone(),
            Arc::new(f.dispatcher),
        );

        engine
            .submit("AMAN_SETUP:SET_MASTER", "111", SourceChannel::Sms)
            .await;
        assert!(authorizer.is_master("111").await);

        engine
            .submit("AMAN_SETUP:SET_MASTER", "222", SourceChannel::Sms)
            .await;
        assert!(authorizer.is_master("111").await);
        assert!(!authorizer.is_master("222").await);
    }

    #[tokio::test]
    async fn prefixed_command_is_enqueued_with_prefix_stripped() {
        let f = fixture();
        let config = AppConfig::default();
        let authorizer = f.authorizer.clone();
        let (engine, mut rx) = AgentEngine::new(&config, authorizer, Arc::new(f.dispatcher));

        engine
            .submit("AMAN:status", "master", SourceChannel::MessagingApp)
            .await;
        engine.submit("just chatting", "master", SourceChannel::Sms).await;

        let queued = rx.recv().await.unwrap();
        assert_eq!(queued.command, "status");
        assert_eq!(queued.source, SourceChannel::MessagingApp);
        assert_eq!(engine.queue_depth(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drain_loop_processes_to_completion() {
        let f = fixture();
        let config = AppConfig::default();
        let authorizer = f.authorizer.clone();
        let transport = f.transport.clone();
        let (engine, rx) = AgentEngine::new(&config, authorizer, Arc::new(f.dispatcher));
        let handles = engine.start(rx);

        engine.submit("AMAN:status", "master", SourceChannel::Sms).await;

        let mut waited = 0u32;
        while transport.sent_count() == 0 && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("AMAN agent"));

        engine.submit("AMAN:shutdown", "master", SourceChannel::Sms).await;
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
