//! Bounded multi-producer/single-consumer command queue.

use tokio::sync::mpsc;

use aman_core::types::PendingCommand;

/// Producer side of the pending-command FIFO. Commands arriving while the
/// queue is full are dropped and logged, never retried.
#[derive(Clone)]
pub struct CommandQueue {
    tx: mpsc::Sender<PendingCommand>,
    capacity: usize,
}

impl CommandQueue {
    /// Create the queue, returning the producer handle and the single
    /// consumer receiver for the drain loop.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<PendingCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                capacity: capacity.max(1),
            },
            rx,
        )
    }

    /// Enqueue a command. Returns false if the queue was full or closed.
    pub fn submit(&self, command: PendingCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => {
                metrics::counter!("aman_commands_enqueued_total").increment(1);
                true
            }
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::warn!(
                    sender = %dropped.sender,
                    "Command queue full, dropping command"
                );
                metrics::counter!("aman_commands_dropped_total").increment(1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Command queue closed, dropping command");
                false
            }
        }
    }

    /// Commands currently waiting.
    pub fn depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aman_core::types::SourceChannel;

    fn cmd(text: &str) -> PendingCommand {
        PendingCommand::new(text, "111", SourceChannel::Sms)
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let (queue, mut rx) = CommandQueue::bounded(4);
        assert!(queue.submit(cmd("first")));
        assert!(queue.submit(cmd("second")));

        assert_eq!(rx.recv().await.unwrap().command, "first");
        assert_eq!(rx.recv().await.unwrap().command, "second");
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (queue, _rx) = CommandQueue::bounded(1);
        assert!(queue.submit(cmd("kept")));
        assert!(!queue.submit(cmd("dropped")));
        assert_eq!(queue.depth(), 1);
    }
}
