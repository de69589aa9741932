//! Command dispatch: inbound prefix gate, bounded FIFO queue, the dispatcher
//! state machine, built-in handlers, and the background loops.

pub mod builtin;
pub mod dispatcher;
pub mod engine;
pub mod inbound;
pub mod queue;

pub use dispatcher::Dispatcher;
pub use engine::AgentEngine;
pub use inbound::{classify, Inbound};
pub use queue::CommandQueue;
