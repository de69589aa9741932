//! Core types, traits, and error definitions for the AMAN agent.
//!
//! This crate provides the foundational building blocks shared across the
//! command, module, and dispatch layers of the agent.

pub mod audit;
pub mod config;
pub mod error;
pub mod mocks;
pub mod tracing_setup;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use tracing_setup::configure_tracing;
pub use traits::*;
pub use types::*;
