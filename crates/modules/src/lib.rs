//! Module subsystem: fetch, verify, sandbox-test, load, execute, evict.
//!
//! This crate owns the lifecycle of untrusted, dynamically fetched modules:
//! - `fetcher`: bounded HTTP download plus content checksum
//! - `sandbox`: pre-load testing of a candidate in a constrained context
//! - `registry`: the key-unique store of live modules
//! - `host`: dynamic-library instantiation behind the `ModuleHost` seam

pub mod fetcher;
pub mod host;
pub mod registry;
pub mod sandbox;

pub use fetcher::{checksum_hex, ModuleFetcher};
pub use host::LibraryModuleHost;
pub use registry::ModuleRegistry;
pub use sandbox::SandboxHarness;
