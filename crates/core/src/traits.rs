//! Collaborator traits for the AMAN agent.
//!
//! These traits define the narrow seams through which the engine talks to
//! the outside world: the delivery transport, the authorization store, the
//! log persistence, device capabilities, and loaded modules.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::path::Path;

use crate::error::Result;
use crate::types::{CommandLogRecord, ModuleLogRecord, ParamMap};

// =============================================================================
// Transport
// =============================================================================

/// Outbound response delivery. Failures are logged, never escalated to the
/// sender.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, recipient: &str, text: &str) -> Result<()>;
}

// =============================================================================
// Authorization
// =============================================================================

/// Authorization state: master identity, delegate list, pause flag.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn is_master(&self, identity: &str) -> bool;

    /// Whether the identity may issue non-privileged commands. The master is
    /// always authorized.
    async fn is_authorized(&self, identity: &str) -> bool;

    async fn is_paused(&self) -> bool;
    async fn set_paused(&self, paused: bool);

    async fn add_authorized(&self, identity: &str);

    /// Returns true if the identity was present.
    async fn remove_authorized(&self, identity: &str) -> bool;

    async fn authorized_list(&self) -> Vec<String>;

    async fn has_master(&self) -> bool;

    /// One-time master registration. Succeeds only while no master is set.
    async fn try_set_master(&self, identity: &str) -> bool;
}

// =============================================================================
// Persistence
// =============================================================================

/// Append-only command and module logs. Best-effort: callers log a failed
/// append and move on.
#[async_trait]
pub trait CommandLog: Send + Sync {
    async fn append_command(&self, record: CommandLogRecord) -> Result<()>;
    async fn append_module(&self, record: ModuleLogRecord) -> Result<()>;
}

// =============================================================================
// Device capabilities
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFacing {
    Front,
    Back,
}

impl std::str::FromStr for CameraFacing {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "front" => Ok(CameraFacing::Front),
            "back" => Ok(CameraFacing::Back),
            _ => Err(()),
        }
    }
}

/// Narrow camera capability consumed by the `photo` built-in.
#[async_trait]
pub trait Camera: Send + Sync {
    async fn capture(&self, facing: CameraFacing, quality: u8) -> Result<Bytes>;
}

// =============================================================================
// Modules
// =============================================================================

/// The capability surface a loaded module must expose.
///
/// Implementations must tolerate concurrent `execute` calls; the registry may
/// let a timed-out execution keep running while serving the next command.
#[async_trait]
pub trait CommandModule: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> String;
    fn supported_commands(&self) -> Vec<String>;
    fn can_handle(&self, action: &str) -> bool;

    async fn initialize(&self, config: Option<Value>) -> Result<()>;
    async fn execute(&self, action: &str, parameters: &ParamMap, sender: &str) -> Result<String>;
    async fn cleanup(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn CommandModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandModule")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// Turns a verified module artifact into a live `CommandModule`.
///
/// The production host loads a dynamic library from `artifact_path`; the mock
/// host fabricates scripted modules for tests and sandbox probing.
pub trait ModuleHost: Send + Sync {
    fn instantiate(
        &self,
        name: &str,
        artifact_path: &Path,
        bytes: &[u8],
    ) -> Result<std::sync::Arc<dyn CommandModule>>;
}
