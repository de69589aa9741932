//! Error types for the AMAN agent.

use thiserror::Error;

/// Result type alias using the agent's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the agent.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Command Errors
    // =========================================================================
    #[error("Empty command")]
    EmptyCommand,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    // =========================================================================
    // Module Errors
    // =========================================================================
    #[error("Module download failed: {0}")]
    ModuleDownload(String),

    #[error("Module checksum mismatch: {0}")]
    ModuleChecksum(String),

    #[error("Module sandbox test failed: {0}")]
    ModuleSandbox(String),

    #[error("Module limit reached")]
    ModuleCapacity,

    #[error("Module execution timed out: {0}")]
    ModuleTimeout(String),

    #[error("No module handles command: {0}")]
    ModuleUnhandled(String),

    #[error("Module load failed: {0}")]
    ModuleLoad(String),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an unauthorized error.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create an execution error.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a module download error.
    pub fn module_download(msg: impl Into<String>) -> Self {
        Self::ModuleDownload(msg.into())
    }

    /// Create a module load error.
    pub fn module_load(msg: impl Into<String>) -> Self {
        Self::ModuleLoad(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error may be surfaced verbatim to the sender.
    ///
    /// Module errors are shown only to the master who issued the operation;
    /// authorization failures never explain themselves.
    pub fn is_module_error(&self) -> bool {
        matches!(
            self,
            Self::ModuleDownload(_)
                | Self::ModuleChecksum(_)
                | Self::ModuleSandbox(_)
                | Self::ModuleCapacity
                | Self::ModuleTimeout(_)
                | Self::ModuleUnhandled(_)
                | Self::ModuleLoad(_)
        )
    }
}
