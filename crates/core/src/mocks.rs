//! In-memory collaborator implementations.
//!
//! Used by tests across the workspace and as default wiring when no platform
//! integration is configured.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::traits::{Authorizer, Camera, CameraFacing, CommandLog, CommandModule, ModuleHost, Transport};
use crate::types::{CommandLogRecord, ModuleLogRecord, ParamMap};

// =============================================================================
// Authorizer
// =============================================================================

/// In-memory authorization store.
#[derive(Default)]
pub struct MemoryAuthorizer {
    master: Mutex<Option<String>>,
    authorized: Mutex<HashSet<String>>,
    paused: AtomicBool,
}

impl MemoryAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a master and delegate list, e.g. from config.
    pub fn with_master(master: impl Into<String>) -> Self {
        let auth = Self::new();
        let master = master.into();
        auth.authorized.lock().unwrap().insert(master.clone());
        *auth.master.lock().unwrap() = Some(master);
        auth
    }

    pub fn seed_authorized(&self, identities: &[String]) {
        let mut set = self.authorized.lock().unwrap();
        for id in identities {
            set.insert(id.clone());
        }
    }
}

#[async_trait]
impl Authorizer for MemoryAuthorizer {
    async fn is_master(&self, identity: &str) -> bool {
        self.master.lock().unwrap().as_deref() == Some(identity)
    }

    async fn is_authorized(&self, identity: &str) -> bool {
        if self.master.lock().unwrap().as_deref() == Some(identity) {
            return true;
        }
        self.authorized.lock().unwrap().contains(identity)
    }

    async fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    async fn add_authorized(&self, identity: &str) {
        self.authorized.lock().unwrap().insert(identity.to_string());
    }

    async fn remove_authorized(&self, identity: &str) -> bool {
        self.authorized.lock().unwrap().remove(identity)
    }

    async fn authorized_list(&self) -> Vec<String> {
        let mut list: Vec<String> = self.authorized.lock().unwrap().iter().cloned().collect();
        list.sort();
        list
    }

    async fn has_master(&self) -> bool {
        self.master.lock().unwrap().is_some()
    }

    async fn try_set_master(&self, identity: &str) -> bool {
        let mut master = self.master.lock().unwrap();
        if master.is_some() {
            return false;
        }
        *master = Some(identity.to_string());
        self.authorized.lock().unwrap().insert(identity.to_string());
        true
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Transport that records outbound sends instead of delivering them.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail, to exercise best-effort paths.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, recipient: &str, text: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::transport("mock transport configured to fail"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }
}

// =============================================================================
// Persistence
// =============================================================================

/// Command log kept in memory.
#[derive(Default)]
pub struct MemoryCommandLog {
    commands: Mutex<Vec<CommandLogRecord>>,
    modules: Mutex<Vec<ModuleLogRecord>>,
    fail: AtomicBool,
}

impl MemoryCommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<CommandLogRecord> {
        self.commands.lock().unwrap().clone()
    }

    pub fn module_events(&self) -> Vec<ModuleLogRecord> {
        self.modules.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandLog for MemoryCommandLog {
    async fn append_command(&self, record: CommandLogRecord) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::storage("mock log configured to fail"));
        }
        self.commands.lock().unwrap().push(record);
        Ok(())
    }

    async fn append_module(&self, record: ModuleLogRecord) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::storage("mock log configured to fail"));
        }
        self.modules.lock().unwrap().push(record);
        Ok(())
    }
}

// =============================================================================
// Camera
// =============================================================================

/// Camera that returns a fixed payload.
#[derive(Default)]
pub struct MockCamera {
    captures: AtomicUsize,
}

impl MockCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Camera for MockCamera {
    async fn capture(&self, _facing: CameraFacing, _quality: u8) -> Result<Bytes> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from_static(b"\xff\xd8\xff\xe0mock-jpeg-payload"))
    }
}

// =============================================================================
// Modules
// =============================================================================

/// A scripted module with observable lifecycle counters.
pub struct ScriptedModule {
    pub name: String,
    pub version: String,
    pub commands: Vec<String>,
    /// Fixed response; the action is appended when empty.
    pub response: String,
    /// Artificial execution delay, for timeout tests.
    pub execute_delay: Duration,
    /// Artificial initialization delay, for sandbox timeout tests.
    pub init_delay: Duration,
    pub fail_initialize: bool,
    pub initialized: AtomicUsize,
    pub executed: AtomicUsize,
    pub cleaned_up: Arc<AtomicUsize>,
}

impl ScriptedModule {
    pub fn new(name: impl Into<String>, commands: Vec<&str>) -> Self {
        Self {
            name: name.into(),
            version: "1.0".into(),
            commands: commands.into_iter().map(String::from).collect(),
            response: String::new(),
            execute_delay: Duration::ZERO,
            init_delay: Duration::ZERO,
            fail_initialize: false,
            initialized: AtomicUsize::new(0),
            executed: AtomicUsize::new(0),
            cleaned_up: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = delay;
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Handle shared with the module, surviving its unload.
    pub fn cleanup_counter(&self) -> Arc<AtomicUsize> {
        self.cleaned_up.clone()
    }
}

#[async_trait]
impl CommandModule for ScriptedModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> String {
        self.version.clone()
    }

    fn supported_commands(&self) -> Vec<String> {
        self.commands.clone()
    }

    fn can_handle(&self, action: &str) -> bool {
        self.commands.iter().any(|c| c == action)
    }

    async fn initialize(&self, _config: Option<Value>) -> Result<()> {
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        if self.fail_initialize {
            return Err(Error::module_load("scripted initialize failure"));
        }
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, action: &str, _parameters: &ParamMap, _sender: &str) -> Result<String> {
        if !self.execute_delay.is_zero() {
            tokio::time::sleep(self.execute_delay).await;
        }
        self.executed.fetch_add(1, Ordering::SeqCst);
        if self.response.is_empty() {
            Ok(format!("{} handled {}", self.name, action))
        } else {
            Ok(self.response.clone())
        }
    }

    async fn cleanup(&self) -> Result<()> {
        self.cleaned_up.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Module host that serves pre-scripted modules keyed by name.
///
/// Unknown names fall back to an echo module handling a single command equal
/// to the module name.
#[derive(Default)]
pub struct MockModuleHost {
    scripted: Mutex<HashMap<String, Arc<dyn CommandModule>>>,
    fail_for: Mutex<HashSet<String>>,
}

impl MockModuleHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, name: impl Into<String>, module: Arc<dyn CommandModule>) {
        self.scripted.lock().unwrap().insert(name.into(), module);
    }

    /// Make instantiation fail for the given module name.
    pub fn fail_for(&self, name: impl Into<String>) {
        self.fail_for.lock().unwrap().insert(name.into());
    }
}

impl ModuleHost for MockModuleHost {
    fn instantiate(
        &self,
        name: &str,
        _artifact_path: &Path,
        _bytes: &[u8],
    ) -> Result<Arc<dyn CommandModule>> {
        if self.fail_for.lock().unwrap().contains(name) {
            return Err(Error::module_load(format!(
                "mock host configured to fail for '{}'",
                name
            )));
        }
        if let Some(module) = self.scripted.lock().unwrap().get(name) {
            return Ok(module.clone());
        }
        Ok(Arc::new(ScriptedModule::new(name, vec![name])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn master_registration_is_one_time() {
        let auth = MemoryAuthorizer::new();
        assert!(!auth.has_master().await);
        assert!(auth.try_set_master("111").await);
        assert!(!auth.try_set_master("222").await);
        assert!(auth.is_master("111").await);
        assert!(auth.is_authorized("111").await);
        assert!(!auth.is_authorized("222").await);
    }

    #[tokio::test]
    async fn scripted_module_counts_lifecycle() {
        let module = ScriptedModule::new("weather", vec!["weather"]);
        let cleanups = module.cleanup_counter();

        module.initialize(None).await.unwrap();
        let out = module.execute("weather", &ParamMap::new(), "111").await.unwrap();
        assert!(out.contains("weather"));
        module.cleanup().await.unwrap();

        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }
}
