//! The module registry: fetch → verify → sandbox-test → activate → execute → evict.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aman_core::config::ModulesConfig;
use aman_core::traits::{CommandLog, CommandModule, ModuleHost};
use aman_core::types::{ModuleLogRecord, ModuleSummary, ParamMap};
use aman_core::{Error, Result};

use crate::fetcher::{checksum_hex, ModuleFetcher};
use crate::sandbox::SandboxHarness;

struct ModuleEntry {
    name: String,
    version: String,
    instance: Arc<dyn CommandModule>,
    load_time: DateTime<Utc>,
    checksum: String,
    artifact_path: PathBuf,
    last_used_at: Mutex<DateTime<Utc>>,
}

impl ModuleEntry {
    fn last_used(&self) -> DateTime<Utc> {
        *self.last_used_at.lock().unwrap()
    }

    fn touch(&self) {
        *self.last_used_at.lock().unwrap() = Utc::now();
    }
}

/// Key-unique store of live modules, safe for concurrent access from the
/// drain, monitor, and maintenance loops.
///
/// Execution scans modules in registration order; first `can_handle` match
/// wins. Loading under an existing name replaces the previous entry after
/// invoking its cleanup (last-load-wins).
pub struct ModuleRegistry {
    entries: DashMap<String, Arc<ModuleEntry>>,
    /// Registration order for the linear execute scan.
    order: Mutex<Vec<String>>,
    fetcher: ModuleFetcher,
    harness: SandboxHarness,
    host: Arc<dyn ModuleHost>,
    log: Arc<dyn CommandLog>,
    config: ModulesConfig,
}

impl ModuleRegistry {
    pub fn new(
        config: ModulesConfig,
        sandbox: aman_core::config::SandboxConfig,
        host: Arc<dyn ModuleHost>,
        log: Arc<dyn CommandLog>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(Vec::new()),
            fetcher: ModuleFetcher::new(&config.download),
            harness: SandboxHarness::new(host.clone(), sandbox),
            host,
            log,
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load a module from a remote URL. Returns the content checksum on
    /// success. Each step can fail the whole operation; nothing is registered
    /// until every step has passed.
    pub async fn load(&self, name: &str, url: &str) -> Result<String> {
        if self.entries.len() >= self.config.max_loaded
            && !self.config.capacity_override
            && !self.entries.contains_key(name)
        {
            return Err(Error::ModuleCapacity);
        }

        let bytes = self.fetcher.fetch(url).await?;
        let checksum = checksum_hex(&bytes);

        tokio::fs::create_dir_all(&self.config.module_dir)
            .await
            .map_err(|e| Error::module_load(format!("module dir: {}", e)))?;
        let artifact_path =
            PathBuf::from(&self.config.module_dir).join(format!("{}.pkg", sanitize(name)));
        tokio::fs::write(&artifact_path, &bytes)
            .await
            .map_err(|e| Error::module_load(format!("persist artifact: {}", e)))?;

        let report = self.harness.test(name, &bytes).await;
        for warning in &report.warnings {
            tracing::warn!(module = %name, warning = %warning, "Sandbox warning");
        }
        if !report.passed {
            let reason = report.error.unwrap_or_else(|| "sandbox test failed".into());
            self.log_event(name, "sandbox_rejected", &reason).await;
            return Err(Error::ModuleSandbox(reason));
        }

        let instance = self.host.instantiate(name, &artifact_path, &bytes)?;
        instance
            .initialize(None)
            .await
            .map_err(|e| Error::module_load(format!("initialize: {}", e)))?;

        let entry = Arc::new(ModuleEntry {
            name: name.to_string(),
            version: instance.version(),
            instance,
            load_time: Utc::now(),
            checksum: checksum.clone(),
            artifact_path,
            last_used_at: Mutex::new(Utc::now()),
        });

        // Replacement: the previous instance is cleaned up before the new one
        // becomes visible under the name.
        if let Some((_, previous)) = self.entries.remove(name) {
            if let Err(e) = previous.instance.cleanup().await {
                tracing::warn!(module = %name, error = %e, "Cleanup of replaced module failed");
            }
        }
        self.entries.insert(name.to_string(), entry);
        {
            let mut order = self.order.lock().unwrap();
            order.retain(|n| n != name);
            order.push(name.to_string());
        }

        metrics::counter!("aman_module_loads_total").increment(1);
        self.log_event(name, "loaded", &format!("sha256 {}", checksum))
            .await;
        tracing::info!(module = %name, checksum = %checksum, "Module loaded");

        Ok(checksum)
    }

    /// Delegate a command to the first registered module that can handle it.
    ///
    /// Bounded by the configured execute timeout. A timeout cancels only this
    /// caller's wait; the module task keeps running.
    pub async fn execute(&self, action: &str, parameters: &ParamMap, sender: &str) -> Result<String> {
        let entry = self
            .find_handler(action)
            .ok_or_else(|| Error::ModuleUnhandled(action.to_string()))?;

        entry.touch();

        let instance = entry.instance.clone();
        let action_owned = action.to_string();
        let params = parameters.clone();
        let sender = sender.to_string();
        let task = tokio::spawn(async move {
            instance.execute(&action_owned, &params, &sender).await
        });

        let timeout = Duration::from_secs(self.config.execute_timeout_secs);
        match tokio::time::timeout(timeout, task).await {
            Err(_) => {
                tracing::warn!(module = %entry.name, action = %action, "Module execution timed out");
                Err(Error::ModuleTimeout(action.to_string()))
            }
            Ok(Err(_)) => Err(Error::execution(format!(
                "module '{}' panicked handling '{}'",
                entry.name, action
            ))),
            Ok(Ok(result)) => result,
        }
    }

    fn find_handler(&self, action: &str) -> Option<Arc<ModuleEntry>> {
        let order = self.order.lock().unwrap().clone();
        for name in order {
            if let Some(entry) = self.entries.get(&name) {
                if entry.instance.can_handle(action) {
                    return Some(entry.clone());
                }
            }
        }
        None
    }

    /// Unload a module by name, invoking its cleanup first.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let Some((_, entry)) = self.entries.remove(name) else {
            return Err(Error::module_load(format!("module '{}' not loaded", name)));
        };
        self.order.lock().unwrap().retain(|n| n != name);

        if let Err(e) = entry.instance.cleanup().await {
            tracing::warn!(module = %name, error = %e, "Module cleanup failed during unload");
        }
        self.log_event(name, "unloaded", "").await;
        tracing::info!(module = %name, "Module unloaded");
        Ok(())
    }

    /// Unload every module idle past the configured threshold. Returns the
    /// names evicted.
    pub async fn evict_idle(&self) -> Vec<String> {
        let threshold = ChronoDuration::hours(self.config.idle_eviction_hours);
        let now = Utc::now();
        let idle: Vec<String> = self
            .entries
            .iter()
            .filter(|e| now - e.last_used() > threshold)
            .map(|e| e.name.clone())
            .collect();

        let mut evicted = Vec::new();
        for name in idle {
            if self.unload(&name).await.is_ok() {
                self.log_event(&name, "evicted_idle", "").await;
                evicted.push(name);
            }
        }
        evicted
    }

    /// Re-hash each persisted artifact and unload any module whose backing
    /// file no longer matches the checksum recorded at load time.
    pub async fn verify_integrity(&self) -> Vec<String> {
        let entries: Vec<Arc<ModuleEntry>> =
            self.entries.iter().map(|e| e.value().clone()).collect();

        let mut tampered = Vec::new();
        for entry in entries {
            let current = match tokio::fs::read(&entry.artifact_path).await {
                Ok(bytes) => checksum_hex(&bytes),
                Err(e) => {
                    tracing::warn!(module = %entry.name, error = %e, "Module artifact unreadable");
                    String::new()
                }
            };
            if current != entry.checksum {
                tracing::error!(module = %entry.name, "Module artifact tampered, unloading");
                self.log_event(&entry.name, "integrity_mismatch", &current).await;
                let _ = self.unload(&entry.name).await;
                tampered.push(entry.name.clone());
            }
        }
        tampered
    }

    /// Summaries in registration order, as shown by `list_modules`.
    pub fn list(&self) -> Vec<ModuleSummary> {
        let order = self.order.lock().unwrap().clone();
        order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| ModuleSummary {
                name: entry.name.clone(),
                version: entry.version.clone(),
                load_time: entry.load_time,
                last_used_at: entry.last_used(),
                checksum: entry.checksum.clone(),
            })
            .collect()
    }

    async fn log_event(&self, module: &str, event: &str, detail: &str) {
        // Best-effort: a log write failure never fails the operation.
        if let Err(e) = self
            .log
            .append_module(ModuleLogRecord::new(module, event, detail))
            .await
        {
            tracing::warn!(module = %module, event = %event, error = %e, "Module log append failed");
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}
