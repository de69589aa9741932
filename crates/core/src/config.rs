use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub dispatch: DispatchConfig,
    pub modules: ModulesConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Literal prefix a message must carry to be treated as a command.
    pub command_prefix: String,
    /// One-time master registration prefix.
    pub setup_prefix: String,
    /// Master identity, if pre-provisioned. Otherwise set via the setup prefix.
    pub master: Option<String>,
    /// Identities authorized for non-privileged commands.
    pub authorized: Vec<String>,
    pub json_logs: bool,
    pub command_log_path: String,
    pub module_log_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    pub queue_capacity: usize,
    pub drain_interval_ms: u64,
    pub monitor_interval_ms: u64,
    pub maintenance_interval_ms: u64,
    /// Delay after a faulted loop iteration; longer than the normal interval.
    pub error_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModulesConfig {
    /// Maximum concurrently loaded modules.
    pub max_loaded: usize,
    /// Lifts the capacity gate when an enhanced-security override is active.
    pub capacity_override: bool,
    pub module_dir: String,
    pub update_dir: String,
    pub execute_timeout_secs: u64,
    pub idle_eviction_hours: i64,
    pub download: DownloadConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_bytes: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    pub test_timeout_secs: u64,
    pub memory_ceiling_bytes: i64,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("AMAN_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map AMAN__DISPATCH__QUEUE_CAPACITY=64 to dispatch.queue_capacity
            .add_source(Environment::with_prefix("AMAN").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig {
                command_prefix: "AMAN:".into(),
                setup_prefix: "AMAN_SETUP:SET_MASTER".into(),
                master: None,
                authorized: Vec::new(),
                json_logs: false,
                command_log_path: "data/command_log.jsonl".into(),
                module_log_path: "data/module_log.jsonl".into(),
            },
            dispatch: DispatchConfig {
                queue_capacity: 64,
                drain_interval_ms: 250,
                monitor_interval_ms: 30_000,
                maintenance_interval_ms: 300_000,
                error_backoff_ms: 600_000,
            },
            modules: ModulesConfig {
                max_loaded: 10,
                capacity_override: false,
                module_dir: "data/modules".into(),
                update_dir: "data/updates".into(),
                execute_timeout_secs: 30,
                idle_eviction_hours: 24,
                download: DownloadConfig {
                    connect_timeout_secs: 10,
                    read_timeout_secs: 30,
                    max_bytes: 10 * 1024 * 1024, // 10MB
                },
            },
            sandbox: SandboxConfig {
                test_timeout_secs: 15,
                memory_ceiling_bytes: 50 * 1024 * 1024, // 50MB
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_limits() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.command_prefix, "AMAN:");
        assert_eq!(cfg.modules.max_loaded, 10);
        assert_eq!(cfg.modules.execute_timeout_secs, 30);
        assert_eq!(cfg.sandbox.test_timeout_secs, 15);
        assert_eq!(cfg.sandbox.memory_ceiling_bytes, 50 * 1024 * 1024);
        assert_eq!(cfg.modules.idle_eviction_hours, 24);
        assert!(cfg.dispatch.error_backoff_ms > cfg.dispatch.maintenance_interval_ms);
    }
}
