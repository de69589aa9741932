//! Pre-load sandbox testing of module candidates.
//!
//! A candidate is staged into a private temp directory, statically screened
//! for process-control violations, then instantiated once and probed through
//! its lifecycle surface under a hard wall-clock timeout. The screen is
//! advisory for I/O (warnings) and enforced for process control (hard
//! failures). Cleanup of the staging directory and the probe instance happens
//! unconditionally, including on timeout and fault paths.

use std::sync::Arc;
use std::time::{Duration, Instant};

use aman_core::config::SandboxConfig;
use aman_core::traits::ModuleHost;
use aman_core::types::SandboxReport;
use aman_core::Result;

/// Byte patterns whose presence in a candidate is a hard failure: process
/// exit, external command execution, privilege escalation.
const DENIED_PATTERNS: &[&[u8]] = &[
    b"process::exit",
    b"process::abort",
    b"process::Command",
    b"execve",
    b"/bin/sh",
    b"setuid",
    b"setgid",
];

/// Byte patterns logged as warnings but not blocked: file and network access.
const ADVISORY_PATTERNS: &[(&[u8], &str)] = &[
    (b"std::net", "network access (std::net)"),
    (b"TcpStream", "network access (TcpStream)"),
    (b"UdpSocket", "network access (UdpSocket)"),
    (b"std::fs", "file access (std::fs)"),
];

/// Runs candidate modules through the pre-load test.
pub struct SandboxHarness {
    host: Arc<dyn ModuleHost>,
    config: SandboxConfig,
}

impl SandboxHarness {
    pub fn new(host: Arc<dyn ModuleHost>, config: SandboxConfig) -> Self {
        Self { host, config }
    }

    /// Test a candidate. Never errors: every outcome is a `SandboxReport`.
    pub async fn test(&self, name: &str, bytes: &[u8]) -> SandboxReport {
        let started = Instant::now();
        let mut warnings = Vec::new();

        if let Some(violation) = screen_bytes(bytes, &mut warnings) {
            metrics::counter!("aman_sandbox_failures_total").increment(1);
            return SandboxReport {
                passed: false,
                error: Some(violation),
                warnings,
                memory_delta_bytes: 0,
                elapsed_ms: started.elapsed().as_millis() as i64,
            };
        }

        let memory_before = process_rss_bytes();

        let host = self.host.clone();
        let probe_name = name.to_string();
        let probe_bytes = bytes.to_vec();
        // Probes run in their own task so a panicking candidate fails the
        // report instead of unwinding through the caller.
        let probe = tokio::spawn(async move { run_probes(host, &probe_name, &probe_bytes).await });

        let timeout = Duration::from_secs(self.config.test_timeout_secs);
        let outcome = match tokio::time::timeout(timeout, probe).await {
            Err(_) => {
                tracing::warn!(module = %name, "Sandbox test timed out");
                metrics::counter!("aman_sandbox_failures_total").increment(1);
                return SandboxReport {
                    passed: false,
                    error: Some("timeout".to_string()),
                    warnings,
                    memory_delta_bytes: 0,
                    elapsed_ms: started.elapsed().as_millis() as i64,
                };
            }
            Ok(joined) => joined,
        };

        let elapsed_ms = started.elapsed().as_millis() as i64;
        let memory_delta_bytes = process_rss_bytes() - memory_before;

        match outcome {
            Err(_) => {
                metrics::counter!("aman_sandbox_failures_total").increment(1);
                SandboxReport {
                    passed: false,
                    error: Some("candidate panicked during sandbox probe".to_string()),
                    warnings,
                    memory_delta_bytes,
                    elapsed_ms,
                }
            }
            Ok(Err(e)) => {
                metrics::counter!("aman_sandbox_failures_total").increment(1);
                SandboxReport {
                    passed: false,
                    error: Some(e.to_string()),
                    warnings,
                    memory_delta_bytes,
                    elapsed_ms,
                }
            }
            Ok(Ok(probe_warnings)) => {
                warnings.extend(probe_warnings);
                if memory_delta_bytes > self.config.memory_ceiling_bytes {
                    warnings.push(format!(
                        "memory delta {} bytes exceeds ceiling {}",
                        memory_delta_bytes, self.config.memory_ceiling_bytes
                    ));
                }
                tracing::debug!(
                    module = %name,
                    warnings = warnings.len(),
                    elapsed_ms,
                    "Sandbox test passed"
                );
                SandboxReport {
                    passed: true,
                    error: None,
                    warnings,
                    memory_delta_bytes,
                    elapsed_ms,
                }
            }
        }
    }
}

/// Static screen over the candidate bytes. Returns the violation text for a
/// hard failure; advisory findings are appended to `warnings`.
fn screen_bytes(bytes: &[u8], warnings: &mut Vec<String>) -> Option<String> {
    for pattern in DENIED_PATTERNS {
        if contains(bytes, pattern) {
            return Some(format!(
                "denied operation detected: {}",
                String::from_utf8_lossy(pattern)
            ));
        }
    }
    for (pattern, label) in ADVISORY_PATTERNS {
        if contains(bytes, pattern) {
            warnings.push(label.to_string());
        }
    }
    None
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Instantiate the candidate once in an isolated staging directory and probe
/// its lifecycle surface. Instantiation failure is the only hard failure;
/// probe faults are recorded as warnings.
async fn run_probes(host: Arc<dyn ModuleHost>, name: &str, bytes: &[u8]) -> Result<Vec<String>> {
    let staging = tempfile::tempdir()
        .map_err(|e| aman_core::Error::module_load(format!("sandbox staging dir: {}", e)))?;
    let artifact = staging.path().join(format!("{}.candidate", name));
    tokio::fs::write(&artifact, bytes)
        .await
        .map_err(|e| aman_core::Error::module_load(format!("stage candidate: {}", e)))?;

    let instance = host.instantiate(name, &artifact, bytes)?;

    let mut warnings = Vec::new();

    if let Err(e) = instance.initialize(None).await {
        warnings.push(format!("initialize(null) faulted: {}", e));
    }

    let version = instance.version();
    if version.trim().is_empty() {
        warnings.push("blank version".to_string());
    }

    if instance.supported_commands().is_empty() {
        warnings.push("declares zero supported commands".to_string());
    }

    let _ = instance.can_handle("test");

    // Guaranteed-release: probe instance is cleaned up on every path that
    // reaches instantiation; the staging dir is removed on drop.
    if let Err(e) = instance.cleanup().await {
        warnings.push(format!("cleanup faulted: {}", e));
    }

    Ok(warnings)
}

fn process_rss_bytes() -> i64 {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };
    let mut sys = sysinfo::System::new();
    sys.refresh_process(pid);
    sys.process(pid).map(|p| p.memory() as i64).unwrap_or(0)
}
