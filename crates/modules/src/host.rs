//! Production module host: load .so/.dll artifacts via libloading and call
//! them over a C ABI.
//!
//! A module library must export:
//! - `aman_module_describe() -> *mut c_char` — JSON `{name, version, commands}`
//! - `aman_module_init(*const c_char) -> i32` — 0 on success
//! - `aman_module_execute(*const c_char) -> *mut c_char` — JSON in/out
//! - `aman_module_cleanup() -> i32`
//! - `aman_module_free(*mut c_char)` — frees strings the module returned

use async_trait::async_trait;
use libloading::Library;
use serde::Deserialize;
use serde_json::Value;
use std::ffi::{c_char, CStr, CString};
use std::path::Path;
use std::sync::Arc;

use aman_core::traits::{CommandModule, ModuleHost};
use aman_core::types::ParamMap;
use aman_core::{Error, Result};

type DescribeFn = unsafe extern "C" fn() -> *mut c_char;
type InitFn = unsafe extern "C" fn(*const c_char) -> i32;
type ExecuteFn = unsafe extern "C" fn(*const c_char) -> *mut c_char;
type CleanupFn = unsafe extern "C" fn() -> i32;
type FreeFn = unsafe extern "C" fn(*mut c_char);

#[derive(Debug, Deserialize)]
struct Descriptor {
    name: String,
    version: String,
    #[serde(default)]
    commands: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ExecuteReply {
    ok: bool,
    #[serde(default)]
    message: String,
}

/// A module backed by a loaded dynamic library. The library handle is kept
/// alive for as long as the module is registered so its symbols stay valid.
struct LoadedLibraryModule {
    _lib: Library,
    name: String,
    version: String,
    commands: Vec<String>,
    init: InitFn,
    execute: ExecuteFn,
    cleanup: CleanupFn,
    free: FreeFn,
}

impl LoadedLibraryModule {
    /// Take ownership of a C string the module allocated.
    unsafe fn take_string(&self, ptr: *mut c_char) -> Result<String> {
        if ptr.is_null() {
            return Err(Error::execution("module returned null"));
        }
        let s = CStr::from_ptr(ptr).to_string_lossy().into_owned();
        (self.free)(ptr);
        Ok(s)
    }
}

#[async_trait]
impl CommandModule for LoadedLibraryModule {
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
        self.commands.iter().any(|c| c.eq_ignore_ascii_case(action))
    }

    async fn initialize(&self, config: Option<Value>) -> Result<()> {
        let payload = serde_json::to_string(&config)?;
        let c_payload = CString::new(payload)
            .map_err(|e| Error::module_load(format!("init payload: {}", e)))?;
        let code = unsafe { (self.init)(c_payload.as_ptr()) };
        if code != 0 {
            return Err(Error::module_load(format!(
                "module '{}' init returned {}",
                self.name, code
            )));
        }
        Ok(())
    }

    async fn execute(&self, action: &str, parameters: &ParamMap, sender: &str) -> Result<String> {
        let request = serde_json::json!({
            "action": action,
            "parameters": parameters.iter().map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<std::collections::BTreeMap<String, String>>(),
            "sender": sender,
        });
        let c_request = CString::new(serde_json::to_string(&request)?)
            .map_err(|e| Error::execution(format!("request payload: {}", e)))?;

        let reply_json = unsafe {
            let ptr = (self.execute)(c_request.as_ptr());
            self.take_string(ptr)?
        };
        let reply: ExecuteReply = serde_json::from_str(&reply_json)
            .map_err(|e| Error::execution(format!("malformed module reply: {}", e)))?;

        if reply.ok {
            Ok(reply.message)
        } else {
            Err(Error::execution(reply.message))
        }
    }

    async fn cleanup(&self) -> Result<()> {
        let code = unsafe { (self.cleanup)() };
        if code != 0 {
            return Err(Error::execution(format!(
                "module '{}' cleanup returned {}",
                self.name, code
            )));
        }
        Ok(())
    }
}

/// `ModuleHost` that loads dynamic libraries from disk.
#[derive(Default)]
pub struct LibraryModuleHost;

impl LibraryModuleHost {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleHost for LibraryModuleHost {
    fn instantiate(
        &self,
        name: &str,
        artifact_path: &Path,
        _bytes: &[u8],
    ) -> Result<Arc<dyn CommandModule>> {
        let lib = unsafe {
            Library::new(artifact_path)
                .map_err(|e| Error::module_load(format!("libloading: {}", e)))?
        };

        let describe: DescribeFn = unsafe {
            *lib.get(b"aman_module_describe")
                .map_err(|e| Error::module_load(format!("symbol aman_module_describe: {}", e)))?
        };
        let init: InitFn = unsafe {
            *lib.get(b"aman_module_init")
                .map_err(|e| Error::module_load(format!("symbol aman_module_init: {}", e)))?
        };
        let execute: ExecuteFn = unsafe {
            *lib.get(b"aman_module_execute")
                .map_err(|e| Error::module_load(format!("symbol aman_module_execute: {}", e)))?
        };
        let cleanup: CleanupFn = unsafe {
            *lib.get(b"aman_module_cleanup")
                .map_err(|e| Error::module_load(format!("symbol aman_module_cleanup: {}", e)))?
        };
        let free: FreeFn = unsafe {
            *lib.get(b"aman_module_free")
                .map_err(|e| Error::module_load(format!("symbol aman_module_free: {}", e)))?
        };

        let descriptor_json = unsafe {
            let ptr = describe();
            if ptr.is_null() {
                return Err(Error::module_load("describe returned null".to_string()));
            }
            let s = CStr::from_ptr(ptr).to_string_lossy().into_owned();
            free(ptr);
            s
        };
        let descriptor: Descriptor = serde_json::from_str(&descriptor_json)
            .map_err(|e| Error::module_load(format!("malformed descriptor: {}", e)))?;

        tracing::info!(
            module = %name,
            declared = %descriptor.name,
            version = %descriptor.version,
            commands = descriptor.commands.len(),
            "Dynamic library module instantiated"
        );

        Ok(Arc::new(LoadedLibraryModule {
            _lib: lib,
            name: name.to_string(),
            version: descriptor.version,
            commands: descriptor.commands,
            init,
            execute,
            cleanup,
            free,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instantiate_rejects_non_library_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_lib.pkg");
        std::fs::write(&path, b"plain bytes, not a shared object").unwrap();

        let host = LibraryModuleHost::new();
        let err = host.instantiate("bogus", &path, b"").unwrap_err();
        assert!(matches!(err, Error::ModuleLoad(_)));
    }

    #[test]
    fn descriptor_parses_with_default_commands() {
        let d: Descriptor = serde_json::from_str(r#"{"name":"w","version":"1.2"}"#).unwrap();
        assert_eq!(d.name, "w");
        assert!(d.commands.is_empty());
    }
}
