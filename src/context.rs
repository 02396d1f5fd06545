//! Process-wide compilation context.
//!
//! Each compilation unit owns its AST and generator state exclusively; this
//! context is the one piece of cross-cutting mutable state (directories,
//! module/namespace caches, debug flag) and the single read/write lock here
//! is the only synchronization primitive in the core. Readers take the
//! shared lock, writers the exclusive lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct ContextInner {
    working_dir: PathBuf,
    output_dir: PathBuf,
    /// Module name → resolved source content, filled by the external
    /// import resolver.
    modules: HashMap<String, String>,
    /// Namespace name → owning unit, for cross-unit lookups.
    namespaces: HashMap<String, String>,
    debug_mode: bool,
}

/// Cheaply cloneable handle; clones share one underlying context.
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
    inner: Arc<RwLock<ContextInner>>,
}

impl CompileContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ContextInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ContextInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_debug_mode(&self) -> bool {
        self.read().debug_mode
    }

    pub fn set_debug_mode(&self, enabled: bool) {
        self.write().debug_mode = enabled;
    }

    pub fn working_dir(&self) -> PathBuf {
        self.read().working_dir.clone()
    }

    pub fn set_working_dir(&self, dir: impl AsRef<Path>) {
        self.write().working_dir = dir.as_ref().to_path_buf();
    }

    pub fn output_dir(&self) -> PathBuf {
        self.read().output_dir.clone()
    }

    pub fn set_output_dir(&self, dir: impl AsRef<Path>) {
        self.write().output_dir = dir.as_ref().to_path_buf();
    }

    pub fn get_module(&self, name: &str) -> Option<String> {
        self.read().modules.get(name).cloned()
    }

    pub fn register_module(&self, name: impl Into<String>, content: impl Into<String>) {
        self.write().modules.insert(name.into(), content.into());
    }

    pub fn get_namespace(&self, name: &str) -> Option<String> {
        self.read().namespaces.get(name).cloned()
    }

    pub fn register_namespace(&self, name: impl Into<String>, unit: impl Into<String>) {
        self.write().namespaces.insert(name.into(), unit.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_module_cache_round_trip() {
        let context = CompileContext::new();
        assert!(context.get_module("lib").is_none());
        context.register_module("lib", "div { }");
        assert_eq!(context.get_module("lib").as_deref(), Some("div { }"));
    }

    #[test]
    fn test_shared_across_clones_and_threads() {
        let context = CompileContext::new();
        let clone = context.clone();
        let handle = thread::spawn(move || {
            clone.set_debug_mode(true);
            clone.register_namespace("ui", "widgets.chtl");
        });
        handle.join().expect("thread joins");
        assert!(context.is_debug_mode());
        assert_eq!(context.get_namespace("ui").as_deref(), Some("widgets.chtl"));
    }
}
