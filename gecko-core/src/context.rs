//! Engine context shared with components.

use crate::config::ComponentConfig;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

/// Read-mostly state the engine hands to every component call.
///
/// Besides the `GECKO` and `GLOBALS` sections it carries a scoped key/value
/// store components can use to share values with each other.
#[derive(Debug, Default)]
pub struct GeckoContext {
    gecko: ComponentConfig,
    globals: ComponentConfig,
    fail_fast: bool,
    verbose: bool,
    scoped: RwLock<HashMap<String, Value>>,
}

impl GeckoContext {
    /// Create a context from the engine sections and flags.
    pub fn new(gecko: ComponentConfig, globals: ComponentConfig, fail_fast: bool, verbose: bool) -> Self {
        Self {
            gecko,
            globals,
            fail_fast,
            verbose,
            scoped: RwLock::default(),
        }
    }

    /// The `GECKO` section.
    pub fn gecko(&self) -> &ComponentConfig {
        &self.gecko
    }

    /// The `GLOBALS` section.
    pub fn globals(&self) -> &ComponentConfig {
        &self.globals
    }

    /// Whether faults escalate to the fatal handler.
    pub fn is_fail_fast(&self) -> bool {
        self.fail_fast
    }

    /// Whether per-session debug logging is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Run `f` only when verbose logging is enabled.
    pub fn if_verbose(&self, f: impl FnOnce()) {
        if self.verbose {
            f();
        }
    }

    /// Store a scoped value, returning the previous one.
    pub fn put_scoped(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.scoped
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value)
    }

    /// Read a scoped value.
    pub fn get_scoped(&self, key: &str) -> Option<Value> {
        self.scoped
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scoped_values() {
        let ctx = GeckoContext::default();
        assert!(ctx.get_scoped("token").is_none());
        assert!(ctx.put_scoped("token", json!("abc")).is_none());
        assert_eq!(ctx.put_scoped("token", json!("def")), Some(json!("abc")));
        assert_eq!(ctx.get_scoped("token"), Some(json!("def")));
    }

    #[test]
    fn test_if_verbose() {
        let quiet = GeckoContext::new(Default::default(), Default::default(), false, false);
        let mut hit = false;
        quiet.if_verbose(|| hit = true);
        assert!(!hit);

        let loud = GeckoContext::new(Default::default(), Default::default(), true, true);
        loud.if_verbose(|| hit = true);
        assert!(hit);
        assert!(loud.is_fail_fast());
    }
}
