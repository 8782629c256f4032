//! # Language State
//!
//! Per-source language selection for the transcription pipeline. Control
//! messages ("set_language") write into this map; every completed window
//! reads from it at gate-pass time, so a mid-buffer change takes effect on
//! the next window.
//!
//! ## Thread Safety:
//! A synchronized map rather than message passing: reads happen on the hot
//! audio path and must never wait for more than a bounded map operation.
//! Writes are rare (one per control message), reads are per-window, so an
//! RwLock fits. A stale read for one window is acceptable; last write wins
//! per identity.

use std::collections::HashMap;
use std::sync::RwLock;

/// Identity → ISO-639-like language code mapping with a default.
#[derive(Debug)]
pub struct LanguageState {
    /// Per-identity overrides
    overrides: RwLock<HashMap<String, String>>,

    /// Code used for identities without an override
    default_code: String,
}

impl LanguageState {
    /// Create a new state with the given default language code.
    pub fn new(default_code: impl Into<String>) -> Self {
        Self {
            overrides: RwLock::new(HashMap::new()),
            default_code: default_code.into(),
        }
    }

    /// The default language code.
    pub fn default_code(&self) -> &str {
        &self.default_code
    }

    /// Set the language for one identity. Last write wins.
    pub fn set(&self, identity: &str, code: impl Into<String>) {
        let mut overrides = self.overrides.write().unwrap();
        overrides.insert(identity.to_string(), code.into());
    }

    /// Resolve the language for an identity, falling back to the default.
    pub fn resolve(&self, identity: &str) -> String {
        let overrides = self.overrides.read().unwrap();
        overrides
            .get(identity)
            .cloned()
            .unwrap_or_else(|| self.default_code.clone())
    }

    /// Whether `code` is already the effective language for an identity
    /// (used to decide whether a set_language actually changes anything).
    pub fn is_current(&self, identity: &str, code: &str) -> bool {
        self.resolve(identity) == code
    }

    /// Drop the override for a disconnected identity.
    pub fn remove(&self, identity: &str) {
        let mut overrides = self.overrides.write().unwrap();
        overrides.remove(identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_resolution() {
        let state = LanguageState::new("en");
        assert_eq!(state.resolve("anyone"), "en");
    }

    #[test]
    fn test_override_is_per_identity() {
        let state = LanguageState::new("en");
        state.set("alice", "es");

        assert_eq!(state.resolve("alice"), "es");
        // A concurrent source with no override still uses the default
        assert_eq!(state.resolve("bob"), "en");
    }

    #[test]
    fn test_last_write_wins() {
        let state = LanguageState::new("en");
        state.set("alice", "es");
        state.set("alice", "fr");
        assert_eq!(state.resolve("alice"), "fr");
    }

    #[test]
    fn test_remove_restores_default() {
        let state = LanguageState::new("en");
        state.set("alice", "es");
        state.remove("alice");
        assert_eq!(state.resolve("alice"), "en");
    }

    #[test]
    fn test_is_current() {
        let state = LanguageState::new("en");
        assert!(state.is_current("alice", "en"));
        state.set("alice", "es");
        assert!(state.is_current("alice", "es"));
        assert!(!state.is_current("alice", "en"));
    }
}
