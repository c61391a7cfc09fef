//! Static defaults: the last-resort dataset served when neither the device
//! nor a snapshot is available.

use crate::state::CachedState;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::warn;

/// Version reported while serving static defaults that carry no version.
pub const MOCK_VERSION: &str = "mock";

const BUNDLED_DB: &str = include_str!("../data/db.json");

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StaticDefaults {
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub runtime: Option<Value>,
    #[serde(default)]
    pub runtime_meta: Option<Value>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, rename = "userCss")]
    pub user_css: Option<String>,
}

impl StaticDefaults {
    /// Parse a defaults document in the `db.json` layout.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The dataset compiled into the binary.
    pub fn bundled() -> Self {
        match Self::parse(BUNDLED_DB) {
            Ok(defaults) => defaults,
            Err(e) => {
                warn!("bundled defaults are invalid: {}", e);
                Self::default()
            }
        }
    }

    /// Load an operator-provided defaults file, falling back to the bundled set.
    pub fn load_or_bundled(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::bundled();
        };

        match std::fs::read_to_string(path) {
            Ok(text) => match Self::parse(&text) {
                Ok(defaults) => defaults,
                Err(e) => {
                    warn!("ignoring defaults file {}: {}", path.display(), e);
                    Self::bundled()
                }
            },
            Err(e) => {
                warn!("cannot read defaults file {}: {}", path.display(), e);
                Self::bundled()
            }
        }
    }

    /// Build a cached state from these defaults, stamped at `now_ms`.
    pub fn to_cached(&self, now_ms: u64) -> CachedState {
        let version = self
            .version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(MOCK_VERSION)
            .to_string();

        CachedState {
            config: self.config.clone(),
            runtime: self.runtime.clone(),
            runtime_meta: self.runtime_meta.clone(),
            version: Some(version),
            user_css: self.user_css.clone(),
            last_updated: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bundled_defaults_are_complete() {
        let defaults = StaticDefaults::bundled();
        assert!(defaults.config.as_ref().is_some_and(Value::is_object));
        assert!(defaults.runtime.as_ref().is_some_and(Value::is_object));
        assert!(defaults.runtime_meta.as_ref().is_some_and(Value::is_array));
        assert_eq!(defaults.version.as_deref(), Some(MOCK_VERSION));
    }

    #[test]
    fn test_missing_version_becomes_mock() {
        let defaults = StaticDefaults::parse(r#"{"config": {"a": 1}}"#).unwrap();
        let cached = defaults.to_cached(99);
        assert_eq!(cached.version.as_deref(), Some(MOCK_VERSION));
        assert_eq!(cached.config, Some(json!({"a": 1})));
        assert_eq!(cached.last_updated, 99);
    }

    #[test]
    fn test_unreadable_override_falls_back_to_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert_eq!(
            StaticDefaults::load_or_bundled(Some(&missing)),
            StaticDefaults::bundled()
        );

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "not json").unwrap();
        assert_eq!(
            StaticDefaults::load_or_bundled(Some(&corrupt)),
            StaticDefaults::bundled()
        );
    }

    #[test]
    fn test_override_file_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, r#"{"config": {"theme": "light"}, "version": "lab-1"}"#).unwrap();

        let defaults = StaticDefaults::load_or_bundled(Some(&path));
        assert_eq!(defaults.config, Some(json!({"theme": "light"})));
        assert_eq!(defaults.to_cached(0).version.as_deref(), Some("lab-1"));
    }
}
