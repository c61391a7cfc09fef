//! In-memory state store shared by the poll task and the HTTP facade.
//!
//! Every write replaces whole top-level fields while holding the write lock,
//! so a reader always observes either the old or the new value of a field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Version reported when a live contact succeeded but the device sent no version.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Latest known copy of every mirrored device resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedState {
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
    /// Epoch milliseconds of the last successful write, `0` if never.
    #[serde(default, rename = "ts")]
    pub last_updated: u64,
}

/// Body of `/bridge/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub reachable: bool,
    pub last_update: u64,
    pub device: String,
    pub version: Option<String>,
    pub has_css: bool,
}

#[derive(Debug, Default)]
struct Inner {
    cache: CachedState,
    reachable: bool,
    // Set while the cache still holds bundled defaults rather than device data
    from_defaults: bool,
}

/// Cloneable handle to the process-wide cached state.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    inner: Arc<RwLock<Inner>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> CachedState {
        self.inner.read().await.cache.clone()
    }

    pub async fn is_reachable(&self) -> bool {
        self.inner.read().await.reachable
    }

    /// Set the reachability flag, returning the previous value.
    pub async fn set_reachable(&self, reachable: bool) -> bool {
        let mut inner = self.inner.write().await;
        std::mem::replace(&mut inner.reachable, reachable)
    }

    /// Adopt a complete state wholesale.
    pub async fn replace(&self, cache: CachedState) {
        let mut inner = self.inner.write().await;
        inner.cache = cache;
        inner.from_defaults = false;
    }

    /// Adopt bundled defaults, marking the cache as not device-sourced.
    pub async fn replace_with_defaults(&self, cache: CachedState) {
        let mut inner = self.inner.write().await;
        inner.cache = cache;
        inner.from_defaults = true;
    }

    /// True while any field may still come from the bundled defaults.
    pub async fn holds_defaults(&self) -> bool {
        self.inner.read().await.from_defaults
    }

    /// Mark the cache as fully device-sourced.
    pub async fn clear_defaults(&self) {
        self.inner.write().await.from_defaults = false;
    }

    /// Apply an update under a single write lock.
    pub async fn update<F>(&self, apply: F)
    where
        F: FnOnce(&mut CachedState),
    {
        let mut inner = self.inner.write().await;
        apply(&mut inner.cache);
    }

    pub async fn runtime(&self) -> Option<Value> {
        self.inner.read().await.cache.runtime.clone()
    }

    pub async fn runtime_meta(&self) -> Option<Value> {
        self.inner.read().await.cache.runtime_meta.clone()
    }

    pub async fn config(&self) -> Option<Value> {
        self.inner.read().await.cache.config.clone()
    }

    pub async fn version(&self) -> Option<String> {
        self.inner.read().await.cache.version.clone()
    }

    pub async fn user_css(&self) -> Option<String> {
        self.inner.read().await.cache.user_css.clone()
    }

    pub async fn status(&self, device: &str) -> BridgeStatus {
        let inner = self.inner.read().await;
        BridgeStatus {
            reachable: inner.reachable,
            last_update: inner.cache.last_updated,
            device: device.to_string(),
            version: inner.cache.version.clone(),
            has_css: inner
                .cache
                .user_css
                .as_deref()
                .is_some_and(|css| !css.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_store_starts_empty_and_unreachable() {
        let store = StateStore::new();
        let state = store.snapshot().await;
        assert_eq!(state, CachedState::default());
        assert!(!store.is_reachable().await);
        assert!(!store.holds_defaults().await);
    }

    #[tokio::test]
    async fn test_defaults_marker_follows_replacement() {
        let store = StateStore::new();
        let bundled = CachedState {
            version: Some("mock".to_string()),
            ..CachedState::default()
        };
        store.replace_with_defaults(bundled.clone()).await;
        assert!(store.holds_defaults().await);
        assert_eq!(store.snapshot().await, bundled);

        store.replace(CachedState::default()).await;
        assert!(!store.holds_defaults().await);

        store.replace_with_defaults(bundled).await;
        store.clear_defaults().await;
        assert!(!store.holds_defaults().await);
    }

    #[tokio::test]
    async fn test_set_reachable_reports_previous_value() {
        let store = StateStore::new();
        assert!(!store.set_reachable(true).await);
        assert!(store.set_reachable(true).await);
        assert!(store.set_reachable(false).await);
        assert!(!store.is_reachable().await);
    }

    #[tokio::test]
    async fn test_status_reflects_cache() {
        let store = StateStore::new();
        store
            .update(|cache| {
                cache.version = Some("1.4.2".to_string());
                cache.user_css = Some("body{color:red}".to_string());
                cache.last_updated = 42;
            })
            .await;
        store.set_reachable(true).await;

        let status = store.status("http://device").await;
        assert!(status.reachable);
        assert_eq!(status.last_update, 42);
        assert_eq!(status.device, "http://device");
        assert_eq!(status.version.as_deref(), Some("1.4.2"));
        assert!(status.has_css);
    }

    #[test]
    fn test_status_serializes_with_camel_case_keys() {
        let status = BridgeStatus {
            reachable: false,
            last_update: 7,
            device: "http://d".to_string(),
            version: Some("mock".to_string()),
            has_css: false,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(
            value,
            json!({"reachable": false, "lastUpdate": 7, "device": "http://d", "version": "mock", "hasCss": false})
        );
    }

    #[test]
    fn test_cached_state_wire_names() {
        let state = CachedState {
            config: Some(json!({"theme": "dark"})),
            user_css: Some("a{}".to_string()),
            last_updated: 5,
            ..CachedState::default()
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["userCss"], "a{}");
        assert_eq!(value["ts"], 5);
        assert!(value["runtime_meta"].is_null());

        // Missing keys deserialize to empty fields
        let parsed: CachedState = serde_json::from_str(r#"{"config":{"a":1}}"#).unwrap();
        assert_eq!(parsed.config, Some(json!({"a": 1})));
        assert!(parsed.runtime.is_none());
        assert_eq!(parsed.last_updated, 0);
    }
}
