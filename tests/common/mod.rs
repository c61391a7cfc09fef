#![allow(dead_code)]

use async_trait::async_trait;
use device_bridge::resolver::Timing;
use device_bridge::{FetchError, Resolver, SnapshotFile, StateStore, StaticDefaults, Upstream};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Script {
    online: bool,
    json: HashMap<String, Value>,
    text: HashMap<String, String>,
    failing: HashSet<String>,
    calls: Vec<String>,
    delay: Duration,
}

/// Scripted device. Clones share one script so a test can flip the device
/// while the resolver holds its own handle.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    script: Arc<Mutex<Script>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeDevice {
    /// A reachable device serving a full resource set.
    pub fn online() -> Self {
        let device = Self::offline();
        device.set_online(true);
        device.set_json("/config.json", json!({"config": {"theme": "dark"}}));
        device.set_json("/runtime.json", json!({"temp": 21.5, "uptime": 100}));
        device.set_json("/runtime_meta.json", json!([{"group": "sensors", "key": "temp"}]));
        device.set_text("/version", "2.3.1\n");
        device.set_text("/user_theme.css", "body { background: #111; }");
        device
    }

    pub fn offline() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.script.lock().unwrap().online = online;
    }

    pub fn set_json(&self, path: &str, value: Value) {
        self.script.lock().unwrap().json.insert(path.to_string(), value);
    }

    pub fn set_text(&self, path: &str, text: &str) {
        self.script.lock().unwrap().text.insert(path.to_string(), text.to_string());
    }

    /// Make one path answer with HTTP 404 while the device stays online.
    pub fn fail(&self, path: &str) {
        self.script.lock().unwrap().failing.insert(path.to_string());
    }

    pub fn heal(&self, path: &str) {
        self.script.lock().unwrap().failing.remove(path);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().unwrap().delay = delay;
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.script.lock().unwrap().calls.clear();
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.calls().iter().filter(|p| p.as_str() == path).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn answer(&self, path: &str) -> Result<(Option<Value>, Option<String>), FetchError> {
        let delay = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(path.to_string());
            script.delay
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let script = self.script.lock().unwrap();
        if !script.online {
            return Err(FetchError::Transport {
                path: path.to_string(),
                cause: "connection refused".to_string(),
            });
        }
        if script.failing.contains(path) {
            return Err(FetchError::Http {
                path: path.to_string(),
                status: 404,
            });
        }
        Ok((script.json.get(path).cloned(), script.text.get(path).cloned()))
    }
}

#[async_trait]
impl Upstream for FakeDevice {
    async fn fetch_json(&self, path: &str) -> Result<Value, FetchError> {
        match self.answer(path).await? {
            (Some(value), _) => Ok(value),
            _ => Err(FetchError::Http {
                path: path.to_string(),
                status: 404,
            }),
        }
    }

    async fn fetch_text(&self, path: &str) -> Result<String, FetchError> {
        match self.answer(path).await? {
            (_, Some(text)) => Ok(text),
            _ => Err(FetchError::Http {
                path: path.to_string(),
                status: 404,
            }),
        }
    }

    fn base_url(&self) -> &str {
        "http://fake-device"
    }
}

pub fn fast_timing() -> Timing {
    Timing {
        startup_timeout: Duration::from_millis(200),
        startup_retry: Duration::from_millis(20),
        poll_interval: Duration::from_millis(30_000),
        slow_refresh_every: 10,
    }
}

pub fn resolver(device: &FakeDevice, snapshot: &Path) -> Resolver<FakeDevice> {
    resolver_with(device, snapshot, fast_timing())
}

pub fn resolver_with(device: &FakeDevice, snapshot: &Path, timing: Timing) -> Resolver<FakeDevice> {
    Resolver::new(
        device.clone(),
        StateStore::new(),
        SnapshotFile::new(snapshot),
        StaticDefaults::bundled(),
        timing,
    )
}

/// Wait until `check` holds, polling every few milliseconds.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check().await
}
