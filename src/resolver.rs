//! Fallback resolution and the background poll cycle.
//!
//! Startup walks the tiers live → snapshot → static exactly once. Afterwards
//! [`Resolver::run`] polls the device on a fixed interval, checking cheaply
//! while it is down and refreshing fully while it is up.

use crate::clock::{Clock, SystemClock};
use crate::config::BridgeConfig;
use crate::defaults::StaticDefaults;
use crate::error::FetchError;
use crate::snapshot::SnapshotFile;
use crate::state::{CachedState, StateStore, UNKNOWN_VERSION};
use crate::upstream::{
    Upstream, CONFIG_PATH, RUNTIME_META_PATH, RUNTIME_PATH, USER_CSS_PATH, VERSION_PATH,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Stylesheets this short are treated as placeholders on slow refresh.
const MIN_SLOW_REFRESH_CSS_LEN: usize = 5;

/// Which data source the startup sequence settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupTier {
    Live,
    Snapshot,
    Static,
}

/// Result of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Device was up and stayed up.
    Refreshed { slow_refresh: bool },
    /// Device was down and answered the runtime check.
    Recovered,
    /// Device was up and the primary fetch failed.
    ConnectionLost,
    /// Device was down and still is.
    StillUnreachable,
}

impl PollOutcome {
    /// Whether this tick flipped the reachability flag.
    pub fn is_transition(self) -> bool {
        matches!(self, PollOutcome::Recovered | PollOutcome::ConnectionLost)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub startup_timeout: Duration,
    pub startup_retry: Duration,
    pub poll_interval: Duration,
    pub slow_refresh_every: u64,
}

impl From<&BridgeConfig> for Timing {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            startup_timeout: config.startup_timeout,
            startup_retry: config.startup_retry,
            poll_interval: config.poll_interval,
            slow_refresh_every: config.slow_refresh_every,
        }
    }
}

/// The fields of a complete live acquisition.
struct LiveSet {
    config: Value,
    runtime: Value,
    runtime_meta: Value,
    version: Option<String>,
    user_css: Option<String>,
}

pub struct Resolver<U: Upstream> {
    upstream: Arc<U>,
    store: StateStore,
    snapshot: SnapshotFile,
    defaults: Arc<StaticDefaults>,
    timing: Timing,
    clock: Arc<dyn Clock>,
    // Serializes snapshot writes between the poll cycle and slow refreshes
    persist_lock: Arc<Mutex<()>>,
}

impl<U: Upstream> Clone for Resolver<U> {
    fn clone(&self) -> Self {
        Self {
            upstream: Arc::clone(&self.upstream),
            store: self.store.clone(),
            snapshot: self.snapshot.clone(),
            defaults: Arc::clone(&self.defaults),
            timing: self.timing,
            clock: Arc::clone(&self.clock),
            persist_lock: Arc::clone(&self.persist_lock),
        }
    }
}

impl<U: Upstream> Resolver<U> {
    pub fn new(
        upstream: U,
        store: StateStore,
        snapshot: SnapshotFile,
        defaults: StaticDefaults,
        timing: Timing,
    ) -> Self {
        Self {
            upstream: Arc::new(upstream),
            store,
            snapshot,
            defaults: Arc::new(defaults),
            timing,
            clock: Arc::new(SystemClock),
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Populate the store from the most authoritative tier available.
    pub async fn startup(&self) -> StartupTier {
        let deadline = Instant::now() + self.timing.startup_timeout;
        let mut attempts = 0u32;

        while Instant::now() < deadline {
            attempts += 1;
            match time::timeout_at(deadline, self.acquire_live()).await {
                Ok(Ok(live)) => {
                    self.adopt_live(live).await;
                    self.store.set_reachable(true).await;
                    self.persist().await;
                    info!("initial live snapshot acquired from {}", self.upstream.base_url());
                    return StartupTier::Live;
                }
                Ok(Err(e)) => debug!("startup attempt {} failed: {}", attempts, e),
                Err(_) => {
                    debug!("startup attempt {} hit the deadline", attempts);
                    break;
                }
            }
            time::sleep(self.timing.startup_retry).await;
        }

        self.store.set_reachable(false).await;
        match self.snapshot.load().await {
            Ok(state) => {
                self.store.replace(state).await;
                info!(
                    "using stored snapshot {} (device unreachable)",
                    self.snapshot.path().display()
                );
                StartupTier::Snapshot
            }
            Err(e) => {
                debug!("snapshot unavailable: {}", e);
                self.store
                    .replace_with_defaults(self.defaults.to_cached(self.clock.now_millis()))
                    .await;
                info!("falling back to bundled static defaults");
                StartupTier::Static
            }
        }
    }

    async fn acquire_live(&self) -> Result<LiveSet, FetchError> {
        let upstream = &self.upstream;
        let (config, runtime, runtime_meta, version, user_css) = tokio::join!(
            upstream.fetch_json(CONFIG_PATH),
            upstream.fetch_json(RUNTIME_PATH),
            upstream.fetch_json(RUNTIME_META_PATH),
            upstream.fetch_text(VERSION_PATH),
            upstream.fetch_text(USER_CSS_PATH),
        );

        Ok(LiveSet {
            config: unwrap_config(config?),
            runtime: runtime?,
            runtime_meta: runtime_meta?,
            version: version.map_err(|e| debug!("optional fetch failed: {}", e)).ok(),
            user_css: user_css.map_err(|e| debug!("optional fetch failed: {}", e)).ok(),
        })
    }

    async fn adopt_live(&self, live: LiveSet) {
        let now = self.clock.now_millis();
        self.store
            .update(|cache| {
                cache.config = Some(live.config);
                cache.runtime = Some(live.runtime);
                cache.runtime_meta = Some(live.runtime_meta);
                cache.version = Some(resolve_version(live.version, cache.version.take()));
                if let Some(css) = live.user_css.filter(|css| !css.is_empty()) {
                    cache.user_css = Some(css);
                }
                cache.last_updated = now;
            })
            .await;
    }

    /// Run one poll tick.
    pub async fn poll_once(&self) -> PollOutcome {
        if self.store.is_reachable().await {
            self.refresh().await
        } else {
            self.check_recovery().await
        }
    }

    async fn check_recovery(&self) -> PollOutcome {
        let runtime = match self.upstream.fetch_json(RUNTIME_PATH).await {
            Ok(runtime) => runtime,
            Err(_) => return PollOutcome::StillUnreachable,
        };

        let now = self.clock.now_millis();
        self.store
            .update(|cache| {
                cache.runtime = Some(runtime);
                cache.last_updated = now;
            })
            .await;
        self.store.set_reachable(true).await;
        info!("device became reachable (runtime only)");

        self.backfill().await;
        self.persist().await;
        PollOutcome::Recovered
    }

    /// Fetch whichever fields are still empty, one at a time, ignoring failures.
    ///
    /// Fields held from the bundled defaults count as empty. The defaults
    /// marker is cleared once config and runtime metadata both came from the
    /// device; until then the bundled values keep being served.
    async fn backfill(&self) {
        let replacing_defaults = self.store.holds_defaults().await;
        let current = self.store.snapshot().await;
        let mut incomplete = false;

        if replacing_defaults || current.runtime_meta.is_none() {
            match self.optional_json(RUNTIME_META_PATH).await {
                Some(meta) => self.store.update(|cache| cache.runtime_meta = Some(meta)).await,
                None => incomplete = true,
            }
        }
        if replacing_defaults || current.config.is_none() {
            match self.optional_json(CONFIG_PATH).await {
                Some(config) => {
                    self.store
                        .update(|cache| cache.config = Some(unwrap_config(config)))
                        .await
                }
                None => incomplete = true,
            }
        }
        if replacing_defaults || current.version.is_none() {
            let version = self.optional_text(VERSION_PATH).await;
            self.store
                .update(|cache| cache.version = Some(resolve_version(version, None)))
                .await;
        }
        if replacing_defaults || current.user_css.is_none() {
            let css = self.optional_text(USER_CSS_PATH).await.filter(|c| !c.is_empty());
            if css.is_some() || replacing_defaults {
                self.store.update(|cache| cache.user_css = css).await;
            }
        }

        if replacing_defaults && !incomplete {
            self.store.clear_defaults().await;
            info!("bundled defaults replaced by device data");
        }
    }

    async fn refresh(&self) -> PollOutcome {
        match self.upstream.fetch_json(RUNTIME_PATH).await {
            Ok(runtime) => {
                let now = self.clock.now_millis();
                self.store
                    .update(|cache| {
                        cache.runtime = Some(runtime);
                        cache.last_updated = now;
                    })
                    .await;

                let slow_refresh = is_slow_refresh_tick(
                    now,
                    self.timing.poll_interval,
                    self.timing.slow_refresh_every,
                );
                if self.store.holds_defaults().await {
                    self.backfill().await;
                }
                if slow_refresh {
                    self.spawn_slow_refresh();
                }
                self.persist().await;
                PollOutcome::Refreshed { slow_refresh }
            }
            Err(e) => {
                self.store.set_reachable(false).await;
                warn!("lost connection to device: {}", e);
                PollOutcome::ConnectionLost
            }
        }
    }

    /// Refresh version and stylesheet in the background.
    pub fn spawn_slow_refresh(&self) -> JoinHandle<()> {
        let resolver = self.clone();
        tokio::spawn(async move { resolver.refresh_slow_fields().await })
    }

    /// Refresh version and stylesheet, each persisted on its own success.
    pub async fn refresh_slow_fields(&self) {
        let version = async {
            let Some(text) = self.optional_text(VERSION_PATH).await else {
                return;
            };
            let version = text.trim();
            if version.is_empty() {
                return;
            }
            let version = version.to_string();
            self.store.update(|cache| cache.version = Some(version)).await;
            self.persist().await;
        };
        let user_css = async {
            let Some(css) = self.optional_text(USER_CSS_PATH).await else {
                return;
            };
            if css.len() <= MIN_SLOW_REFRESH_CSS_LEN {
                return;
            }
            self.store.update(|cache| cache.user_css = Some(css)).await;
            self.persist().await;
        };
        tokio::join!(version, user_css);
    }

    async fn optional_json(&self, path: &str) -> Option<Value> {
        self.upstream
            .fetch_json(path)
            .await
            .map_err(|e| debug!("optional fetch failed: {}", e))
            .ok()
    }

    async fn optional_text(&self, path: &str) -> Option<String> {
        self.upstream
            .fetch_text(path)
            .await
            .map_err(|e| debug!("optional fetch failed: {}", e))
            .ok()
    }

    /// Write the current in-memory state to the snapshot file.
    ///
    /// Skipped while the cache still holds bundled defaults, so a snapshot
    /// only ever contains device data.
    pub async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        if self.store.holds_defaults().await {
            debug!("not persisting bundled defaults");
            return;
        }
        let state: CachedState = self.store.snapshot().await;
        if let Err(e) = self.snapshot.save(&state).await {
            warn!("{}", e);
        }
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// The first tick runs immediately. The next one is scheduled only after
    /// the current tick has settled, so ticks never overlap.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let stop = *shutdown.borrow();
            if stop {
                break;
            }
            self.poll_once().await;

            tokio::select! {
                _ = time::sleep(self.timing.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("poll cycle stopped");
    }
}

/// Devices may wrap their configuration as `{"config": {...}}`.
pub fn unwrap_config(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.get("config").is_some_and(Value::is_object) => {
            map.remove("config").unwrap_or(Value::Object(map))
        }
        other => other,
    }
}

fn resolve_version(fetched: Option<String>, previous: Option<String>) -> String {
    fetched
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or(previous)
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}

/// True on every `every`-th poll interval of the wall clock.
pub fn is_slow_refresh_tick(now_ms: u64, poll_interval: Duration, every: u64) -> bool {
    let interval_ms = poll_interval.as_millis().max(1) as u64;
    every != 0 && (now_ms / interval_ms) % every == 0
}
