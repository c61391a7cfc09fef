//! # Device State Bridge
//!
//! A local stand-in for a remote embedded device during frontend development.
//! The bridge mirrors the device's configuration and runtime telemetry and keeps
//! serving a valid answer when the device is offline, slow, or flapping.
//!
//! ## Features
//!
//! - **Three-tier startup**: live device, then the on-disk snapshot, then bundled defaults
//! - **Background polling**: cheap runtime check while the device is down, full refresh while it is up
//! - **Non-blocking facade**: HTTP handlers read only the in-memory state
//! - **Durable snapshots**: written by temp-file rename after every successful update
//!
//! ## Quick Start
//!
//! ```no_run
//! use device_bridge::{BridgeConfig, HttpUpstream, Resolver, SnapshotFile, StateStore, StaticDefaults};
//!
//! # async fn run() -> Result<(), reqwest::Error> {
//! let config = BridgeConfig::default();
//! let store = StateStore::new();
//! let resolver = Resolver::new(
//!     HttpUpstream::new(&config.device, config.fetch_timeout)?,
//!     store.clone(),
//!     SnapshotFile::new(&config.snapshot_file),
//!     StaticDefaults::bundled(),
//!     (&config).into(),
//! );
//!
//! let tier = resolver.startup().await;
//! println!("serving from {:?}", tier);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`upstream`] - Time-bounded device fetches
//! - [`state`] - Shared cached state and reachability flag
//! - [`snapshot`] - Durable state file
//! - [`defaults`] - Bundled static dataset
//! - [`resolver`] - Startup fallback and poll cycle
//! - [`server`] - HTTP facade

#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod defaults;
pub mod error;
pub mod resolver;
pub mod server;
pub mod snapshot;
pub mod state;
pub mod upstream;

// Re-export main public types for convenience
pub use config::BridgeConfig;
pub use defaults::StaticDefaults;
pub use error::{ConfigError, FetchError, SnapshotError};
pub use resolver::{PollOutcome, Resolver, StartupTier, Timing};
pub use server::AppState;
pub use snapshot::SnapshotFile;
pub use state::{BridgeStatus, CachedState, StateStore};
pub use upstream::{HttpUpstream, Upstream};
