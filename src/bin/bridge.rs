use clap::{App, Arg, ArgMatches};
use device_bridge::config::{
    Overrides, ENV_DEVICE, ENV_FALLBACK_DB, ENV_FETCH_TIMEOUT, ENV_POLL_INTERVAL, ENV_PORT,
    ENV_SNAPSHOT_FILE, ENV_STARTUP_TIMEOUT,
};
use device_bridge::server::{self, AppState};
use device_bridge::{BridgeConfig, HttpUpstream, Resolver, SnapshotFile, StateStore, StaticDefaults};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const BIND_HOST: &str = "127.0.0.1";

/// Flag name paired with the environment variable it overrides.
const FLAG_MAP: [(&str, &str); 7] = [
    ("device", ENV_DEVICE),
    ("port", ENV_PORT),
    ("startup-timeout", ENV_STARTUP_TIMEOUT),
    ("poll-interval", ENV_POLL_INTERVAL),
    ("fetch-timeout", ENV_FETCH_TIMEOUT),
    ("snapshot", ENV_SNAPSHOT_FILE),
    ("fallback-db", ENV_FALLBACK_DB),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = cli().get_matches();
    let mut config = BridgeConfig::from_env()?;
    config.apply(&flag_overrides(&matches))?;

    info!("device bridge v{} mirroring {}", env!("CARGO_PKG_VERSION"), config.device);

    let store = StateStore::new();
    let resolver = Resolver::new(
        HttpUpstream::new(&config.device, config.fetch_timeout)?,
        store.clone(),
        SnapshotFile::new(&config.snapshot_file),
        StaticDefaults::load_or_bundled(config.fallback_db.as_deref()),
        (&config).into(),
    );

    let tier = resolver.startup().await;
    info!("startup settled on {:?} tier", tier);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = tokio::spawn(resolver.run(shutdown_rx.clone()));

    let listener = TcpListener::bind((BIND_HOST, config.port)).await?;
    info!(
        "listening on :{} (reachable={})",
        config.port,
        store.is_reachable().await
    );
    let http = tokio::spawn(server::serve(
        listener,
        AppState::new(store, &config.device),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    if let Err(e) = poller.await {
        error!("poll task failed: {}", e);
    }
    match http.await {
        Ok(Err(e)) => error!("http server error: {}", e),
        Err(e) => error!("http task failed: {}", e),
        Ok(Ok(())) => {}
    }

    info!("device bridge stopped");
    Ok(())
}

fn cli() -> App<'static, 'static> {
    App::new("device-bridge")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Device Bridge Developers")
        .about("Mirrors an embedded device's config and runtime state for frontend development")
        .arg(
            Arg::with_name("device")
                .short("d")
                .long("device")
                .value_name("URL")
                .help("Device base URL [env: CM_DEVICE]")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Local listen port [env: CM_BRIDGE_PORT]")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("startup-timeout")
                .long("startup-timeout")
                .value_name("MS")
                .help("How long to wait for the first live snapshot [env: CM_STARTUP_TIMEOUT]")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("poll-interval")
                .long("poll-interval")
                .value_name("MS")
                .help("Background poll period [env: CM_POLL_INTERVAL]")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("fetch-timeout")
                .long("fetch-timeout")
                .value_name("MS")
                .help("Per-request upstream timeout [env: CM_FETCH_TIMEOUT]")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("snapshot")
                .short("s")
                .long("snapshot")
                .value_name("FILE")
                .help("Snapshot file [env: CM_SNAPSHOT_FILE]")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("fallback-db")
                .long("fallback-db")
                .value_name("FILE")
                .help("Static defaults replacing the bundled set [env: CM_FALLBACK_DB]")
                .takes_value(true),
        )
}

fn flag_overrides(matches: &ArgMatches) -> Overrides {
    FLAG_MAP
        .iter()
        .filter_map(|(flag, env)| matches.value_of(flag).map(|value| (*env, value.to_string())))
        .collect()
}
