use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use device_bridge::BridgeStatus;
use std::time::{Duration, Instant};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "33000";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("bridgectl")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Device Bridge Developers")
        .about("🔌 Inspect a running device bridge")
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Bridge host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Bridge port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("status")
                .about("📊 Show bridge reachability and freshness")
        )
        .subcommand(
            SubCommand::with_name("get")
                .about("📄 Print one mirrored resource")
                .arg(
                    Arg::with_name("resource")
                        .help("Resource to fetch")
                        .required(true)
                        .possible_values(&["runtime", "runtime-meta", "config", "version", "css"])
                )
        )
        .subcommand(
            SubCommand::with_name("watch")
                .about("📈 Follow bridge status over time")
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("Watch duration in seconds (default: infinite)")
                        .takes_value(true)
                )
                .arg(
                    Arg::with_name("refresh")
                        .short("r")
                        .long("refresh")
                        .value_name("MS")
                        .help("Refresh rate in milliseconds")
                        .takes_value(true)
                        .default_value("2000")
                )
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");
    let verbose = matches.is_present("verbose");
    let base = format!("http://{}:{}", host, port);

    if verbose {
        println!("{}", "🔌 Device Bridge".bright_blue().bold());
        println!("{} {}", "Connecting to".dimmed(), base);
    }

    match matches.subcommand() {
        ("status", _) => {
            let status = fetch_status(&base).await?;
            print_status(&status, format)?;
        }
        ("get", Some(sub_matches)) => {
            handle_get(sub_matches, &base, format).await?;
        }
        ("watch", Some(sub_matches)) => {
            handle_watch(sub_matches, &base, format).await?;
        }
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Show bridge health", "bridgectl status".bright_cyan());
            println!("  {} Print cached runtime", "bridgectl get runtime".bright_cyan());
            println!("  {} Follow reachability", "bridgectl watch".bright_cyan());
        }
    }

    Ok(())
}

async fn fetch_status(base: &str) -> Result<BridgeStatus, Box<dyn std::error::Error>> {
    let response = reqwest::get(format!("{}/bridge/status", base)).await?;
    Ok(response.error_for_status()?.json::<BridgeStatus>().await?)
}

fn resource_path(resource: &str) -> &'static str {
    match resource {
        "runtime" => "/runtime.json",
        "runtime-meta" => "/runtime_meta.json",
        "config" => "/config.json",
        "version" => "/version",
        _ => "/user_theme.css",
    }
}

async fn handle_get(matches: &ArgMatches<'_>, base: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let resource = matches.value_of("resource").unwrap_or("runtime");
    let path = resource_path(resource);
    let body = reqwest::get(format!("{}{}", base, path))
        .await?
        .error_for_status()?
        .text()
        .await?;

    if !path.ends_with(".json") {
        if body.is_empty() && format == "table" {
            println!("{}", format!("({} is empty)", resource).as_str().dimmed());
        } else {
            println!("{}", body);
        }
        return Ok(());
    }

    let value: serde_json::Value = serde_json::from_str(&body)?;
    match format {
        "compact" | "json" => println!("{}", value),
        _ => println!("{}", serde_json::to_string_pretty(&value)?),
    }
    Ok(())
}

async fn handle_watch(matches: &ArgMatches<'_>, base: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let refresh = Duration::from_millis(matches.value_of("refresh").unwrap_or("2000").parse::<u64>()?);
    let duration = matches
        .value_of("duration")
        .map(|d| d.parse::<u64>().map(Duration::from_secs))
        .transpose()?;
    let started = Instant::now();
    let mut last_reachable: Option<bool> = None;

    loop {
        match fetch_status(base).await {
            Ok(status) => {
                if last_reachable.is_some_and(|was| was != status.reachable) {
                    let label = if status.reachable { "device recovered" } else { "device lost" };
                    println!("{} {}", "⚡".yellow(), label.bright_yellow().bold());
                }
                last_reachable = Some(status.reachable);
                print_status(&status, if format == "table" { "compact" } else { format })?;
            }
            Err(e) => println!("{} {}", "❌".red(), format!("bridge unavailable: {}", e).as_str().bright_red()),
        }

        if duration.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        tokio::time::sleep(refresh).await;
    }
    Ok(())
}

fn print_status(status: &BridgeStatus, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let version = status.version.as_deref().unwrap_or("-");
    match format {
        "json" => println!("{}", serde_json::to_string(status)?),
        "compact" => {
            let link = if status.reachable { "LIVE".bright_green() } else { "OFFLINE".bright_red() };
            println!(
                "{} v{} age={} css={}",
                link,
                version,
                format_age(status.last_update),
                if status.has_css { "yes" } else { "no" }
            );
        }
        _ => {
            println!("{} {}", "📊".bright_blue(), "Bridge Status".bright_blue().bold());
            println!("{} {}", "Device:".bright_white(), status.device);
            if status.reachable {
                println!("{} {}", "Link:".bright_white(), "Reachable".bright_green());
            } else {
                println!("{} {}", "Link:".bright_white(), "Unreachable (serving cached data)".bright_red());
            }
            println!("{} {}", "Version:".bright_white(), version);
            println!("{} {}", "Last Update:".bright_white(), format_age(status.last_update));
            println!(
                "{} {}",
                "Theme Override:".bright_white(),
                if status.has_css { "present".green() } else { "none".dimmed() }
            );
        }
    }
    Ok(())
}

fn format_age(last_update_ms: u64) -> String {
    if last_update_ms == 0 {
        return "never".to_string();
    }
    let now = device_bridge::clock::unix_millis();
    let age_secs = now.saturating_sub(last_update_ms) / 1000;
    match age_secs {
        0..=59 => format!("{}s ago", age_secs),
        60..=3599 => format!("{}m {}s ago", age_secs / 60, age_secs % 60),
        _ => format!("{}h {}m ago", age_secs / 3600, (age_secs % 3600) / 60),
    }
}
