//! Binary entrypoint (spec §6 "External interfaces"): wires up config,
//! logging, the shared registry/lobby, the listener, the lobby
//! maintenance tick, the admin console, and the optional HTTP status
//! page.
//!
//! Grounded on the teacher's `main.rs`
//! (`mahjong-server/src/main.rs`): a `#[tokio::main]` entry that installs
//! a `tracing` subscriber, spawns its long-running actor task, and serves
//! `warp` routes. This entrypoint keeps that shape but adds a second
//! `tracing-subscriber` layer for the per-session log file (spec §6
//! "Logging") and swaps the single warp-route `main` for several spawned
//! tasks plus a blocking admin console on the main task itself.

mod admin;
mod banner;
mod config;
mod connection;
mod games;
mod http_status;
mod legacy_xml;
mod listener;
mod lobby;
mod match_state;
mod registry;

use config::{Config, ConfigValues};
use lobby::Lobby;
use registry::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;
use tracing_subscriber::layer::SubscriberExt;

/// Command-line overrides, matching `Main.cpp`'s argument names (spec §6
/// "Configuration").
#[derive(StructOpt, Debug)]
#[structopt(name = "relay-server")]
struct Args {
    /// Path to the `<Config>` XML file.
    #[structopt(short = "c", long = "config", default_value = "Config.xml")]
    config: PathBuf,

    /// Overrides the configured listen port.
    #[structopt(short = "p", long = "port")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::from_args();

    let mut values: ConfigValues = config::load_config_file(&args.config);
    if let Some(port) = args.port {
        values.port = port;
    }

    let _log_guard = init_logging(&values.logs_directory);

    let enable_http = values.enable_http;
    let config = Arc::new(Config::new(values));
    let registry = Registry::new();
    let lobby = Lobby::new(config.clone());

    tracing::info!(port = config.port(), "relay-server starting");

    tokio::spawn(lobby.clone().run_tick_loop());

    {
        let config = config.clone();
        let registry = registry.clone();
        let lobby = lobby.clone();
        tokio::spawn(async move {
            if let Err(err) = listener::run(config, registry, lobby).await {
                tracing::error!(%err, "listener exited");
            }
        });
    }

    if enable_http {
        let lobby = lobby.clone();
        tokio::spawn(http_status::run(lobby, ([0, 0, 0, 0], 80).into()));
    }

    admin::run(config, registry, lobby).await;
    Ok(())
}

/// Installs a combined console + per-session-log-file `tracing`
/// subscriber (spec §6 "Logging"). The returned guard must be held for
/// the process lifetime: dropping it stops the non-blocking file writer
/// from flushing.
fn init_logging(logs_directory: &str) -> tracing_appender::non_blocking::WorkerGuard {
    std::fs::create_dir_all(logs_directory).ok();
    let session_name = format!("SESSION_{}.txt", unix_timestamp());
    let file_appender = tracing_appender::rolling::never(logs_directory, session_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false));
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    guard
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
