use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use hawkeye_client::connection::{self, ConnectOptions};
use hawkeye_client::Engine;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "hawkeye-watch",
    author,
    version,
    about = "Connects to a hawkeye server and prints the reconciled resource tree"
)]
struct Cli {
    /// Websocket endpoint of the hawkeye server.
    #[arg(long, env = "HAWKEYE_URL", default_value = "ws://127.0.0.1:8888/ws")]
    url: String,

    /// Request the top-level domain once connected.
    #[arg(long, default_value_t = false)]
    bootstrap: bool,

    /// Seconds to wait for the websocket handshake.
    #[arg(long, env = "HAWKEYE_CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    connect_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    if let Err(err) = init_tracing() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
    if let Err(err) = run(Cli::parse()).await {
        error!(error = %err, "hawkeye-watch exited with error");
        std::process::exit(1);
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut options = ConnectOptions::new(cli.url);
    options.bootstrap = cli.bootstrap;
    options.connect_timeout = Duration::from_secs(cli.connect_timeout_secs);

    let mut engine = Engine::new();
    connection::run(&mut engine, &options, |engine, report| {
        info!(
            inserted = report.inserted,
            configured = report.configured,
            removed = report.removed,
            failed = report.failed,
            nodes = engine.tree().node_count(),
            "tree updated"
        );
        print!("{}", engine.tree().render_text());
    })
    .await?;
    info!("connection closed");
    Ok(())
}
