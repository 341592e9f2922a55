use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};

use crate::backend::BackendSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Gateway talks JSON lines over stdin/stdout.
    Stdio,
    /// Gateway serves a per-session Unix socket pair.
    Socket,
}

#[derive(Debug, Parser)]
#[command(
    name = "hawkeye-server",
    author,
    version,
    about = "Relays hawkeye control panel clients to per-session backend gateways"
)]
pub struct Cli {
    /// Port to accept websocket clients on.
    #[arg(long, env = "HAWKEYE_PORT", default_value_t = 8888)]
    pub port: u16,

    /// Address to bind the listener to.
    #[arg(long, env = "HAWKEYE_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Mirror the gateway's stdout into the log.
    #[arg(long, env = "HAWKEYE_LOG_STDOUT", default_value_t = false)]
    pub log_stdout: bool,

    /// Mirror the gateway's stderr into the log.
    #[arg(long, env = "HAWKEYE_LOG_STDERR", default_value_t = false)]
    pub log_stderr: bool,

    #[arg(long, env = "HAWKEYE_BACKEND", value_enum, default_value_t = BackendKind::Socket)]
    pub backend: BackendKind,

    /// Gateway executable launched once per session.
    #[arg(long, env = "HAWKEYE_GATEWAY_PROGRAM", default_value = "rh_gateway")]
    pub gateway_program: String,

    /// Extra argument for the gateway; repeat for more.
    #[arg(long = "gateway-arg", allow_hyphen_values = true)]
    pub gateway_args: Vec<String>,

    /// Directory holding per-session socket files.
    #[arg(long, env = "HAWKEYE_SOCKET_DIR")]
    pub socket_dir: Option<PathBuf>,

    /// Time a gateway gets to exit before it is killed.
    #[arg(long, env = "HAWKEYE_SHUTDOWN_GRACE_MS", default_value_t = 2000)]
    pub shutdown_grace_ms: u64,

    #[arg(long, env = "HAWKEYE_CONNECT_ATTEMPTS", default_value_t = 50)]
    pub connect_attempts: u32,

    #[arg(long, env = "HAWKEYE_CONNECT_INTERVAL_MS", default_value_t = 100)]
    pub connect_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub backend: BackendKind,
    pub settings: BackendSettings,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let ip: IpAddr = cli
            .bind
            .parse()
            .with_context(|| format!("invalid bind address: {}", cli.bind))?;
        if cli.gateway_program.trim().is_empty() {
            bail!("gateway program must not be empty");
        }
        if cli.connect_attempts == 0 {
            bail!("connect attempts must be at least 1");
        }

        Ok(ServerConfig {
            listen_addr: SocketAddr::new(ip, cli.port),
            backend: cli.backend,
            settings: BackendSettings {
                program: cli.gateway_program,
                args: cli.gateway_args,
                socket_dir: cli
                    .socket_dir
                    .unwrap_or_else(|| std::env::temp_dir().join("hawkeye")),
                shutdown_grace: Duration::from_millis(cli.shutdown_grace_ms),
                connect_attempts: cli.connect_attempts,
                connect_interval: Duration::from_millis(cli.connect_interval_ms),
                log_stdout: cli.log_stdout,
                log_stderr: cli.log_stderr,
            },
        })
    }
}
