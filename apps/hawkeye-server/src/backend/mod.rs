//! Per-session backend channels.
//!
//! Every session owns exactly one channel. The channel owns the gateway
//! process it launched and everything addressable that belongs to it.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hawkeye_proto::{Batch, ProtocolError};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::BackendKind;
use crate::session::ClientSink;

mod process;
pub mod socket;
pub mod stdio;

pub use process::ProcessHandle;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("backend i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("backend endpoint {} unreachable after {attempts} attempts", path.display())]
    Unreachable { path: PathBuf, attempts: u32 },
    #[error("backend closed the channel")]
    Closed,
    #[error("backend channel already shut down")]
    ShutDown,
    #[error("backend reported error: {0}")]
    Remote(String),
    #[error("unexpected backend reply: {0}")]
    UnexpectedReply(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl BackendError {
    /// Whether the channel is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BackendError::Remote(_) | BackendError::UnexpectedReply(_) | BackendError::Protocol(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "code", rename_all = "snake_case")]
pub enum BackendHealth {
    Running,
    Exited(Option<i32>),
}

/// Duplex link between one session and its gateway.
///
/// Batches pushed by the gateway on its own initiative go straight to the
/// [`ClientSink`] handed to the launcher.
#[async_trait]
pub trait BackendChannel: Send + Sync {
    /// Forwards a client command and waits for the gateway's answer, if the
    /// channel has one.
    async fn request(&self, batch: Batch) -> Result<Option<Batch>, BackendError>;

    async fn health(&self) -> BackendHealth;

    /// Graceful stop, then forced after the grace window. Safe to call twice.
    async fn shutdown(&self) -> Result<(), BackendError>;
}

pub trait BackendLauncher: Send + Sync {
    fn launch(
        &self,
        connection_id: Uuid,
        sink: ClientSink,
    ) -> Result<Arc<dyn BackendChannel>, BackendError>;
}

/// Settings shared by every gateway launch.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub program: String,
    pub args: Vec<String>,
    pub socket_dir: PathBuf,
    pub shutdown_grace: Duration,
    pub connect_attempts: u32,
    pub connect_interval: Duration,
    pub log_stdout: bool,
    pub log_stderr: bool,
}

pub fn launcher(kind: BackendKind, settings: BackendSettings) -> Arc<dyn BackendLauncher> {
    match kind {
        BackendKind::Stdio => Arc::new(stdio::StdioLauncher::new(settings)),
        BackendKind::Socket => Arc::new(socket::SocketLauncher::new(settings)),
    }
}
