//! Gateway reached through a pair of per-session Unix sockets.
//!
//! The gateway is launched with the session base address
//! `<socket-dir>/<connection-id>.sock`. It connects to `<base>_node2rh` to
//! push batches and serves requests on `<base>_rh2node`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hawkeye_proto::Batch;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BackendChannel, BackendError, BackendHealth, BackendLauncher, BackendSettings, ProcessHandle,
};
use crate::session::ClientSink;

const PUSH_SUFFIX: &str = "_node2rh";
const REQUEST_SUFFIX: &str = "_rh2node";

/// Deterministic addresses of one session's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketAddresses {
    pub base: PathBuf,
    pub push: PathBuf,
    pub request: PathBuf,
}

impl SocketAddresses {
    pub fn for_connection(dir: &Path, connection_id: Uuid) -> Self {
        let base = dir.join(format!("{connection_id}.sock"));
        Self {
            push: suffixed(&base, PUSH_SUFFIX),
            request: suffixed(&base, REQUEST_SUFFIX),
            base,
        }
    }
}

fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

pub struct SocketLauncher {
    settings: BackendSettings,
}

impl SocketLauncher {
    pub fn new(settings: BackendSettings) -> Self {
        Self { settings }
    }
}

impl BackendLauncher for SocketLauncher {
    fn launch(
        &self,
        connection_id: Uuid,
        sink: ClientSink,
    ) -> Result<Arc<dyn BackendChannel>, BackendError> {
        let backend = SocketBackend::spawn(connection_id, &self.settings, sink)?;
        debug!(
            connection_id = %connection_id,
            push = %backend.addresses().push.display(),
            request = %backend.addresses().request.display(),
            "gateway endpoints assigned"
        );
        Ok(Arc::new(backend))
    }
}

type RequestStream = BufReader<UnixStream>;

pub struct SocketBackend {
    connection_id: Uuid,
    addresses: SocketAddresses,
    process: ProcessHandle,
    listener: SyncMutex<Option<JoinHandle<()>>>,
    rpc: Mutex<Option<RequestStream>>,
    closed: SyncMutex<bool>,
    connect_attempts: u32,
    connect_interval: Duration,
    grace: Duration,
}

impl SocketBackend {
    pub fn spawn(
        connection_id: Uuid,
        settings: &BackendSettings,
        sink: ClientSink,
    ) -> Result<Self, BackendError> {
        std::fs::create_dir_all(&settings.socket_dir)?;
        let addresses = SocketAddresses::for_connection(&settings.socket_dir, connection_id);
        remove_socket(&addresses.push)?;
        remove_socket(&addresses.request)?;

        let listener = UnixListener::bind(&addresses.push)?;
        let listener = tokio::spawn(accept_pushes(connection_id, listener, sink));

        let base = addresses.base.to_string_lossy().into_owned();
        let process = match ProcessHandle::spawn(connection_id, settings, &[base], false) {
            Ok(process) => process,
            Err(err) => {
                listener.abort();
                let _ = remove_socket(&addresses.push);
                return Err(err);
            }
        };

        Ok(Self {
            connection_id,
            addresses,
            process,
            listener: SyncMutex::new(Some(listener)),
            rpc: Mutex::new(None),
            closed: SyncMutex::new(false),
            connect_attempts: settings.connect_attempts.max(1),
            connect_interval: settings.connect_interval,
            grace: settings.shutdown_grace,
        })
    }

    pub fn addresses(&self) -> &SocketAddresses {
        &self.addresses
    }

    /// The gateway binds its endpoint some time after launch.
    async fn connect(&self) -> Result<RequestStream, BackendError> {
        for attempt in 1..=self.connect_attempts {
            match UnixStream::connect(&self.addresses.request).await {
                Ok(stream) => {
                    debug!(connection_id = %self.connection_id, attempt, "connected to gateway endpoint");
                    return Ok(BufReader::new(stream));
                }
                Err(err) if attempt < self.connect_attempts => {
                    debug!(connection_id = %self.connection_id, attempt, error = %err, "gateway endpoint not ready");
                    sleep(self.connect_interval).await;
                }
                Err(_) => break,
            }
        }
        Err(BackendError::Unreachable {
            path: self.addresses.request.clone(),
            attempts: self.connect_attempts,
        })
    }
}

#[async_trait]
impl BackendChannel for SocketBackend {
    async fn request(&self, batch: Batch) -> Result<Option<Batch>, BackendError> {
        if *self.closed.lock() {
            return Err(BackendError::ShutDown);
        }
        let mut line = batch.to_json()?;
        line.push('\n');

        let mut rpc = self.rpc.lock().await;
        if rpc.is_none() {
            *rpc = Some(self.connect().await?);
        }
        let Some(stream) = rpc.as_mut() else {
            return Err(BackendError::Closed);
        };

        let mut reply = String::new();
        let exchange = async {
            stream.get_mut().write_all(line.as_bytes()).await?;
            stream.read_line(&mut reply).await
        };
        match exchange.await {
            Ok(0) => {
                *rpc = None;
                Err(BackendError::Closed)
            }
            Ok(_) => parse_reply(reply.trim()),
            Err(err) => {
                *rpc = None;
                Err(err.into())
            }
        }
    }

    async fn health(&self) -> BackendHealth {
        self.process.health()
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        {
            let mut closed = self.closed.lock();
            if *closed {
                return Ok(());
            }
            *closed = true;
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        drop(self.rpc.lock().await.take());

        let result = self.process.terminate(self.grace, true).await;
        for path in [&self.addresses.push, &self.addresses.request] {
            if let Err(err) = remove_socket(path) {
                warn!(connection_id = %self.connection_id, path = %path.display(), error = %err, "failed to remove socket");
            }
        }
        debug!(connection_id = %self.connection_id, "socket backend shut down");
        result
    }
}

/// `null` means no reply; a JSON array is a batch for the client.
fn parse_reply(reply: &str) -> Result<Option<Batch>, BackendError> {
    let value: Value = serde_json::from_str(reply)
        .map_err(|_| BackendError::UnexpectedReply(reply.to_string()))?;
    match value {
        Value::Null => Ok(None),
        Value::Array(_) => {
            let batch: Batch = serde_json::from_value(value)
                .map_err(hawkeye_proto::ProtocolError::from)?;
            Ok(Some(batch))
        }
        Value::Object(map) => match map.get("error") {
            Some(Value::String(message)) => Err(BackendError::Remote(message.clone())),
            Some(other) => Err(BackendError::Remote(other.to_string())),
            None => Err(BackendError::UnexpectedReply(reply.to_string())),
        },
        _ => Err(BackendError::UnexpectedReply(reply.to_string())),
    }
}

fn remove_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

async fn accept_pushes(connection_id: Uuid, listener: UnixListener, sink: ClientSink) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(serve_pushes(connection_id, stream, sink.clone()));
            }
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "push listener failed");
                break;
            }
        }
    }
}

/// Each pushed line is acknowledged with `true` once it reached the client
/// queue, `false` otherwise.
async fn serve_pushes(connection_id: Uuid, stream: UnixStream, sink: ClientSink) {
    info!(connection_id = %connection_id, "gateway push channel connected");
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "failed to read gateway push");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let delivered = match Batch::from_json(line) {
            Ok(batch) => sink.push(&batch),
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "gateway pushed malformed batch");
                false
            }
        };
        let ack: &[u8] = if delivered { b"true\n" } else { b"false\n" };
        if let Err(err) = write.write_all(ack).await {
            warn!(connection_id = %connection_id, error = %err, "failed to acknowledge gateway push");
            break;
        }
    }
    debug!(connection_id = %connection_id, "gateway push channel closed");
}
