use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hawkeye_proto::Batch;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{BackendChannel, BackendError, BackendHealth, BackendLauncher};

const HEALTH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Created,
    Active,
    ShuttingDown,
    Removed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Created => "created",
            SessionPhase::Active => "active",
            SessionPhase::ShuttingDown => "shutting_down",
            SessionPhase::Removed => "removed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("session {connection_id} is {phase}")]
    NotActive {
        connection_id: Uuid,
        phase: SessionPhase,
    },
}

/// Outbound text frames for one client connection.
#[derive(Clone)]
pub struct ClientSink {
    connection_id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

impl ClientSink {
    pub fn channel(connection_id: Uuid) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { connection_id, tx }, rx)
    }

    /// Queues `batch` for the client. Returns false once the connection's
    /// writer is gone.
    pub fn push(&self, batch: &Batch) -> bool {
        let text = match batch.to_json() {
            Ok(text) => text,
            Err(err) => {
                warn!(connection_id = %self.connection_id, error = %err, "failed to encode batch");
                return false;
            }
        };
        let delivered = self.tx.send(text).is_ok();
        if delivered {
            counter!("hawkeye_batches_relayed_total", 1, "direction" => "to_client");
        }
        delivered
    }
}

/// Binding between one client connection and its backend channel.
pub struct Session {
    connection_id: Uuid,
    phase: Arc<Mutex<SessionPhase>>,
    commands: mpsc::UnboundedSender<Batch>,
    relay: Mutex<Option<JoinHandle<()>>>,
    backend: Arc<dyn BackendChannel>,
    closing: Arc<AtomicBool>,
}

impl Session {
    /// Launches the backend and starts relaying. The session is active once
    /// this returns.
    pub fn start(
        connection_id: Uuid,
        launcher: &dyn BackendLauncher,
        sink: ClientSink,
    ) -> Result<Self, SessionError> {
        let phase = Arc::new(Mutex::new(SessionPhase::Created));
        let closing = Arc::new(AtomicBool::new(false));
        let backend = launcher.launch(connection_id, sink.clone())?;
        let (commands, inbox) = mpsc::unbounded_channel();
        let relay = tokio::spawn(relay(
            connection_id,
            inbox,
            Arc::clone(&backend),
            sink,
            Arc::clone(&phase),
            Arc::clone(&closing),
        ));
        *phase.lock() = SessionPhase::Active;
        info!(connection_id = %connection_id, "session active");

        Ok(Self {
            connection_id,
            phase,
            commands,
            relay: Mutex::new(Some(relay)),
            backend,
            closing,
        })
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    pub async fn backend_health(&self) -> BackendHealth {
        self.backend.health().await
    }

    /// Queues a client command for the backend.
    pub fn submit(&self, batch: Batch) -> Result<(), SessionError> {
        let phase = self.phase();
        if phase != SessionPhase::Active {
            return Err(SessionError::NotActive {
                connection_id: self.connection_id,
                phase,
            });
        }
        self.commands
            .send(batch)
            .map_err(|_| SessionError::Backend(BackendError::Closed))
    }

    /// Stops relaying and tears the backend down. Only the first call does
    /// any work, including the teardown the relay runs after a backend fault.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        *self.phase.lock() = SessionPhase::ShuttingDown;
        if let Some(relay) = self.relay.lock().take() {
            relay.abort();
        }
        self.backend.shutdown().await?;
        debug!(connection_id = %self.connection_id, "session shut down");
        Ok(())
    }

    pub(crate) fn mark_removed(&self) {
        *self.phase.lock() = SessionPhase::Removed;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection_id", &self.connection_id)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Client to backend direction. Replies to a command go back to the client
/// as a fresh batch. A fatal backend fault ends the relay, leaves the session
/// shutting down and tears the backend down; the client connection stays up.
async fn relay(
    connection_id: Uuid,
    mut inbox: mpsc::UnboundedReceiver<Batch>,
    backend: Arc<dyn BackendChannel>,
    sink: ClientSink,
    phase: Arc<Mutex<SessionPhase>>,
    closing: Arc<AtomicBool>,
) {
    let mut health = interval(HEALTH_INTERVAL);
    health.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = inbox.recv() => {
                let Some(batch) = command else {
                    debug!(connection_id = %connection_id, "relay finished");
                    return;
                };
                counter!("hawkeye_batches_relayed_total", 1, "direction" => "to_backend");
                match backend.request(batch).await {
                    Ok(Some(reply)) => {
                        sink.push(&reply);
                    }
                    Ok(None) => {}
                    Err(err) if !err.is_fatal() => {
                        warn!(connection_id = %connection_id, error = %err, "backend rejected command");
                    }
                    Err(err) => {
                        error!(connection_id = %connection_id, error = %err, "backend channel failed");
                        break;
                    }
                }
            }
            _ = health.tick() => {
                if let BackendHealth::Exited(code) = backend.health().await {
                    warn!(connection_id = %connection_id, code = ?code, "backend exited");
                    break;
                }
            }
        }
    }

    if closing.swap(true, Ordering::SeqCst) {
        return;
    }
    counter!("hawkeye_backend_faults_total", 1);
    *phase.lock() = SessionPhase::ShuttingDown;
    if let Err(err) = backend.shutdown().await {
        error!(connection_id = %connection_id, error = %err, "backend teardown failed");
    }
    info!(connection_id = %connection_id, "faulted backend torn down");
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;

    /// In-memory backend: echoes commands back as replies.
    #[derive(Default)]
    pub struct EchoBackend {
        pub fail_shutdown: bool,
        pub exited: Mutex<Option<i32>>,
        pub shutdowns: Mutex<usize>,
        pub requests: Mutex<Vec<Batch>>,
    }

    #[async_trait]
    impl BackendChannel for EchoBackend {
        async fn request(&self, batch: Batch) -> Result<Option<Batch>, BackendError> {
            self.requests.lock().push(batch.clone());
            if batch.is_empty() {
                return Err(BackendError::Closed);
            }
            Ok(Some(batch))
        }

        async fn health(&self) -> BackendHealth {
            match *self.exited.lock() {
                Some(code) => BackendHealth::Exited(Some(code)),
                None => BackendHealth::Running,
            }
        }

        async fn shutdown(&self) -> Result<(), BackendError> {
            *self.shutdowns.lock() += 1;
            if self.fail_shutdown {
                return Err(BackendError::Io(std::io::Error::other("gateway stuck")));
            }
            Ok(())
        }
    }

    /// Hands out echo backends. Launches whose index is listed in
    /// `fail_shutdown_for` fault on shutdown.
    #[derive(Default)]
    pub struct EchoLauncher {
        pub launched: Mutex<Vec<Arc<EchoBackend>>>,
        pub fail_shutdown_for: Mutex<Vec<usize>>,
    }

    impl BackendLauncher for EchoLauncher {
        fn launch(
            &self,
            _connection_id: Uuid,
            _sink: ClientSink,
        ) -> Result<Arc<dyn BackendChannel>, BackendError> {
            let mut launched = self.launched.lock();
            let backend = Arc::new(EchoBackend {
                fail_shutdown: self.fail_shutdown_for.lock().contains(&launched.len()),
                ..EchoBackend::default()
            });
            launched.push(Arc::clone(&backend));
            Ok(backend)
        }
    }
}
