//! Gateway spoken to over its standard streams: one JSON batch per line in
//! each direction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hawkeye_proto::Batch;
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BackendChannel, BackendError, BackendHealth, BackendLauncher, BackendSettings, ProcessHandle,
};
use crate::session::ClientSink;

pub struct StdioLauncher {
    settings: BackendSettings,
}

impl StdioLauncher {
    pub fn new(settings: BackendSettings) -> Self {
        Self { settings }
    }
}

impl BackendLauncher for StdioLauncher {
    fn launch(
        &self,
        connection_id: Uuid,
        sink: ClientSink,
    ) -> Result<Arc<dyn BackendChannel>, BackendError> {
        let backend = StdioBackend::spawn(connection_id, &self.settings, sink)?;
        Ok(Arc::new(backend))
    }
}

pub struct StdioBackend {
    connection_id: Uuid,
    process: ProcessHandle,
    stdin: Mutex<Option<ChildStdin>>,
    reader: SyncMutex<Option<JoinHandle<()>>>,
    grace: Duration,
}

impl StdioBackend {
    pub fn spawn(
        connection_id: Uuid,
        settings: &BackendSettings,
        sink: ClientSink,
    ) -> Result<Self, BackendError> {
        let mut process = ProcessHandle::spawn(connection_id, settings, &[], true)?;
        let (stdin, stdout) = process.take_stdio();
        let stdout = stdout.ok_or(BackendError::Closed)?;
        let reader = tokio::spawn(read_pushes(connection_id, stdout, sink, settings.log_stdout));

        Ok(Self {
            connection_id,
            process,
            stdin: Mutex::new(stdin),
            reader: SyncMutex::new(Some(reader)),
            grace: settings.shutdown_grace,
        })
    }
}

#[async_trait]
impl BackendChannel for StdioBackend {
    async fn request(&self, batch: Batch) -> Result<Option<Batch>, BackendError> {
        let mut line = batch.to_json()?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        let pipe = stdin.as_mut().ok_or(BackendError::ShutDown)?;
        pipe.write_all(line.as_bytes()).await?;
        pipe.flush().await?;
        Ok(None)
    }

    async fn health(&self) -> BackendHealth {
        self.process.health()
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        // end of input is the graceful stop request
        drop(self.stdin.lock().await.take());
        let result = self.process.terminate(self.grace, false).await;
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        debug!(connection_id = %self.connection_id, "stdio backend shut down");
        result
    }
}

async fn read_pushes(connection_id: Uuid, stdout: ChildStdout, sink: ClientSink, mirror: bool) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if mirror {
                    info!(connection_id = %connection_id, stream = "stdout", line, "gateway output");
                }
                match Batch::from_json(line) {
                    Ok(batch) => {
                        sink.push(&batch);
                    }
                    Err(err) => {
                        warn!(connection_id = %connection_id, error = %err, "gateway wrote malformed batch");
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "failed to read gateway stdout");
                break;
            }
        }
    }
    debug!(connection_id = %connection_id, "gateway stdout closed");
}
