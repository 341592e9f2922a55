use std::process::Stdio;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{BackendError, BackendHealth, BackendSettings};

/// A gateway child process owned by one session.
pub struct ProcessHandle {
    connection_id: Uuid,
    program: String,
    pid: Option<u32>,
    child: Mutex<Child>,
    exit: SyncMutex<Option<Option<i32>>>,
    forwarders: SyncMutex<Vec<JoinHandle<()>>>,
}

impl ProcessHandle {
    /// Spawns `settings.program` with its configured arguments followed by
    /// `extra_args`. Auxiliary output is mirrored into the log when enabled;
    /// `stdout` is left alone when the caller wants it as a data channel.
    pub fn spawn(
        connection_id: Uuid,
        settings: &BackendSettings,
        extra_args: &[String],
        stdout_is_data: bool,
    ) -> Result<Self, BackendError> {
        let mut command = Command::new(&settings.program);
        command.args(&settings.args).args(extra_args).kill_on_drop(true);
        if stdout_is_data {
            command.stdin(Stdio::piped()).stdout(Stdio::piped());
        } else {
            command.stdin(Stdio::null()).stdout(output_mode(settings.log_stdout));
        }
        command.stderr(output_mode(settings.log_stderr));

        let mut child = command.spawn().map_err(|source| BackendError::Spawn {
            program: settings.program.clone(),
            source,
        })?;
        let pid = child.id();
        info!(
            connection_id = %connection_id,
            program = %settings.program,
            pid = ?pid,
            "gateway launched"
        );

        let mut forwarders = Vec::new();
        if !stdout_is_data && settings.log_stdout {
            if let Some(stdout) = child.stdout.take() {
                forwarders.push(tokio::spawn(forward_lines(connection_id, stdout, "stdout")));
            }
        }
        if settings.log_stderr {
            if let Some(stderr) = child.stderr.take() {
                forwarders.push(tokio::spawn(forward_lines(connection_id, stderr, "stderr")));
            }
        }

        Ok(Self {
            connection_id,
            program: settings.program.clone(),
            pid,
            child: Mutex::new(child),
            exit: SyncMutex::new(None),
            forwarders: SyncMutex::new(forwarders),
        })
    }

    /// Moves the child's stdio handles out so a channel can own them.
    pub fn take_stdio(&mut self) -> (Option<ChildStdin>, Option<ChildStdout>) {
        let child = self.child.get_mut();
        (child.stdin.take(), child.stdout.take())
    }

    pub fn health(&self) -> BackendHealth {
        if let Some(code) = *self.exit.lock() {
            return BackendHealth::Exited(code);
        }
        // a terminate in progress holds the lock
        let Ok(mut child) = self.child.try_lock() else {
            return BackendHealth::Running;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                *self.exit.lock() = Some(status.code());
                BackendHealth::Exited(status.code())
            }
            Ok(None) => BackendHealth::Running,
            Err(err) => {
                warn!(connection_id = %self.connection_id, error = %err, "failed to poll gateway");
                BackendHealth::Exited(None)
            }
        }
    }

    /// Waits up to `grace` for the process to leave on its own, then kills
    /// it. With `signal` set, SIGTERM is delivered first.
    pub async fn terminate(&self, grace: Duration, signal: bool) -> Result<(), BackendError> {
        let mut child = self.child.lock().await;
        if self.exit.lock().is_some() {
            return Ok(());
        }

        if signal {
            if let Some(pid) = self.pid {
                send_sigterm(pid);
            }
        }

        let status = match timeout(grace, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    connection_id = %self.connection_id,
                    program = %self.program,
                    grace_ms = grace.as_millis() as u64,
                    "gateway ignored graceful stop; killing"
                );
                child.start_kill()?;
                child.wait().await?
            }
        };
        *self.exit.lock() = Some(status.code());
        debug!(connection_id = %self.connection_id, status = %status, "gateway exited");

        for task in self.forwarders.lock().drain(..) {
            task.abort();
        }
        Ok(())
    }
}

fn output_mode(mirror: bool) -> Stdio {
    if mirror {
        Stdio::piped()
    } else {
        Stdio::inherit()
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    // SAFETY: kill(2) with a pid we spawned and still own; no memory is shared.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        warn!(pid, error = %std::io::Error::last_os_error(), "failed to signal gateway");
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {}

async fn forward_lines<R>(connection_id: Uuid, stream: R, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if !trimmed.is_empty() {
                    info!(connection_id = %connection_id, stream = name, line = trimmed, "gateway output");
                }
            }
            Err(err) => {
                warn!(connection_id = %connection_id, stream = name, error = %err, "failed to read gateway output");
                break;
            }
        }
    }
}
