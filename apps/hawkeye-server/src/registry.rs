use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use metrics::{counter, gauge};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{BackendHealth, BackendLauncher};
use crate::session::{ClientSink, Session, SessionError, SessionPhase};

/// Process-wide table of live sessions keyed by connection id.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: DashMap<Uuid, Arc<Session>>,
    launcher: Arc<dyn BackendLauncher>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemovalReport {
    pub removed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub connection_id: Uuid,
    pub phase: SessionPhase,
    pub backend: BackendHealth,
}

impl SessionRegistry {
    pub fn new(launcher: Arc<dyn BackendLauncher>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                launcher,
            }),
        }
    }

    /// Returns the connection's session, launching one on first contact.
    ///
    /// The launch runs outside the table's lock. When two callers race for
    /// the same connection the first insert wins and the other session is
    /// shut down in the background.
    pub fn get_or_create(
        &self,
        connection_id: Uuid,
        sink: &ClientSink,
    ) -> Result<Arc<Session>, SessionError> {
        if let Some(existing) = self.inner.sessions.get(&connection_id) {
            return Ok(Arc::clone(existing.value()));
        }

        let session = Arc::new(Session::start(
            connection_id,
            self.inner.launcher.as_ref(),
            sink.clone(),
        )?);
        match self.inner.sessions.entry(connection_id) {
            Entry::Occupied(entry) => {
                let winner = Arc::clone(entry.get());
                drop(entry);
                debug!(connection_id = %connection_id, "lost session launch race");
                tokio::spawn(async move {
                    if let Err(err) = session.shutdown().await {
                        warn!(connection_id = %connection_id, error = %err, "duplicate session shutdown failed");
                    }
                    session.mark_removed();
                });
                Ok(winner)
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&session));
                counter!("hawkeye_sessions_created_total", 1);
                gauge!("hawkeye_sessions_active", self.inner.sessions.len() as f64);
                Ok(session)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Excises the session and shuts it down. A miss is logged, not raised.
    pub async fn remove(&self, connection_id: &Uuid) -> Result<(), SessionError> {
        let Some((_, session)) = self.inner.sessions.remove(connection_id) else {
            warn!(connection_id = %connection_id, "no session to remove");
            return Ok(());
        };
        gauge!("hawkeye_sessions_active", self.inner.sessions.len() as f64);
        counter!("hawkeye_sessions_removed_total", 1);

        let result = session.shutdown().await;
        session.mark_removed();
        info!(connection_id = %connection_id, "session removed");
        result
    }

    /// Shuts every session down. Faults are logged and counted; the sweep
    /// always finishes with an empty registry.
    pub async fn remove_all(&self) -> RemovalReport {
        let mut report = RemovalReport::default();
        while !self.is_empty() {
            let ids: Vec<Uuid> = self
                .inner
                .sessions
                .iter()
                .map(|entry| *entry.key())
                .collect();
            for id in ids {
                let Some((_, session)) = self.inner.sessions.remove(&id) else {
                    continue;
                };
                match session.shutdown().await {
                    Ok(()) => report.removed += 1,
                    Err(err) => {
                        error!(connection_id = %id, error = %err, "session shutdown failed");
                        report.failed += 1;
                    }
                }
                session.mark_removed();
                counter!("hawkeye_sessions_removed_total", 1);
            }
        }
        gauge!("hawkeye_sessions_active", 0.0);
        info!(removed = report.removed, failed = report.failed, "all sessions removed");
        report
    }

    pub async fn snapshot(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<Arc<Session>> = self
            .inner
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut snapshots = Vec::with_capacity(sessions.len());
        for session in sessions {
            snapshots.push(SessionSnapshot {
                connection_id: session.connection_id(),
                phase: session.phase(),
                backend: session.backend_health().await,
            });
        }
        snapshots
    }
}
