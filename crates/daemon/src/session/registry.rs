//! Session registry for the sessions owned by one connection.
//!
//! The registry is the authoritative in-memory store of live sessions: it
//! owns the mapping from session identifier to PTY process and from session
//! name to identifier, enforces identifier uniqueness, and pumps each
//! session's output into the connection's outbound event stream.

use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use protocol::{ServerEvent, DEFAULT_COLS, DEFAULT_ROWS};
use tokio::sync::mpsc;

use super::pty::{PtyProcess, SessionError, SessionId};

/// Per-connection session defaults, sourced from the daemon configuration.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    /// Shell command for new sessions. None resolves $SHELL / /bin/sh.
    pub shell: Option<String>,
    /// Terminal columns when a create request omits geometry.
    pub cols: u16,
    /// Terminal rows when a create request omits geometry.
    pub rows: u16,
    /// Maximum number of concurrent sessions per connection.
    pub max_sessions: usize,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            shell: None,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            max_sessions: 10,
        }
    }
}

/// A live session owned by the registry.
struct SessionEntry {
    /// The PTY process adapter.
    process: Arc<PtyProcess>,
    /// Human-readable name, if one was supplied at creation.
    name: Option<String>,
    /// Current terminal geometry.
    geometry: std::sync::Mutex<(u16, u16)>,
    /// When the session was created.
    created_at: SystemTime,
}

/// Thread-safe store of all live sessions for one connection.
///
/// All mutation of the session table goes through the registry's atomic
/// operations; the per-session output pump tasks never touch the table
/// directly except through [`finalize`], which both the explicit close path
/// and the natural-exit path converge on. Whichever path wins the removal
/// emits the single `closed` event.
pub struct SessionRegistry {
    /// Map of session ID to live session.
    sessions: Arc<DashMap<SessionId, SessionEntry>>,

    /// Map of session name to session ID.
    names: Arc<DashMap<String, SessionId>>,

    /// Outbound event stream shared with the message router.
    events: mpsc::UnboundedSender<ServerEvent>,

    /// Defaults applied to new sessions.
    defaults: SessionDefaults,
}

impl SessionRegistry {
    /// Creates a registry that emits its events into the given channel.
    pub fn new(events: mpsc::UnboundedSender<ServerEvent>, defaults: SessionDefaults) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            names: Arc::new(DashMap::new()),
            events,
            defaults,
        }
    }

    /// Creates a new session under the client-chosen identifier.
    ///
    /// Emits `created` and begins pumping the session's output into
    /// `output` events tagged with the identifier. The `created` event is
    /// enqueued before the pump starts, so it always precedes any output.
    ///
    /// A supplied name is registered in the name index unless it already
    /// maps to a live session; colliding with a live name is not an error
    /// here (the client checks before sending `create`).
    pub async fn create(
        &self,
        id: SessionId,
        cols: Option<u16>,
        rows: Option<u16>,
        name: Option<String>,
    ) -> Result<(), SessionError> {
        if self.sessions.contains_key(&id) {
            return Err(SessionError::DuplicateId(id));
        }

        if self.sessions.len() >= self.defaults.max_sessions {
            return Err(SessionError::SpawnFailed(format!(
                "session limit reached ({})",
                self.defaults.max_sessions
            )));
        }

        let cols = cols.unwrap_or(self.defaults.cols);
        let rows = rows.unwrap_or(self.defaults.rows);

        let (process, chunk_rx) = PtyProcess::spawn(self.defaults.shell.clone(), cols, rows)?;
        let process = Arc::new(process);

        tracing::info!(
            session_id = %id,
            pid = ?process.pid(),
            cols,
            rows,
            name = ?name,
            "Created session"
        );

        if let Some(ref name) = name {
            let prior_is_live = match self.names.get(name) {
                Some(prior) => self.sessions.contains_key(prior.value()),
                None => false,
            };
            if prior_is_live {
                tracing::warn!(
                    name = %name,
                    "Name already maps to a live session, keeping existing mapping"
                );
            } else {
                self.names.insert(name.clone(), id.clone());
            }
        }

        self.sessions.insert(
            id.clone(),
            SessionEntry {
                process: Arc::clone(&process),
                name,
                geometry: std::sync::Mutex::new((cols, rows)),
                created_at: SystemTime::now(),
            },
        );

        // Enqueued before the pump task exists, so `created` is ordered
        // ahead of every `output` for this id.
        let _ = self.events.send(ServerEvent::created(id.clone()));

        self.spawn_output_pump(id, chunk_rx);

        Ok(())
    }

    /// Forwards input bytes to a session.
    ///
    /// Write failures on a live session are logged, not surfaced; the
    /// output pump notices the dead process independently and closes the
    /// session.
    pub async fn input(&self, id: &SessionId, data: &[u8]) -> Result<(), SessionError> {
        let process = self
            .sessions
            .get(id)
            .map(|entry| Arc::clone(&entry.process))
            .ok_or_else(|| SessionError::UnknownSession(id.clone()))?;

        if let Err(e) = process.write(data).await {
            tracing::warn!(session_id = %id, error = %e, "Failed to write to session");
        }

        Ok(())
    }

    /// Changes a session's terminal geometry.
    pub async fn resize(&self, id: &SessionId, cols: u16, rows: u16) -> Result<(), SessionError> {
        let process = self
            .sessions
            .get(id)
            .map(|entry| Arc::clone(&entry.process))
            .ok_or_else(|| SessionError::UnknownSession(id.clone()))?;

        match process.resize(cols, rows).await {
            Ok(()) => {
                if let Some(entry) = self.sessions.get(id) {
                    if let Ok(mut geometry) = entry.geometry.lock() {
                        *geometry = (cols, rows);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "Failed to resize session");
            }
        }

        Ok(())
    }

    /// Terminates and releases a session.
    ///
    /// Always succeeds; closing an unknown or already-closed id is a no-op
    /// so that client-initiated closes never race process-exit closes into
    /// an error.
    pub async fn close(&self, id: &SessionId) {
        finalize(&self.sessions, &self.names, &self.events, id).await;
    }

    /// Terminates every session owned by the registry.
    ///
    /// Used on connection teardown; sessions do not outlive their
    /// connection.
    pub async fn close_all(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            finalize(&self.sessions, &self.names, &self.events, &id).await;
        }
    }

    /// Looks up the live session registered under a name.
    pub fn resolve_name(&self, name: &str) -> Option<SessionId> {
        let id = self.names.get(name).map(|entry| entry.value().clone())?;
        if self.sessions.contains_key(&id) {
            Some(id)
        } else {
            None
        }
    }

    /// Returns whether a session is live.
    pub fn exists(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Returns the number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns a session's current terminal geometry.
    pub fn geometry(&self, id: &SessionId) -> Option<(u16, u16)> {
        let entry = self.sessions.get(id)?;
        let geometry = entry.geometry.lock().ok()?;
        Some(*geometry)
    }

    /// Returns a session's creation timestamp.
    pub fn created_at(&self, id: &SessionId) -> Option<SystemTime> {
        self.sessions.get(id).map(|entry| entry.created_at)
    }

    /// Spawns the task that pumps one session's output chunks into
    /// outbound `output` events and finalizes the session when the chunk
    /// stream ends.
    fn spawn_output_pump(&self, id: SessionId, mut chunk_rx: mpsc::Receiver<Vec<u8>>) {
        let sessions = Arc::clone(&self.sessions);
        let names = Arc::clone(&self.names);
        let events = self.events.clone();

        tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                if !sessions.contains_key(&id) {
                    // Closed while chunks were in flight; residual output
                    // must not follow the `closed` event.
                    break;
                }
                let data = String::from_utf8_lossy(&chunk).to_string();
                if events
                    .send(ServerEvent::output(id.clone(), data))
                    .is_err()
                {
                    break;
                }
            }

            finalize(&sessions, &names, &events, &id).await;
        });
    }
}

/// Removes a session from the table, clears its name mapping, terminates
/// the process, and emits the `closed` event.
///
/// Both the explicit close path and the natural-exit path call this; the
/// single `DashMap::remove` decides the winner, so exactly one `closed` is
/// emitted per session no matter how the two paths interleave.
async fn finalize(
    sessions: &DashMap<SessionId, SessionEntry>,
    names: &DashMap<String, SessionId>,
    events: &mpsc::UnboundedSender<ServerEvent>,
    id: &SessionId,
) {
    let Some((_, entry)) = sessions.remove(id) else {
        return;
    };

    if let Some(ref name) = entry.name {
        names.remove_if(name, |_, mapped| mapped == id);
    }

    entry.process.terminate().await;

    let _ = events.send(ServerEvent::closed(id.clone()));

    tracing::info!(session_id = %id, "Session closed");
}
