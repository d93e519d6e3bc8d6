//! Client session proxy.
//!
//! The proxy is the client's bookkeeping for the sessions multiplexed on
//! one connection: it mints session identifiers, queues the initial
//! command for each session until the daemon confirms creation, routes
//! output to the right rendering surface, and keeps the name index that
//! lets repeated runs of a named block reuse one underlying process.
//!
//! All state here is single-writer: only the connection's message-handling
//! path mutates it, so no internal locking is needed.

use std::collections::HashMap;

use protocol::{ClientMessage, ServerEvent};
use tracing::{debug, warn};
use uuid::Uuid;

/// A rendering surface that session output is appended to.
///
/// Interpreting escape sequences is the surface's concern, not the
/// proxy's.
pub trait OutputSink: Send {
    /// Appends a chunk of session output.
    fn append(&mut self, data: &str);
}

/// Client-side state for one session.
struct SessionState {
    /// Name the session was created under, if any.
    name: Option<String>,
    /// Where output for this session is rendered.
    sink: Box<dyn OutputSink>,
}

/// Client-side bookkeeping for the sessions of one connection.
pub struct SessionProxy {
    /// Live (or pending-confirmation) sessions by identifier.
    sessions: HashMap<String, SessionState>,

    /// Initial commands queued until the first `created` for their id.
    pending: HashMap<String, String>,

    /// Name → identifier index for session reuse.
    named: HashMap<String, String>,
}

impl SessionProxy {
    /// Creates an empty proxy.
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            pending: HashMap::new(),
            named: HashMap::new(),
        }
    }

    /// Starts a new session.
    ///
    /// Mints a fresh identifier, records the pending command (if any) to
    /// be sent on the first `created` acknowledgment, registers the name
    /// index entry, and returns the `create` message to send. Minting the
    /// identifier locally avoids a round trip before input can be queued.
    pub fn create_session(
        &mut self,
        name: Option<String>,
        initial_command: Option<String>,
        sink: Box<dyn OutputSink>,
    ) -> (String, ClientMessage) {
        let id = Uuid::new_v4().to_string();

        if let Some(command) = initial_command {
            self.pending.insert(id.clone(), command);
        }

        if let Some(ref name) = name {
            self.named.insert(name.clone(), id.clone());
        }

        self.sessions.insert(
            id.clone(),
            SessionState {
                name: name.clone(),
                sink,
            },
        );

        let message = ClientMessage::Create {
            id: id.clone(),
            name,
            cols: None,
            rows: None,
        };

        (id, message)
    }

    /// Looks up the session registered under a name.
    ///
    /// Callers use this to decide between sending `input` to an existing
    /// session and creating a new one.
    pub fn lookup_named(&self, name: &str) -> Option<String> {
        self.named.get(name).cloned()
    }

    /// Builds an `input` message for a session.
    pub fn input_message(&self, id: &str, data: impl Into<String>) -> ClientMessage {
        ClientMessage::Input {
            session_id: id.to_string(),
            data: data.into(),
        }
    }

    /// Applies one server event and returns any messages to send back.
    pub fn handle_event(&mut self, event: &ServerEvent) -> Vec<ClientMessage> {
        match event {
            ServerEvent::Created { session_id } => {
                if !self.sessions.contains_key(session_id) {
                    warn!(session_id = %session_id, "Created event for unknown session");
                    return Vec::new();
                }
                // The pending command is consumed exactly once, on the
                // first acknowledgment. No pending entry means a normal
                // idle creation.
                match self.pending.remove(session_id) {
                    Some(command) => vec![ClientMessage::Input {
                        session_id: session_id.clone(),
                        data: command,
                    }],
                    None => Vec::new(),
                }
            }

            ServerEvent::Output { session_id, data } => {
                match self.sessions.get_mut(session_id) {
                    Some(state) => state.sink.append(data),
                    None => {
                        // The render target may already be gone locally.
                        debug!(session_id = %session_id, "Dropping output for unknown session");
                    }
                }
                Vec::new()
            }

            ServerEvent::Closed { session_id } => {
                self.pending.remove(session_id);
                if let Some(state) = self.sessions.remove(session_id) {
                    if let Some(name) = state.name {
                        // Only clear the index if it still points here.
                        if self.named.get(&name) == Some(session_id) {
                            self.named.remove(&name);
                        }
                    }
                }
                Vec::new()
            }

            ServerEvent::Error { message } => {
                warn!(error = %message, "Server reported error");
                Vec::new()
            }
        }
    }

    /// Drops all bookkeeping.
    ///
    /// Sessions live exactly as long as their connection; call this when
    /// the connection is lost so a reconnect starts from a clean slate.
    pub fn connection_lost(&mut self) {
        if !self.sessions.is_empty() {
            debug!(
                sessions = self.sessions.len(),
                "Connection lost, dropping session state"
            );
        }
        self.sessions.clear();
        self.pending.clear();
        self.named.clear();
    }

    /// Returns the number of tracked sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns whether a pending command is queued for a session.
    pub fn has_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }
}

impl Default for SessionProxy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Sink that collects output into a shared string.
    struct SharedSink(Arc<Mutex<String>>);

    impl OutputSink for SharedSink {
        fn append(&mut self, data: &str) {
            self.0.lock().unwrap().push_str(data);
        }
    }

    fn shared_sink() -> (Arc<Mutex<String>>, Box<dyn OutputSink>) {
        let buffer = Arc::new(Mutex::new(String::new()));
        (Arc::clone(&buffer), Box::new(SharedSink(Arc::clone(&buffer))))
    }

    #[test]
    fn test_create_session_mints_unique_ids() {
        let mut proxy = SessionProxy::new();
        let (_, sink1) = shared_sink();
        let (_, sink2) = shared_sink();

        let (id1, msg1) = proxy.create_session(None, None, sink1);
        let (id2, _) = proxy.create_session(None, None, sink2);

        assert_ne!(id1, id2);
        assert_eq!(proxy.session_count(), 2);
        assert!(matches!(msg1, ClientMessage::Create { ref id, .. } if *id == id1));
    }

    #[test]
    fn test_pending_command_consumed_exactly_once() {
        let mut proxy = SessionProxy::new();
        let (_, sink) = shared_sink();

        let (id, _) = proxy.create_session(None, Some("echo hi\n".to_string()), sink);
        assert!(proxy.has_pending(&id));

        let responses = proxy.handle_event(&ServerEvent::created(id.clone()));
        assert_eq!(responses.len(), 1);
        assert!(matches!(
            responses[0],
            ClientMessage::Input { ref session_id, ref data }
                if *session_id == id && data == "echo hi\n"
        ));
        assert!(!proxy.has_pending(&id));

        // A second acknowledgment must not replay the command.
        let responses = proxy.handle_event(&ServerEvent::created(id.clone()));
        assert!(responses.is_empty());
    }

    #[test]
    fn test_created_without_pending_is_idle() {
        let mut proxy = SessionProxy::new();
        let (_, sink) = shared_sink();

        let (id, _) = proxy.create_session(None, None, sink);
        let responses = proxy.handle_event(&ServerEvent::created(id));
        assert!(responses.is_empty());
    }

    #[test]
    fn test_created_for_unknown_session_ignored() {
        let mut proxy = SessionProxy::new();
        let responses = proxy.handle_event(&ServerEvent::created("ghost"));
        assert!(responses.is_empty());
    }

    #[test]
    fn test_output_appended_to_sink() {
        let mut proxy = SessionProxy::new();
        let (buffer, sink) = shared_sink();

        let (id, _) = proxy.create_session(None, None, sink);
        proxy.handle_event(&ServerEvent::output(id.clone(), "line one\n"));
        proxy.handle_event(&ServerEvent::output(id, "line two\n"));

        assert_eq!(*buffer.lock().unwrap(), "line one\nline two\n");
    }

    #[test]
    fn test_output_for_unknown_session_dropped() {
        let mut proxy = SessionProxy::new();
        // Must not panic, must emit nothing.
        let responses = proxy.handle_event(&ServerEvent::output("ghost", "data"));
        assert!(responses.is_empty());
    }

    #[test]
    fn test_named_session_reuse() {
        let mut proxy = SessionProxy::new();
        let (_, sink) = shared_sink();

        let (id, _) = proxy.create_session(Some("dev".to_string()), None, sink);
        assert_eq!(proxy.lookup_named("dev"), Some(id.clone()));

        // A second run routes into the same session.
        let reuse_id = proxy.lookup_named("dev").unwrap();
        let msg = proxy.input_message(&reuse_id, "make\n");
        assert!(matches!(msg, ClientMessage::Input { ref session_id, .. } if *session_id == id));
    }

    #[test]
    fn test_closed_cleans_bookkeeping() {
        let mut proxy = SessionProxy::new();
        let (_, sink) = shared_sink();

        let (id, _) = proxy.create_session(
            Some("dev".to_string()),
            Some("echo queued\n".to_string()),
            sink,
        );

        proxy.handle_event(&ServerEvent::closed(id.clone()));

        assert_eq!(proxy.session_count(), 0);
        assert_eq!(proxy.lookup_named("dev"), None);
        assert!(!proxy.has_pending(&id));
    }

    #[test]
    fn test_closed_keeps_reassigned_name() {
        let mut proxy = SessionProxy::new();
        let (_, sink1) = shared_sink();
        let (_, sink2) = shared_sink();

        let (old_id, _) = proxy.create_session(Some("dev".to_string()), None, sink1);
        // The name was reassigned to a newer session before the old one
        // closed; the index must keep the newer entry.
        let (new_id, _) = proxy.create_session(Some("dev".to_string()), None, sink2);

        proxy.handle_event(&ServerEvent::closed(old_id));
        assert_eq!(proxy.lookup_named("dev"), Some(new_id));
    }

    #[test]
    fn test_error_event_is_nonfatal() {
        let mut proxy = SessionProxy::new();
        let (_, sink) = shared_sink();
        let (id, _) = proxy.create_session(None, None, sink);

        let responses = proxy.handle_event(&ServerEvent::error("spawn failed"));
        assert!(responses.is_empty());
        // Existing state is untouched.
        assert_eq!(proxy.session_count(), 1);
        let _ = id;
    }

    #[test]
    fn test_connection_lost_clears_everything() {
        let mut proxy = SessionProxy::new();
        let (_, sink) = shared_sink();
        let (id, _) =
            proxy.create_session(Some("dev".to_string()), Some("ls\n".to_string()), sink);

        proxy.connection_lost();

        assert_eq!(proxy.session_count(), 0);
        assert_eq!(proxy.lookup_named("dev"), None);
        assert!(!proxy.has_pending(&id));
    }
}
