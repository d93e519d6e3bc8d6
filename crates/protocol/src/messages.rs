//! Protocol message definitions for Termbook.
//!
//! Messages are exchanged as JSON text frames over the WebSocket connection.
//! Every message is a tagged record whose `type` field selects the variant;
//! session-addressed messages carry the client-chosen session identifier.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Terminal width used when a `create` request omits geometry.
pub const DEFAULT_COLS: u16 = 80;

/// Terminal height used when a `create` request omits geometry.
pub const DEFAULT_ROWS: u16 = 24;

/// Requests sent from a client to the daemon.
///
/// The session identifier in `Create` is minted by the client so that input
/// can be queued for the session before the daemon confirms creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Spawn a new session under the given client-chosen identifier.
    Create {
        /// Client-minted session identifier.
        id: String,
        /// Optional human-readable session name for reuse across runs.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Requested terminal columns (default [`DEFAULT_COLS`]).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cols: Option<u16>,
        /// Requested terminal rows (default [`DEFAULT_ROWS`]).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows: Option<u16>,
    },

    /// Bytes to write to a session's input stream.
    Input {
        /// Target session.
        session_id: String,
        /// Input text, applied in send order.
        data: String,
    },

    /// Change a session's terminal geometry.
    Resize {
        /// Target session.
        session_id: String,
        /// New terminal columns.
        cols: u16,
        /// New terminal rows.
        rows: u16,
    },

    /// Terminate and release a session.
    Close {
        /// Target session.
        session_id: String,
    },

    /// Forward a client-side diagnostic line into the daemon's log.
    ///
    /// Independent of session state; shares the channel but carries no
    /// session addressing.
    Log {
        /// Severity label (`error`, `warn`, `info`, `debug`, anything else
        /// is treated as trace).
        level: String,
        /// Diagnostic text.
        message: String,
        /// Client-side timestamp, passed through verbatim.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
}

/// Events sent from the daemon to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    /// The session is live and ready to accept input.
    Created {
        /// The session that was created.
        session_id: String,
    },

    /// Bytes produced by a session.
    Output {
        /// The session that produced the bytes.
        session_id: String,
        /// Output text, lossily decoded from the raw byte stream.
        data: String,
    },

    /// The session has terminated, by any cause.
    Closed {
        /// The session that terminated.
        session_id: String,
    },

    /// A request could not be satisfied; the connection remains open.
    Error {
        /// Human-readable description of the failure.
        message: String,
    },
}

impl ClientMessage {
    /// Serialize the message to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    /// Decode a JSON text frame into a message.
    ///
    /// Any frame that does not match a known message shape is rejected as
    /// [`ProtocolError::Malformed`].
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }
}

impl ServerEvent {
    /// Serialize the event to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    /// Decode a JSON text frame into an event.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }

    /// A `created` event for the given session.
    pub fn created(session_id: impl Into<String>) -> Self {
        Self::Created {
            session_id: session_id.into(),
        }
    }

    /// An `output` event carrying data for the given session.
    pub fn output(session_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Output {
            session_id: session_id.into(),
            data: data.into(),
        }
    }

    /// A `closed` event for the given session.
    pub fn closed(session_id: impl Into<String>) -> Self {
        Self::Closed {
            session_id: session_id.into(),
        }
    }

    /// An `error` event with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_wire_format() {
        let msg = ClientMessage::Create {
            id: "s1".to_string(),
            name: Some("dev".to_string()),
            cols: Some(120),
            rows: Some(40),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "create", "id": "s1", "name": "dev", "cols": 120, "rows": 40})
        );
    }

    #[test]
    fn test_create_minimal_wire_format() {
        // Omitted optionals must not appear on the wire
        let msg = ClientMessage::Create {
            id: "s1".to_string(),
            name: None,
            cols: None,
            rows: None,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "create", "id": "s1"}));
    }

    #[test]
    fn test_create_decodes_without_optionals() {
        let msg = ClientMessage::from_json(r#"{"type":"create","id":"s1"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Create {
                id: "s1".to_string(),
                name: None,
                cols: None,
                rows: None,
            }
        );
    }

    #[test]
    fn test_input_wire_format() {
        let msg =
            ClientMessage::from_json(r#"{"type":"input","session_id":"s1","data":"ls -la\n"}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Input {
                session_id: "s1".to_string(),
                data: "ls -la\n".to_string(),
            }
        );
    }

    #[test]
    fn test_resize_roundtrip() {
        let msg = ClientMessage::Resize {
            session_id: "s1".to_string(),
            cols: 200,
            rows: 50,
        };
        let decoded = ClientMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_log_message_decodes() {
        let msg = ClientMessage::from_json(
            r#"{"type":"log","level":"warn","message":"render stalled","timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMessage::Log { ref level, .. } if level == "warn"));
    }

    #[test]
    fn test_server_event_wire_formats() {
        let value: serde_json::Value =
            serde_json::from_str(&ServerEvent::created("s1").to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "created", "session_id": "s1"}));

        let value: serde_json::Value =
            serde_json::from_str(&ServerEvent::output("s1", "HELLO\n").to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "output", "session_id": "s1", "data": "HELLO\n"})
        );

        let value: serde_json::Value =
            serde_json::from_str(&ServerEvent::closed("s1").to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "closed", "session_id": "s1"}));

        let value: serde_json::Value =
            serde_json::from_str(&ServerEvent::error("no such session").to_json().unwrap())
                .unwrap();
        assert_eq!(value, json!({"type": "error", "message": "no such session"}));
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let err = ClientMessage::from_json(r#"{"type":"detach","session_id":"s1"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        let err = ClientMessage::from_json(r#"{"type":"input","session_id":"s1"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_unparseable_frame_is_malformed() {
        let err = ClientMessage::from_json("not json at all").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_missing_type_tag_is_malformed() {
        let err = ClientMessage::from_json(r#"{"session_id":"s1","data":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_unicode_data_roundtrip() {
        let msg = ClientMessage::Input {
            session_id: "s1".to_string(),
            data: "echo 'héllo wörld' ☃\n".to_string(),
        };
        let decoded = ClientMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(msg, decoded);
    }
}
