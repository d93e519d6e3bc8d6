//! Message router for dispatching inbound frames to the session registry.
//!
//! The router decodes each inbound text frame into a [`ClientMessage`] and
//! dispatches it; registry errors become outbound `error` events and never
//! terminate the connection. Malformed frames are dropped with a logged
//! diagnostic.

use std::sync::Arc;

use protocol::{ClientMessage, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::session::SessionRegistry;

/// Routes decoded client messages to the session registry and reports
/// failures back on the connection's outbound event stream.
///
/// One router is bound to each connection for its lifetime.
pub struct MessageRouter {
    /// Session registry owned by the same connection.
    registry: Arc<SessionRegistry>,

    /// Outbound event stream shared with the registry.
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl MessageRouter {
    /// Creates a router bound to the given registry and outbound stream.
    pub fn new(registry: Arc<SessionRegistry>, events: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { registry, events }
    }

    /// Decodes and dispatches one inbound text frame.
    ///
    /// Frames that do not decode into a known message kind are dropped
    /// with a diagnostic; they are never surfaced to the remote party and
    /// never treated as a different message kind.
    pub async fn handle_frame(&self, text: &str) {
        let message = match ClientMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, frame = %truncate_for_log(text), "Dropping malformed frame");
                return;
            }
        };

        self.dispatch(message).await;
    }

    /// Dispatches one decoded message to the registry.
    pub async fn dispatch(&self, message: ClientMessage) {
        debug!(?message, "Routing message");

        match message {
            ClientMessage::Create {
                id,
                name,
                cols,
                rows,
            } => {
                if let Err(e) = self.registry.create(id, cols, rows, name).await {
                    self.report_error(e.to_string());
                }
            }

            ClientMessage::Input { session_id, data } => {
                if let Err(e) = self.registry.input(&session_id, data.as_bytes()).await {
                    self.report_error(e.to_string());
                }
            }

            ClientMessage::Resize {
                session_id,
                cols,
                rows,
            } => {
                if let Err(e) = self.registry.resize(&session_id, cols, rows).await {
                    self.report_error(e.to_string());
                }
            }

            ClientMessage::Close { session_id } => {
                // Close is deliberately infallible and idempotent.
                self.registry.close(&session_id).await;
            }

            ClientMessage::Log {
                level,
                message,
                timestamp,
            } => {
                forward_client_log(&level, &message, timestamp.as_deref());
            }
        }
    }

    /// Emits an `error` event; the connection stays open.
    fn report_error(&self, message: String) {
        warn!(error = %message, "Request failed");
        let _ = self.events.send(ServerEvent::error(message));
    }
}

/// Forwards a client-side diagnostic line into the daemon's log at the
/// requested level. Unrecognized levels map to trace.
fn forward_client_log(level: &str, message: &str, timestamp: Option<&str>) {
    let ts = timestamp.unwrap_or("");
    match level {
        "error" => tracing::error!("[client {}] {}", ts, message),
        "warn" => tracing::warn!("[client {}] {}", ts, message),
        "info" => tracing::info!("[client {}] {}", ts, message),
        "debug" => tracing::debug!("[client {}] {}", ts, message),
        _ => tracing::trace!("[client {}] {}", ts, message),
    }
}

/// Caps frame text quoted in diagnostics.
fn truncate_for_log(text: &str) -> &str {
    let max = 256;
    if text.len() <= max {
        text
    } else {
        // Find a char boundary at or below the cap.
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }
}
