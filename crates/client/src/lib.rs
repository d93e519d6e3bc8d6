//! # Termbook Client Library
//!
//! The client side of Termbook's terminal multiplexing: a session proxy
//! that mints session identifiers, queues the initial command for each
//! session until the daemon confirms creation, routes output to rendering
//! surfaces, and reuses named sessions across runs; plus an explicit
//! connection state machine with bounded, fixed-step backoff.
//!
//! ## Overview
//!
//! - [`SessionProxy`]: per-connection client state. Issues identifiers
//!   for new sessions, tracks the name → identifier index, and consumes
//!   each pending command exactly once on the first `created` event.
//! - [`Connection`]: owns the WebSocket link to the daemon and drives the
//!   proxy. Reconnection follows a [`ReconnectPolicy`] and ends in an
//!   observable [`ConnectionState::GaveUp`] once the attempt budget is
//!   spent; sessions do not survive a dropped connection.
//! - [`OutputSink`]: the rendering surface a session's output is appended
//!   to. Terminal emulation itself lives outside this crate.
//!
//! ## Example
//!
//! ```rust
//! use client::{OutputSink, SessionProxy};
//! use protocol::ServerEvent;
//!
//! struct Buffer(String);
//! impl OutputSink for Buffer {
//!     fn append(&mut self, data: &str) {
//!         self.0.push_str(data);
//!     }
//! }
//!
//! let mut proxy = SessionProxy::new();
//! let (id, create) = proxy.create_session(
//!     Some("dev".to_string()),
//!     Some("make test\n".to_string()),
//!     Box::new(Buffer(String::new())),
//! );
//!
//! // Send `create`; once the daemon confirms, the queued command goes out.
//! let follow_ups = proxy.handle_event(&ServerEvent::created(id.clone()));
//! assert_eq!(follow_ups.len(), 1);
//! assert_eq!(proxy.lookup_named("dev"), Some(id));
//! # let _ = create;
//! ```

pub mod connection;
pub mod error;
pub mod proxy;

pub use connection::{Connection, ConnectionConfig, ConnectionState, ReconnectPolicy};
pub use error::ClientError;
pub use proxy::{OutputSink, SessionProxy};
