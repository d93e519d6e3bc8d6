//! # Termbook Protocol Library
//!
//! This crate defines the wire protocol spoken between the Termbook daemon
//! and its clients over a single authenticated WebSocket connection.
//!
//! ## Overview
//!
//! All protocol messages are small tagged JSON records. One connection
//! multiplexes an arbitrary number of terminal sessions; every message that
//! touches a session carries the session identifier chosen by the client at
//! creation time.
//!
//! - [`ClientMessage`]: requests flowing from client to daemon
//!   (`create`, `input`, `resize`, `close`, plus the `log` forwarding path)
//! - [`ServerEvent`]: events flowing from daemon to client
//!   (`created`, `output`, `closed`, `error`)
//!
//! ## Example
//!
//! ```rust
//! use protocol::{ClientMessage, ServerEvent};
//!
//! let create = ClientMessage::Create {
//!     id: "s1".to_string(),
//!     name: Some("dev".to_string()),
//!     cols: Some(120),
//!     rows: Some(40),
//! };
//! let json = create.to_json().unwrap();
//! let decoded = ClientMessage::from_json(&json).unwrap();
//! assert_eq!(create, decoded);
//!
//! let event = ServerEvent::created("s1");
//! assert!(event.to_json().unwrap().contains("\"created\""));
//! ```

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{ClientMessage, ServerEvent, DEFAULT_COLS, DEFAULT_ROWS};
