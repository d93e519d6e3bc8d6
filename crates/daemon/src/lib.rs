//! # Termbook Daemon Library
//!
//! This crate provides the server side of Termbook's terminal
//! multiplexing: one authenticated WebSocket connection drives any number
//! of independent interactive shell sessions.
//!
//! ## Overview
//!
//! The daemon accepts a duplex channel at `/ws`, gated by an access
//! token, and gives the client four operations over it: `create`,
//! `input`, `resize`, and `close`. Each live session is an OS
//! pseudo-terminal with a shell attached; its output streams back to the
//! client as `output` events in real time, and its termination (for any
//! cause) is reported exactly once as a `closed` event.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   Connection Gateway                     │
//! │        TCP accept → /ws upgrade → token check            │
//! ├──────────────────────────────────────────────────────────┤
//! │                    Message Router                        │
//! │        decode frames → dispatch → encode events          │
//! ├──────────────────────────────────────────────────────────┤
//! │                   Session Registry                       │
//! │     id → PTY process table, name → id index, pumps       │
//! ├──────────────────────────────────────────────────────────┤
//! │                  PTY Process Adapter                     │
//! │       openpty, shell spawn, read/write/resize/kill       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! One registry and one router are constructed per connection; sessions
//! never outlive the connection that created them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::auth::StaticTokenAuthenticator;
//! use daemon::config::Config;
//! use daemon::gateway::ConnectionGateway;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_or_default()?;
//!     config.ensure_token();
//!
//!     let authenticator = StaticTokenAuthenticator::shared(config.auth.token.clone());
//!     let gateway = ConnectionGateway::bind(
//!         config.bind_addr()?,
//!         authenticator,
//!         config.session_defaults(),
//!     )
//!     .await?;
//!
//!     gateway.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`auth`]: Token extraction and verification
//! - [`session`]: PTY spawning and session lifecycle management
//! - [`router`]: Message decoding and dispatch
//! - [`gateway`]: Connection accept loop and per-connection wiring

pub mod auth;
pub mod config;
pub mod gateway;
pub mod router;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export auth types for convenience
pub use auth::{Authenticator, StaticTokenAuthenticator};

// Re-export session types for convenience
pub use session::{PtyProcess, SessionDefaults, SessionError, SessionId, SessionRegistry};

// Re-export router types for convenience
pub use router::MessageRouter;

// Re-export gateway types for convenience
pub use gateway::{ConnectionGateway, ConnectionPhase, WS_PATH};
