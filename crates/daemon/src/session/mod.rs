//! Session management module.
//!
//! This module provides PTY spawning and session lifecycle management.
//! Sessions are created on demand, fed input, resized, and closed either
//! explicitly or when their shell process exits.

pub mod pty;
pub mod registry;

pub use pty::{PtyProcess, SessionError, SessionId};
pub use registry::{SessionDefaults, SessionRegistry};
