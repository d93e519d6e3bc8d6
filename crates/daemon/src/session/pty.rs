//! PTY process adapter.
//!
//! This module wraps one OS-level pseudo-terminal and the shell process
//! attached to it. It exposes byte-stream write, terminal resize, forced
//! termination, and a chunk receiver that yields output as the process
//! produces it.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Unique identifier for a session. Minted by the client at creation time.
pub type SessionId = String;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The referenced session has no live entry in the registry.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// A live session already holds this identifier.
    #[error("duplicate session id: {0}")]
    DuplicateId(SessionId),

    /// The shell process could not be started.
    #[error("failed to spawn session: {0}")]
    SpawnFailed(String),

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Buffer size for reading from the PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Capacity of the per-session output chunk channel.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// One pseudo-terminal with an interactive shell process attached.
///
/// Output is delivered through the chunk receiver returned by [`spawn`];
/// the receiver ends exactly when the process exits or the PTY is closed.
/// All other operations are idempotent with respect to a closed handle:
/// writes are logged and dropped, resizes are no-ops, and a second
/// terminate does nothing.
///
/// [`spawn`]: PtyProcess::spawn
pub struct PtyProcess {
    /// The PTY master handle, used for resize.
    master: Mutex<Box<dyn MasterPty + Send>>,

    /// The writer for the process's input stream.
    writer: Mutex<Box<dyn Write + Send>>,

    /// The child shell process.
    child: Mutex<Box<dyn Child + Send + Sync>>,

    /// Set once the process has exited or been terminated.
    closed: Arc<AtomicBool>,

    /// Process ID of the shell.
    pid: Option<u32>,
}

impl PtyProcess {
    /// Allocates a pseudo-terminal of the given geometry and starts an
    /// interactive shell attached to it.
    ///
    /// # Arguments
    /// * `shell` - Optional shell command. If None, uses $SHELL or /bin/sh.
    /// * `cols` - Terminal width in columns; must be positive.
    /// * `rows` - Terminal height in rows; must be positive.
    ///
    /// # Returns
    /// The adapter and the receiver for output chunks. Reading begins
    /// immediately on a blocking task; the receiver ends at process exit.
    pub fn spawn(
        shell: Option<String>,
        cols: u16,
        rows: u16,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>), SessionError> {
        if cols == 0 || rows == 0 {
            return Err(SessionError::SpawnFailed(format!(
                "invalid terminal geometry: {}x{}",
                cols, rows
            )));
        }

        let shell_cmd = detect_shell(shell);

        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let cmd = CommandBuilder::new(&shell_cmd);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let pid = child.process_id();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let closed = Arc::new(AtomicBool::new(false));
        let (chunk_tx, chunk_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);

        start_read_loop(reader, chunk_tx, Arc::clone(&closed));

        let process = PtyProcess {
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            child: Mutex::new(child),
            closed,
            pid,
        };

        Ok((process, chunk_rx))
    }

    /// Returns the process ID of the shell, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns whether the process has exited or been terminated.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Writes data to the process's input stream.
    ///
    /// On a closed handle the data is dropped with a debug log; callers
    /// never see "already closed" as an error.
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        if self.is_closed() {
            tracing::debug!(bytes = data.len(), "Dropping write to closed PTY");
            return Ok(());
        }

        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;

        Ok(())
    }

    /// Propagates a terminal geometry change to the PTY.
    ///
    /// Idempotent; a no-op on a closed handle.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if self.is_closed() {
            tracing::debug!(cols, rows, "Ignoring resize of closed PTY");
            return Ok(());
        }

        let master = self.master.lock().await;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;

        tracing::debug!(cols, rows, "Resized PTY");

        Ok(())
    }

    /// Sends a termination signal to the process and releases the PTY.
    ///
    /// Safe to call after natural process exit; a second call is a no-op.
    pub async fn terminate(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut child = self.child.lock().await;

        if let Err(e) = child.kill() {
            // Already-exited processes report an error here; nothing to do.
            tracing::debug!(error = %e, "Kill returned error (process likely exited)");
        }

        match child.wait() {
            Ok(status) => {
                tracing::info!(exit_code = status.exit_code(), "Shell process reaped");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to reap shell process");
            }
        }
    }
}

/// Starts the blocking read loop that pumps PTY output into the chunk
/// channel. The loop ends on EOF, read error, or when the channel's
/// receiver is dropped; the channel closing signals end-of-stream.
fn start_read_loop(
    reader: Box<dyn Read + Send>,
    chunk_tx: mpsc::Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
) {
    let reader = Arc::new(std::sync::Mutex::new(reader));

    tokio::spawn(async move {
        loop {
            let reader_clone = Arc::clone(&reader);

            let result = tokio::task::spawn_blocking(move || {
                let mut buffer = vec![0u8; READ_BUFFER_SIZE];
                let mut reader = match reader_clone.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                match reader.read(&mut buffer) {
                    Ok(0) => Ok(None), // EOF
                    Ok(n) => {
                        buffer.truncate(n);
                        Ok(Some(buffer))
                    }
                    Err(e) => Err(e),
                }
            })
            .await;

            match result {
                Ok(Ok(Some(data))) => {
                    if chunk_tx.send(data).await.is_err() {
                        tracing::debug!("Chunk receiver dropped, ending read loop");
                        break;
                    }
                }
                Ok(Ok(None)) => {
                    tracing::info!("PTY EOF - process exited");
                    closed.store(true, Ordering::SeqCst);
                    break;
                }
                Ok(Err(e)) => {
                    if !closed.load(Ordering::SeqCst) {
                        tracing::error!(error = %e, "Error reading from PTY");
                    }
                    closed.store(true, Ordering::SeqCst);
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Read task panicked");
                    closed.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
        // Dropping chunk_tx here ends the output stream for the consumer.
    });
}

/// Detects the shell to use.
///
/// Returns the shell in this order of preference:
/// 1. The provided shell if Some
/// 2. The $SHELL environment variable
/// 3. /bin/sh as fallback
fn detect_shell(shell: Option<String>) -> String {
    if let Some(s) = shell {
        if !s.is_empty() {
            return s;
        }
    }

    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_detect_shell_with_provided() {
        let shell = detect_shell(Some("/bin/bash".to_string()));
        assert_eq!(shell, "/bin/bash");
    }

    #[test]
    fn test_detect_shell_empty_falls_back() {
        let shell = detect_shell(Some(String::new()));
        assert!(!shell.is_empty());
    }

    #[tokio::test]
    async fn test_spawn() {
        let result = PtyProcess::spawn(Some("/bin/sh".to_string()), 80, 24);
        assert!(result.is_ok(), "Failed to spawn: {:?}", result.err());

        let (process, _rx) = result.unwrap();
        assert!(!process.is_closed());
        assert!(process.pid().is_some());

        process.terminate().await;
        assert!(process.is_closed());
    }

    #[tokio::test]
    async fn test_spawn_rejects_zero_geometry() {
        let result = PtyProcess::spawn(Some("/bin/sh".to_string()), 0, 24);
        assert!(matches!(result, Err(SessionError::SpawnFailed(_))));

        let result = PtyProcess::spawn(Some("/bin/sh".to_string()), 80, 0);
        assert!(matches!(result, Err(SessionError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_spawn_rejects_missing_shell() {
        let result = PtyProcess::spawn(Some("/definitely/not/a/shell".to_string()), 80, 24);
        assert!(matches!(result, Err(SessionError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_write_and_read_output() {
        let (process, mut rx) = PtyProcess::spawn(Some("/bin/sh".to_string()), 80, 24).unwrap();

        process.write(b"echo pty_output_marker\n").await.unwrap();

        let mut found = false;
        for _ in 0..50 {
            match timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(data)) => {
                    if String::from_utf8_lossy(&data).contains("pty_output_marker") {
                        found = true;
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {}
            }
        }
        assert!(found, "Did not receive expected output");

        process.terminate().await;
    }

    #[tokio::test]
    async fn test_output_stream_ends_on_exit() {
        let (process, mut rx) = PtyProcess::spawn(Some("/bin/sh".to_string()), 80, 24).unwrap();

        process.write(b"exit 0\n").await.unwrap();

        // Drain until the channel closes; must not hang forever.
        let drained = timeout(Duration::from_secs(10), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "Chunk stream did not end after exit");

        process.terminate().await;
    }

    #[tokio::test]
    async fn test_write_after_terminate_is_silent() {
        let (process, _rx) = PtyProcess::spawn(Some("/bin/sh".to_string()), 80, 24).unwrap();

        process.terminate().await;

        // Write to a closed handle is dropped, not an error.
        let result = process.write(b"echo hello\n").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_resize() {
        let (process, _rx) = PtyProcess::spawn(Some("/bin/sh".to_string()), 80, 24).unwrap();

        let result = process.resize(120, 40).await;
        assert!(result.is_ok(), "Failed to resize: {:?}", result.err());

        // Resizing to the same geometry again is fine.
        let result = process.resize(120, 40).await;
        assert!(result.is_ok());

        process.terminate().await;
    }

    #[tokio::test]
    async fn test_resize_after_terminate_is_noop() {
        let (process, _rx) = PtyProcess::spawn(Some("/bin/sh".to_string()), 80, 24).unwrap();

        process.terminate().await;

        let result = process.resize(100, 50).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_terminate_twice() {
        let (process, _rx) = PtyProcess::spawn(Some("/bin/sh".to_string()), 80, 24).unwrap();

        process.terminate().await;
        process.terminate().await;
        assert!(process.is_closed());
    }

    #[tokio::test]
    async fn test_terminate_after_natural_exit() {
        let (process, mut rx) = PtyProcess::spawn(Some("/bin/sh".to_string()), 80, 24).unwrap();

        process.write(b"exit 0\n").await.unwrap();

        // Wait for the stream to end, then terminate must still be safe.
        let _ = timeout(Duration::from_secs(10), async {
            while rx.recv().await.is_some() {}
        })
        .await;

        process.terminate().await;
        assert!(process.is_closed());
    }
}
