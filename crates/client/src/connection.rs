//! Connection state machine with bounded backoff.
//!
//! The connection owns the WebSocket link to the daemon and drives a
//! [`SessionProxy`] with the events it receives. A dropped link means full
//! session loss (sessions live exactly as long as their connection), so
//! the proxy is reset before every reconnect attempt. Retries follow an
//! explicit policy: the delay grows by a fixed step per consecutive
//! failure, capped at a maximum, and after the attempt budget is spent the
//! machine lands in the observable terminal [`ConnectionState::GaveUp`].

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use protocol::{ClientMessage, ServerEvent};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ClientError;
use crate::proxy::SessionProxy;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link and no attempt in progress.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Link established, events flowing.
    Connected,
    /// Waiting out the delay before the next attempt.
    Backoff,
    /// Attempt budget spent; terminal.
    GaveUp,
}

/// Reconnection policy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Added to the delay for each further consecutive failure.
    pub step: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            step: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_attempts: 10,
        }
    }
}

/// Tracks consecutive failures and produces the next retry delay.
#[derive(Debug)]
pub struct BackoffSchedule {
    policy: ReconnectPolicy,
    consecutive_failures: u32,
}

impl BackoffSchedule {
    /// Creates a fresh schedule for the given policy.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
        }
    }

    /// Resets the failure count after a successful connection.
    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Records a failure and returns the delay before the next attempt,
    /// or None once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.consecutive_failures += 1;
        if self.consecutive_failures > self.policy.max_attempts {
            return None;
        }
        let grown = self.policy.initial_delay + self.policy.step * (self.consecutive_failures - 1);
        Some(grown.min(self.policy.max_delay))
    }

    /// Returns the current consecutive failure count.
    pub fn failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Configuration for one daemon connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Base daemon URL, e.g. `ws://127.0.0.1:8080`.
    pub server_url: String,
    /// Access token, appended as a query parameter.
    pub token: String,
    /// Reconnection policy.
    pub policy: ReconnectPolicy,
}

/// Owns the link to the daemon and drives a session proxy with its
/// events.
pub struct Connection {
    config: ConnectionConfig,
    state_tx: watch::Sender<ConnectionState>,
}

impl Connection {
    /// Creates a connection in the Disconnected state.
    pub fn new(config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { config, state_tx }
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Returns a receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Builds and validates the `/ws` endpoint URL.
    fn endpoint_url(&self) -> Result<String, ClientError> {
        let base = self.config.server_url.trim_end_matches('/');
        let url = format!("{}/ws?token={}", base, self.config.token);
        Url::parse(&url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        Ok(url)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }
    }

    /// Runs the connection until the caller hangs up the outgoing channel
    /// or the retry budget is spent.
    ///
    /// Messages from `outgoing` are sent to the daemon; inbound events are
    /// applied to `proxy`, and any follow-up messages the proxy produces
    /// (queued initial commands) are sent immediately. Returns the
    /// terminal state: [`ConnectionState::Disconnected`] after a clean
    /// hang-up, [`ConnectionState::GaveUp`] otherwise.
    pub async fn run(
        &self,
        proxy: &mut SessionProxy,
        outgoing: &mut mpsc::Receiver<ClientMessage>,
    ) -> Result<ConnectionState, ClientError> {
        let url = self.endpoint_url()?;
        let mut schedule = BackoffSchedule::new(self.config.policy.clone());

        loop {
            self.set_state(ConnectionState::Connecting);

            match connect_async(url.as_str()).await {
                Ok((mut ws, _)) => {
                    info!(server = %self.config.server_url, "Connected to daemon");
                    self.set_state(ConnectionState::Connected);
                    schedule.on_success();

                    'connected: loop {
                        tokio::select! {
                            maybe_out = outgoing.recv() => {
                                let Some(message) = maybe_out else {
                                    // Caller hung up: clean shutdown.
                                    let _ = ws.close(None).await;
                                    proxy.connection_lost();
                                    self.set_state(ConnectionState::Disconnected);
                                    return Ok(ConnectionState::Disconnected);
                                };
                                let frame = match message.to_json() {
                                    Ok(frame) => frame,
                                    Err(e) => {
                                        warn!(error = %e, "Failed to encode message");
                                        continue;
                                    }
                                };
                                if let Err(e) = ws.send(Message::Text(frame)).await {
                                    warn!(error = %e, "Send failed");
                                    break 'connected;
                                }
                            }

                            maybe_msg = ws.next() => {
                                match maybe_msg {
                                    Some(Ok(Message::Text(text))) => {
                                        let event = match ServerEvent::from_json(&text) {
                                            Ok(event) => event,
                                            Err(e) => {
                                                warn!(error = %e, "Dropping malformed event frame");
                                                continue;
                                            }
                                        };
                                        for response in proxy.handle_event(&event) {
                                            let frame = match response.to_json() {
                                                Ok(frame) => frame,
                                                Err(e) => {
                                                    warn!(error = %e, "Failed to encode message");
                                                    continue;
                                                }
                                            };
                                            if let Err(e) = ws.send(Message::Text(frame)).await {
                                                warn!(error = %e, "Send failed");
                                                break 'connected;
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Ping(payload))) => {
                                        if ws.send(Message::Pong(payload)).await.is_err() {
                                            break 'connected;
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) | None => {
                                        info!("Daemon closed the connection");
                                        break 'connected;
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        warn!(error = %e, "Receive error");
                                        break 'connected;
                                    }
                                }
                            }
                        }
                    }

                    // Dropped link means full session loss.
                    proxy.connection_lost();
                }
                Err(e) => {
                    warn!(error = %e, "Connection attempt failed");
                }
            }

            match schedule.next_delay() {
                Some(delay) => {
                    self.set_state(ConnectionState::Backoff);
                    info!(
                        delay_ms = delay.as_millis() as u64,
                        attempt = schedule.failures(),
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        attempts = self.config.policy.max_attempts,
                        "Retry budget spent, giving up"
                    );
                    self.set_state(ConnectionState::GaveUp);
                    return Ok(ConnectionState::GaveUp);
                }
            }
        }
    }
}
