//! Connection gateway.
//!
//! The gateway accepts TCP connections, authenticates the WebSocket
//! upgrade at `/ws`, and binds exactly one message router and session
//! registry to each connection for its lifetime. A connection that fails
//! authentication is rejected during the handshake and never reaches the
//! Active phase, so no session traffic is possible on it.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::auth::{extract_token, Authenticator};
use crate::router::MessageRouter;
use crate::session::{SessionDefaults, SessionRegistry};

/// Path the duplex channel is bound to.
pub const WS_PATH: &str = "/ws";

/// Lifecycle phase of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Socket open, not yet authenticated.
    Pending,
    /// Authenticated, router bound.
    Active,
    /// Terminal; all sessions released.
    Closed,
}

/// Accepts connections and runs one session-multiplexing channel per
/// authenticated client.
pub struct ConnectionGateway {
    listener: TcpListener,
    authenticator: Arc<dyn Authenticator>,
    defaults: SessionDefaults,
}

impl ConnectionGateway {
    /// Binds the gateway to the given address.
    pub async fn bind(
        addr: SocketAddr,
        authenticator: Arc<dyn Authenticator>,
        defaults: SessionDefaults,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, "Gateway listening");

        Ok(Self {
            listener,
            authenticator,
            defaults,
        })
    }

    /// Returns the bound local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until the task is cancelled.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, remote)) => {
                    let authenticator = Arc::clone(&self.authenticator);
                    let defaults = self.defaults.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, remote, authenticator, defaults).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    }
}

/// Drives one connection through Pending, Active, and Closed.
async fn handle_connection(
    stream: TcpStream,
    remote: SocketAddr,
    authenticator: Arc<dyn Authenticator>,
    defaults: SessionDefaults,
) {
    let mut phase = ConnectionPhase::Pending;
    debug!(remote = %remote, phase = ?phase, "Connection opened");

    let auth = Arc::clone(&authenticator);
    let callback = move |request: &Request, response: Response| {
        authenticate_upgrade(request, response, auth.as_ref())
    };

    let mut ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            phase = ConnectionPhase::Closed;
            warn!(remote = %remote, phase = ?phase, error = %e, "Handshake rejected");
            return;
        }
    };

    phase = ConnectionPhase::Active;
    info!(remote = %remote, phase = ?phase, "Connection authenticated");

    // One registry and one router per connection; the registry's sessions
    // live exactly as long as this connection does.
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let registry = Arc::new(SessionRegistry::new(events_tx.clone(), defaults));
    let router = MessageRouter::new(Arc::clone(&registry), events_tx);

    loop {
        tokio::select! {
            maybe_event = events_rx.recv() => {
                // The registry and router each hold a sender, so the
                // channel cannot close while this loop runs.
                let Some(event) = maybe_event else { break };
                let frame = match event.to_json() {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!(error = %e, "Failed to encode outbound event");
                        continue;
                    }
                };
                if let Err(e) = ws.send(Message::Text(frame)).await {
                    warn!(remote = %remote, error = %e, "Send failed, closing connection");
                    break;
                }
            }

            maybe_msg = ws.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        router.handle_frame(&text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(bytes = data.len(), "Ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if ws.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(reason))) => {
                        info!(remote = %remote, reason = ?reason, "Close frame received");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(remote = %remote, error = %e, "Receive error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    phase = ConnectionPhase::Closed;
    info!(remote = %remote, phase = ?phase, sessions = registry.count(), "Connection closed, releasing sessions");
    registry.close_all().await;
}

/// Handshake callback: enforces the `/ws` path and a valid access token
/// before the upgrade completes.
fn authenticate_upgrade(
    request: &Request,
    response: Response,
    authenticator: &dyn Authenticator,
) -> Result<Response, ErrorResponse> {
    if request.uri().path() != WS_PATH {
        debug!(path = %request.uri().path(), "Rejecting upgrade on unknown path");
        return Err(reject(StatusCode::NOT_FOUND, "not found"));
    }

    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match extract_token(request.uri().query(), auth_header) {
        Some(token) if authenticator.verify(&token) => Ok(response),
        Some(_) => {
            warn!("Rejecting connection: invalid token");
            Err(reject(StatusCode::UNAUTHORIZED, "invalid token"))
        }
        None => {
            warn!("Rejecting connection: no token supplied");
            Err(reject(StatusCode::UNAUTHORIZED, "authentication required"))
        }
    }
}

/// Builds a handshake rejection with the given status.
fn reject(status: StatusCode, body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenAuthenticator;

    fn upgrade_request(uri: &str) -> Request {
        Request::builder().uri(uri).body(()).unwrap()
    }

    #[test]
    fn test_upgrade_with_query_token() {
        let auth = StaticTokenAuthenticator::new("secret");
        let result = authenticate_upgrade(
            &upgrade_request("/ws?token=secret"),
            Response::new(()),
            &auth,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_upgrade_with_bearer_token() {
        let auth = StaticTokenAuthenticator::new("secret");
        let request = Request::builder()
            .uri("/ws")
            .header(AUTHORIZATION, "Bearer secret")
            .body(())
            .unwrap();
        let result = authenticate_upgrade(&request, Response::new(()), &auth);
        assert!(result.is_ok());
    }

    #[test]
    fn test_upgrade_rejects_invalid_token() {
        let auth = StaticTokenAuthenticator::new("secret");
        let result = authenticate_upgrade(
            &upgrade_request("/ws?token=wrong"),
            Response::new(()),
            &auth,
        );
        let response = result.unwrap_err();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_upgrade_rejects_missing_token() {
        let auth = StaticTokenAuthenticator::new("secret");
        let result = authenticate_upgrade(&upgrade_request("/ws"), Response::new(()), &auth);
        let response = result.unwrap_err();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_upgrade_rejects_unknown_path() {
        let auth = StaticTokenAuthenticator::new("secret");
        let result = authenticate_upgrade(
            &upgrade_request("/terminal?token=secret"),
            Response::new(()),
            &auth,
        );
        let response = result.unwrap_err();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
