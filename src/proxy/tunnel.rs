use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::bridge::{bridge, BridgeSummary};
use super::ws_stream::WsStream;
use crate::error::{ProxyError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Produces the handshake headers for one connection attempt.
///
/// Invoked fresh on every attempt, never cached, so rotated auth tokens take
/// effect without restarting the listener.
pub type HeaderProvider = Arc<dyn Fn() -> HashMap<String, String> + Send + Sync>;

/// Local address a tunnel listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    pub host: String,
    pub port: u16,
}

impl From<u16> for ListenAddr {
    fn from(port: u16) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port,
        }
    }
}

impl FromStr for ListenAddr {
    type Err = ProxyError;

    /// Accepts a bare port (`"8080"`) or `"host:port"`. If the host portion
    /// is made up entirely of digits it is discarded and the host defaults
    /// to `127.0.0.1`, so `"9:8081"` listens on `127.0.0.1:8081`. Kept for
    /// compatibility with existing deployments that rely on it.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || ProxyError::InvalidListenAddr(s.to_string());

        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            let port: u16 = s.parse().map_err(|_| invalid())?;
            return Ok(port.into());
        }

        let (host, port_str) = s.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port_str.parse().map_err(|_| invalid())?;

        if host.is_empty() || host.bytes().all(|b| b.is_ascii_digit()) {
            Ok(port.into())
        } else {
            Ok(Self {
                host: host.to_string(),
                port,
            })
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Outcome notifications for a running tunnel.
#[derive(Debug)]
pub enum TunnelEvent {
    /// A local connection was paired with an open WebSocket connection and
    /// the bridge is relaying.
    Established { peer: SocketAddr },
    /// The WebSocket connection could not be established at the transport
    /// level (DNS, TCP refused, TLS). Only this session failed; the
    /// listener stays up.
    ConnectFailed { peer: SocketAddr, error: ProxyError },
    /// The remote answered but refused the HTTP upgrade (auth rejected,
    /// wrong path). Distinguished from `ConnectFailed` so callers can pick
    /// a different retry policy.
    ConnectHttpFailed { peer: SocketAddr, error: ProxyError },
    /// Both legs of an established session were torn down.
    SessionClosed {
        peer: SocketAddr,
        summary: BridgeSummary,
    },
}

/// Bridges every connection accepted on a local TCP listener to a remote
/// WebSocket endpoint.
///
/// The client is a session factory: each accepted connection gets its own
/// WebSocket connection and bridge task, and sessions are independent of one
/// another. The remote URL is shared mutable state so subsequent attempts can
/// be redirected (endpoint rotation) without recreating the listener.
pub struct TunnelClient {
    remote_url: Arc<RwLock<String>>,
    dest_addr: String,
    header_provider: Option<HeaderProvider>,
}

impl TunnelClient {
    pub fn new(
        remote_url: impl Into<String>,
        dest_addr: impl Into<String>,
        header_provider: Option<HeaderProvider>,
    ) -> Self {
        Self {
            remote_url: Arc::new(RwLock::new(remote_url.into())),
            dest_addr: dest_addr.into(),
            header_provider,
        }
    }

    pub async fn remote_url(&self) -> String {
        self.remote_url.read().await.clone()
    }

    /// Redirects subsequent connection attempts to a different upstream.
    /// Sessions already bridged are unaffected.
    pub async fn set_remote_url(&self, url: impl Into<String>) {
        *self.remote_url.write().await = url.into();
    }

    /// Binds the local listener and starts accepting connections.
    ///
    /// A bind failure is fatal to the whole tunnel; every later failure is
    /// scoped to a single session and surfaced as a [`TunnelEvent`].
    pub async fn start(&self, listen: ListenAddr) -> Result<TunnelHandle> {
        let listener = TcpListener::bind((listen.host.as_str(), listen.port))
            .await
            .map_err(|source| ProxyError::Bind {
                addr: listen.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("tunnel listening on {}", local_addr);

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let remote_url = self.remote_url.clone();
        let dest_addr = self.dest_addr.clone();
        let header_provider = self.header_provider.clone();
        let accept_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    res = listener.accept() => match res {
                        Ok((stream, peer)) => {
                            debug!("accepted local connection from {}", peer);
                            let remote_url = remote_url.clone();
                            let dest_addr = dest_addr.clone();
                            let header_provider = header_provider.clone();
                            let event_tx = event_tx.clone();
                            tokio::spawn(run_session(
                                stream,
                                peer,
                                remote_url,
                                dest_addr,
                                header_provider,
                                event_tx,
                            ));
                        }
                        Err(e) => {
                            warn!("accept error on {}: {}", local_addr, e);
                        }
                    },
                }
            }
            // Dropping the listener frees the port; sessions already
            // bridged keep their own sockets and continue.
            info!("tunnel listener on {} closed", local_addr);
        });

        Ok(TunnelHandle {
            local_addr,
            events: event_rx,
            cancel,
        })
    }
}

/// Handle to a started tunnel: its bound address, the event stream, and the
/// stop switch. The remote URL stays mutable on the [`TunnelClient`].
pub struct TunnelHandle {
    local_addr: SocketAddr,
    events: mpsc::Receiver<TunnelEvent>,
    cancel: CancellationToken,
}

impl TunnelHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn next_event(&mut self) -> Option<TunnelEvent> {
        self.events.recv().await
    }

    /// Closes the acceptor: no further connections are admitted, but
    /// sessions already bridged are not force-closed.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_session(
    tcp: TcpStream,
    peer: SocketAddr,
    remote_url: Arc<RwLock<String>>,
    dest_addr: String,
    header_provider: Option<HeaderProvider>,
    events: mpsc::Sender<TunnelEvent>,
) {
    let url = remote_url.read().await.clone();
    let request = match build_connect_request(&url, &dest_addr, header_provider.as_ref()) {
        Ok(request) => request,
        Err(error) => {
            warn!("rejecting {}: {}", peer, error);
            let _ = events.send(TunnelEvent::ConnectFailed { peer, error }).await;
            return;
        }
    };

    match connect_async(request).await {
        Ok((ws, response)) => {
            debug!(
                "WebSocket connected for {}: HTTP {}",
                peer,
                response.status().as_u16()
            );
            let _ = events.send(TunnelEvent::Established { peer }).await;

            let summary = bridge(tcp, WsStream::new(ws)).await;
            info!(
                "session for {} closed: {} bytes out, {} bytes in",
                peer, summary.a_to_b, summary.b_to_a
            );
            let _ = events
                .send(TunnelEvent::SessionClosed { peer, summary })
                .await;
        }
        Err(e) => {
            let error = ProxyError::from_handshake(e);
            warn!("WebSocket connect for {} failed: {}", peer, error);
            let event = if error.is_http_rejection() {
                TunnelEvent::ConnectHttpFailed { peer, error }
            } else {
                TunnelEvent::ConnectFailed { peer, error }
            };
            let _ = events.send(event).await;
            // Dropping `tcp` here closes the local side of the failed
            // session.
        }
    }
}

/// Builds the upgrade request for one attempt: the current remote URL with
/// the opaque destination address appended as the `dest` query parameter,
/// plus headers computed fresh from the provider.
fn build_connect_request(
    url_str: &str,
    dest_addr: &str,
    header_provider: Option<&HeaderProvider>,
) -> Result<Request> {
    let mut url = Url::parse(url_str).map_err(|e| ProxyError::InvalidRemoteUrl {
        url: url_str.to_string(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut().append_pair("dest", dest_addr);

    let mut request =
        url.as_str()
            .into_client_request()
            .map_err(|e| ProxyError::InvalidRemoteUrl {
                url: url_str.to_string(),
                reason: e.to_string(),
            })?;

    if let Some(provider) = header_provider {
        for (name, value) in provider() {
            if let (Ok(name), Ok(value)) = (
                name.parse::<http::header::HeaderName>(),
                value.parse::<http::header::HeaderValue>(),
            ) {
                request.headers_mut().insert(name, value);
            } else {
                warn!("skipping malformed header {:?}", name);
            }
        }
    }

    Ok(request)
}
