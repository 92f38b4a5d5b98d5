use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ProxyError, Result};

/// Server-side counterpart of the tunnel client: binds a TCP port for a
/// session identifier and accepts raw connections on the destination side.
///
/// Connections are accepted and ended; routing them into a bridge is the
/// embedding gateway's job.
pub struct Gateway {
    session_id: String,
    app_name: String,
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl Gateway {
    pub async fn start(
        session_id: impl Into<String>,
        app_name: impl Into<String>,
        bind_ip: &str,
        port: u16,
    ) -> Result<Self> {
        let session_id = session_id.into();
        let app_name = app_name.into();

        let listener = TcpListener::bind((bind_ip, port))
            .await
            .map_err(|source| ProxyError::Bind {
                addr: format!("{}:{}", bind_ip, port),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(
            "gateway for session {} ({}) listening on {}",
            session_id, app_name, local_addr
        );

        let cancel = CancellationToken::new();
        let accept_cancel = cancel.clone();
        let accept_session = session_id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    res = listener.accept() => match res {
                        Ok((stream, peer)) => {
                            debug!(
                                "gateway session {} accepted connection from {}",
                                accept_session, peer
                            );
                            drop(stream);
                        }
                        Err(e) => {
                            warn!("gateway accept error on {}: {}", local_addr, e);
                        }
                    },
                }
            }
            info!("gateway listener on {} closed", local_addr);
        });

        Ok(Self {
            session_id,
            app_name,
            local_addr,
            cancel,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
