//! WebSocket listener for live viewers, using tokio-tungstenite.
//!
//! Accepting runs on its own task, independent of the capture path. Each TCP
//! connection gets a bounded handshake window so a stalled peer cannot hold a
//! slot open.

use crate::hub::{serve_viewer, BroadcastHub};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use ttycast_core::{CastError, CastResult};

/// Pause after a failed `accept` (e.g. out of descriptors) before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

/// Bind `host:port` and start accepting viewers.
///
/// Returns the bound address (useful with port 0) and a receiver that yields
/// connections whose WebSocket handshake completed in time.
pub async fn start_listener(
    host: &str,
    port: u16,
    handshake_timeout: Duration,
) -> CastResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind((host, port))
        .await
        .map_err(|e| CastError::Transport(format!("WS bind {host}:{port} failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, "viewer listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let handshake = tokio_tungstenite::accept_async(stream);
                        match tokio::time::timeout(handshake_timeout, handshake).await {
                            Ok(Ok(ws_stream)) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    debug!("viewer connection channel closed");
                                }
                            }
                            Ok(Err(e)) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                            Err(_) => {
                                warn!(remote = %addr, "WebSocket handshake timed out");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
            if tx.is_closed() {
                break;
            }
        }
    });

    Ok((local_addr, rx))
}

/// Hand every accepted connection to a viewer task until `shutdown` flips.
///
/// On shutdown, waits up to `drain` for viewers to flush their final messages.
pub async fn serve(
    hub: Arc<BroadcastHub>,
    mut connections: mpsc::Receiver<WebSocketConnection>,
    write_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
    drain: Duration,
) {
    let mut viewers = JoinSet::new();
    loop {
        tokio::select! {
            conn = connections.recv() => match conn {
                Some(conn) => {
                    debug!(remote = %conn.remote_addr, viewers = hub.viewer_count(), "viewer connecting");
                    viewers.spawn(serve_viewer(Arc::clone(&hub), conn, write_timeout));
                }
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            },
            Some(_) = viewers.join_next(), if !viewers.is_empty() => {}
        }
    }

    // Stop accepting; the listener task exits on its next accept.
    drop(connections);
    let remaining = viewers.len();
    if remaining > 0 {
        debug!(viewers = remaining, "waiting for viewers to drain");
        if tokio::time::timeout(drain, async { while viewers.join_next().await.is_some() {} })
            .await
            .is_err()
        {
            viewers.abort_all();
        }
    }
}
