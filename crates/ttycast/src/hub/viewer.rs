//! Per-viewer delivery task.
//!
//! Sends the catch-up batch, then forwards the viewer's queue until the
//! session ends, the peer goes away, or a write exceeds the timeout. Failures
//! here only ever end this one viewer.

use super::BroadcastHub;
use crate::transport::websocket::WebSocketConnection;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};
use ttycast_core::{CastError, CastResult, ClientMessage, ServerMessage};

/// Largest viewer frame accepted. Viewers only send small control messages.
const MAX_CLIENT_FRAME: usize = 64 * 1024;

/// Serve one connected viewer until either side is done.
pub async fn serve_viewer(
    hub: Arc<BroadcastHub>,
    conn: WebSocketConnection,
    write_timeout: Duration,
) {
    let WebSocketConnection {
        mut ws_stream,
        remote_addr,
    } = conn;
    let mut handle = hub.join();
    let id = handle.id;

    match run(&mut ws_stream, &mut handle, write_timeout).await {
        Ok(()) => debug!(viewer = id, remote = %remote_addr, state = ?handle.state(), "viewer finished"),
        Err(e) => warn!(viewer = id, remote = %remote_addr, error = %e, "viewer dropped"),
    }

    hub.leave(id);
    let _ = tokio::time::timeout(write_timeout, ws_stream.close(None)).await;
    info!(viewer = id, remote = %remote_addr, "viewer disconnected");
}

async fn run(
    ws: &mut WebSocketStream<TcpStream>,
    handle: &mut super::ViewerHandle,
    write_timeout: Duration,
) -> CastResult<()> {
    send(ws, &handle.sync, write_timeout).await?;
    handle.mark_live();

    loop {
        tokio::select! {
            queued = handle.rx.recv() => match queued {
                Some(message) => send(ws, &message, write_timeout).await?,
                // Dropped by the hub or session over.
                None => return Ok(()),
            },
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle_client_message(handle.id, &text),
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(CastError::ViewerConnection(format!("recv failed: {e}")));
                }
            },
        }
    }
}

async fn send(
    ws: &mut WebSocketStream<TcpStream>,
    message: &ServerMessage,
    write_timeout: Duration,
) -> CastResult<()> {
    let json = serde_json::to_string(message)?;
    match tokio::time::timeout(write_timeout, ws.send(Message::Text(json.into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CastError::ViewerConnection(format!("send failed: {e}"))),
        Err(_) => Err(CastError::Timeout),
    }
}

fn handle_client_message(viewer: u64, text: &str) {
    if text.len() > MAX_CLIENT_FRAME {
        warn!(viewer, len = text.len(), "oversized viewer message ignored");
        return;
    }
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::ClientHello) => debug!(viewer, "client hello"),
        // Display-only hint; the recorded terminal is never resized by a viewer.
        Ok(ClientMessage::Resize { width, height }) => {
            debug!(viewer, width, height, "viewer resize hint")
        }
        Err(e) => debug!(viewer, error = %e, "unrecognised viewer message"),
    }
}
