//! WebSocket session: one connected client from upgrade through disconnect.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use super::connection::{Connection, Outbound};
use super::lifecycle::Lifecycle;
use super::router::InboundFrame;

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection and queues the welcome frame
/// 2. Spawns the writer that drains the outbound queue into the socket
/// 3. Forwards inbound text to the dispatcher and records pongs
/// 4. Stops on close, error, stream end or forced termination
/// 5. Releases the connection
#[instrument(skip_all, fields(peer = %peer, conn_id = tracing::field::Empty))]
pub async fn run_connection(
    socket: WebSocket,
    peer: String,
    lifecycle: Arc<Lifecycle>,
    inbound: mpsc::Sender<InboundFrame>,
    outbound_capacity: usize,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel(outbound_capacity.max(1));
    let conn = lifecycle.accept(tx, peer);
    let _ = tracing::Span::current().record("conn_id", conn.id().get());

    let writer = tokio::spawn(write_outbound(ws_tx, rx, Arc::clone(&conn)));

    loop {
        let next = tokio::select! {
            biased;
            () = conn.terminated() => {
                debug!("connection terminated, stopping reader");
                break;
            }
            next = ws_rx.next() => next,
        };

        let text = match next {
            None => {
                debug!("stream ended");
                break;
            }
            Some(Err(e)) => {
                let _ = lifecycle.on_error(&conn, &e);
                break;
            }
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(s) => Utf8Bytes::from(s),
                Err(_) => {
                    info!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Pong(_) | Message::Ping(_))) => {
                conn.mark_alive();
                continue;
            }
            // The next read flushes the close reply and ends the stream.
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "client sent close frame");
                continue;
            }
        };

        let frame = InboundFrame {
            connection: Arc::clone(&conn),
            text,
        };
        if inbound.send(frame).await.is_err() {
            debug!("dispatcher gone, closing session");
            break;
        }
    }

    let _ = lifecycle.on_close(&conn);
    writer.abort();
}

/// Drain the outbound queue into the socket until close, termination or write failure.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    conn: Arc<Connection>,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = conn.terminated() => break,
            next = rx.recv() => next,
        };
        let Some(frame) = next else { break };

        let (message, last) = match frame {
            Outbound::Text(text) => (Message::Text(text), false),
            Outbound::Ping => (Message::Ping(Bytes::new()), false),
            Outbound::Close(close) => (Message::Close(Some(close)), true),
        };
        if let Err(e) = sink.send(message).await {
            debug!(conn_id = %conn.id(), error = %e, "websocket write failed");
            break;
        }
        if last {
            break;
        }
    }
}
