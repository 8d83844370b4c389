//! WebSocket listener for local UI clients

use std::net::SocketAddr;

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::controller::Bridge;
use crate::error::Result;

pub async fn bind(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind {host}:{port}"))?;
    tracing::info!(address = %listener.local_addr()?, "Listening for clients");
    Ok(listener)
}

/// Accept clients until `shutdown` fires.
pub async fn serve(listener: TcpListener, bridge: Bridge, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let bridge = bridge.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(bridge, stream, peer).await {
                            tracing::warn!(peer = %peer, error = %e, "Client connection failed");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "Accept failed"),
            },
        }
    }
    tracing::info!("Server stopped");
}

async fn handle_connection(bridge: Bridge, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    tracing::info!(peer = %peer, "Client connected");

    let (mut sink, mut source) = ws.split();
    let (id, mut outbound) = bridge.relay.register().await;
    let clients = bridge.relay.client_count().await;
    tracing::debug!(client = id, clients, "Client registered");

    // fires when the writer stops, so the reader stops too
    let writer_done = CancellationToken::new();
    let done = writer_done.clone();

    let writer = tokio::spawn(async move {
        let _done = done.drop_guard();
        while let Some(message) = outbound.recv().await {
            let closing = message.is_close();
            if let Err(e) = sink.send(message).await {
                tracing::debug!(client = id, error = %e, "Write failed");
                return;
            }
            if closing {
                return;
            }
        }

        // the relay dropped this client without a Close of its own
        tracing::debug!(client = id, "Evicted by relay, closing socket");
        if let Err(e) = sink.close().await {
            tracing::debug!(client = id, error = %e, "Close failed");
        }
    });

    bridge.on_client_connected(id).await;

    loop {
        let frame = tokio::select! {
            _ = writer_done.cancelled() => break,
            frame = source.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                if bridge.handle_message(text.as_str()).await.is_break() {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(client = id, error = %e, "Read failed");
                break;
            }
        }
    }

    bridge.relay.unregister(id).await;
    let _ = writer.await;
    tracing::info!(peer = %peer, "Client disconnected");
    Ok(())
}
