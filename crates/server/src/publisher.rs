//! Event channel: fire-and-forget broadcast to subscribers.
//!
//! Every subscriber connection gets its own broadcast receiver, so slow
//! subscribers lag and skip rather than applying backpressure to the
//! worker loops. Dead connections are dropped on the first failed send.

use std::sync::Arc;

use futures::SinkExt;
use spriteforge_protocol::codec;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::state::ServerState;

/// Accept subscriber connections until shutdown.
pub async fn run_event_publisher(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "event subscriber connected");
                    let rx = state.bus.subscribe();
                    tokio::spawn(forward_updates(stream, rx, shutdown.clone()));
                }
                Err(err) => error!(error = %err, "event accept failed"),
            },
        }
    }
    info!("event publisher stopped");
}

async fn forward_updates(
    stream: TcpStream,
    mut rx: broadcast::Receiver<spriteforge_protocol::Update>,
    shutdown: CancellationToken,
) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = rx.recv() => received,
        };
        match received {
            Ok(update) => {
                let encoded = match codec::encode(&update) {
                    Ok(encoded) => encoded,
                    Err(err) => {
                        error!(error = %err, "failed to encode update");
                        continue;
                    }
                };
                if framed.send(encoded.into()).await.is_err() {
                    debug!("event subscriber disconnected");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Fire-and-forget delivery: the subscriber just misses
                // these events.
                warn!(skipped, "event subscriber lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
