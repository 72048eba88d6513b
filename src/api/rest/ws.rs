use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Serialize;
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Booking snapshot push: the full list arrives immediately on connect and
/// again after every mutation, exactly as store subscribers see it.
pub async fn bookings_feed(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let snapshots = WatchStream::new(state.store.subscribe());
        stream_snapshots(socket, snapshots, "bookings")
    })
}

/// Live position stream for one worker; `null` until the first publish.
pub async fn worker_feed(
    ws: WebSocketUpgrade,
    Path(worker_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let snapshots = WatchStream::new(state.locations.subscribe(worker_id));
        stream_snapshots(socket, snapshots, "worker location")
    })
}

async fn stream_snapshots<S, T>(socket: WebSocket, mut snapshots: S, label: &'static str)
where
    S: futures::Stream<Item = T> + Unpin + Send + 'static,
    T: Serialize + Send + 'static,
{
    let (mut sender, mut receiver) = socket.split();

    info!(feed = label, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(snapshot) = snapshots.next().await {
            let json = match serde_json::to_string(&snapshot) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, feed = label, "failed to serialize snapshot for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(feed = label, "websocket client disconnected");
}
