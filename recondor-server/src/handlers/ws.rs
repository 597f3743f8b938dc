//! WebSocket endpoint streaming ordered campaign events.
//!
//! Each connection owns one outbound channel and one forwarding task per
//! subscribed campaign. Resubscribing replaces the forwarding task; replayed
//! events go out before any live event from the same subscription, so the
//! sequence numbers a client observes never go backwards.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use recondor_model::{CampaignEvent, CampaignId, ClientMessage, ServerNotice};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::infra::AppState;

/// Outbound frames queued per connection before the socket applies
/// backpressure.
const OUTBOUND_BUFFER: usize = 256;

pub async fn ws_handler(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut forwards: HashMap<CampaignId, JoinHandle<()>> = HashMap::new();

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!("websocket receive error: {e}");
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of the
            // protocol.
            _ => continue,
        };

        let parsed: ClientMessage = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("ignoring malformed client frame: {e}");
                send_notice(
                    &outbound_tx,
                    &ServerNotice::Notification {
                        level: "warning".into(),
                        message: format!("malformed message: {e}"),
                    },
                )
                .await;
                continue;
            }
        };

        match parsed {
            ClientMessage::Subscribe { campaign_ids } => {
                for campaign_id in campaign_ids {
                    attach(&state, &mut forwards, &outbound_tx, campaign_id, None).await;
                }
            }
            ClientMessage::Resubscribe {
                campaign_id,
                last_sequence_number,
            } => {
                attach(
                    &state,
                    &mut forwards,
                    &outbound_tx,
                    campaign_id,
                    Some(last_sequence_number),
                )
                .await;
            }
            ClientMessage::Unsubscribe { campaign_ids } => {
                for campaign_id in campaign_ids {
                    if let Some(handle) = forwards.remove(&campaign_id) {
                        handle.abort();
                    }
                }
            }
        }
    }

    for handle in forwards.into_values() {
        handle.abort();
    }
    drop(outbound_tx);
    let _ = writer.await;
}

/// Start (or replace) the forwarding task for one campaign subscription.
async fn attach(
    state: &AppState,
    forwards: &mut HashMap<CampaignId, JoinHandle<()>>,
    outbound: &mpsc::Sender<String>,
    campaign_id: CampaignId,
    after_sequence: Option<u64>,
) {
    if let Some(previous) = forwards.remove(&campaign_id) {
        previous.abort();
    }

    let subscription = state.events().subscribe(campaign_id, after_sequence);
    if subscription.resync_required {
        let oldest = state
            .events()
            .oldest_buffered_sequence(campaign_id)
            .unwrap_or(0);
        send_notice(
            outbound,
            &ServerNotice::ResyncRequired {
                campaign_id,
                oldest_buffered_sequence: oldest,
            },
        )
        .await;
        return;
    }

    let outbound = outbound.clone();
    let replay = subscription.replay;
    let mut live = subscription.live;
    let handle = tokio::spawn(async move {
        for event in replay {
            if send_event(&outbound, &event).await.is_err() {
                return;
            }
        }
        loop {
            match live.recv().await {
                Ok(event) => {
                    if send_event(&outbound, &event).await.is_err() {
                        return;
                    }
                }
                // A lagged receiver has holes; the client must resubscribe
                // from its last confirmed sequence.
                Err(RecvError::Lagged(skipped)) => {
                    warn!(campaign = %campaign_id, skipped, "event receiver lagged");
                    send_notice(
                        &outbound,
                        &ServerNotice::ResyncRequired {
                            campaign_id,
                            oldest_buffered_sequence: 0,
                        },
                    )
                    .await;
                    return;
                }
                Err(RecvError::Closed) => return,
            }
        }
    });
    forwards.insert(campaign_id, handle);
}

async fn send_event(
    outbound: &mpsc::Sender<String>,
    event: &CampaignEvent,
) -> Result<(), mpsc::error::SendError<String>> {
    match serde_json::to_string(event) {
        Ok(frame) => outbound.send(frame).await,
        Err(e) => {
            warn!("failed to encode event: {e}");
            Ok(())
        }
    }
}

async fn send_notice(outbound: &mpsc::Sender<String>, notice: &ServerNotice) {
    if let Ok(frame) = serde_json::to_string(notice) {
        let _ = outbound.send(frame).await;
    }
}
