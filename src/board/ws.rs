use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::api::{ApiError, SharedState};
use super::events::{BoardEvent, EventStream};
use super::permissions::Caller;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// `GET /ws/workspaces/{workspace_id}`: stream the workspace's board events
/// to one browser tab. Membership is checked before the upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    caller: Caller,
    Path(workspace_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.gateway.get_workspace(&caller, workspace_id).await?;
    let events = state
        .gateway
        .bus()
        .subscribe(workspace_id)
        .await
        .map_err(|e| ApiError(e.into()))?;
    debug!(workspace_id, user = %caller.user_id, "WebSocket subscriber attached");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, events, workspace_id)))
}

async fn handle_socket(socket: WebSocket, events: EventStream, workspace_id: i64) {
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, events).await;
    debug!(workspace_id, "WebSocket subscriber detached");
}

/// Serialize one event as a text frame payload.
fn encode(event: &BoardEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(event = event.name(), "Failed to serialize board event: {}", e);
            None
        }
    }
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards bus events, watches client frames, and pings every
/// [`PING_INTERVAL`]. If no Pong arrives within [`PONG_TIMEOUT`] the
/// connection is considered dead and the loop exits. Dropping `events`
/// unsubscribes from the workspace channel.
async fn run_socket_loop<S, R>(mut sender: S, mut receiver: R, mut events: EventStream)
where
    S: futures_util::Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            event = events.next() => {
                let Some(event) = event else { break };
                if let Some(json) = encode(&event)
                    && sender.send(Message::Text(json.into())).await.is_err()
                {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Clients only listen; Text, Binary and Ping are ignored.
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::events::{ItemEvent, Removal};
    use crate::board::models::IssueStatus;
    use futures::channel::mpsc;

    #[test]
    fn test_encode_uses_wire_names() {
        let event: BoardEvent = ItemEvent::<crate::board::models::Issue>::Deleted(Removal {
            id: 4,
            status: IssueStatus::Todo,
        })
        .into();
        let json: serde_json::Value = serde_json::from_str(&encode(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "issue-deleted");
        assert_eq!(json["data"]["id"], 4);
        assert_eq!(json["data"]["status"], "TODO");
    }

    #[tokio::test]
    async fn test_loop_forwards_events_and_stops_on_close() {
        let (out_tx, mut out_rx) = mpsc::unbounded::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded::<Result<Message, axum::Error>>();
        let event = BoardEvent::IssueDeleted(Removal {
            id: 1,
            status: IssueStatus::Done,
        });
        let events: EventStream =
            Box::pin(futures::stream::iter(vec![event]).chain(futures::stream::pending()));

        let handle = tokio::spawn(run_socket_loop(out_tx, in_rx, events));

        match out_rx.next().await {
            Some(Message::Text(text)) => assert!(text.as_str().contains("issue-deleted")),
            other => panic!("Expected text frame, got {:?}", other),
        }

        in_tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        handle.await.unwrap();
        assert!(matches!(out_rx.next().await, Some(Message::Close(None))));
    }
}
