//! WebSocket stream of one run's progress events.
//!
//! `/api/v1/runs/{id}/stream` upgrades to a WebSocket and forwards every
//! progress event of that run as a JSON text frame (`{"type": ...}`). The
//! socket closes after the terminal `complete` or `error` event.
//!
//! Clients may send `{"type":"cancel"}` to cancel the run and
//! `{"type":"ping"}` to get `{"type":"pong"}`. Disconnecting does not
//! cancel the run.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use toolflow_core::service::RunState;
use toolflow_types::event::{ProgressEvent, RunEvent};

use crate::http::error::AppError;
use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    Cancel,
    Ping,
}

/// Upgrade to a WebSocket streaming the progress of run `id`.
pub async fn stream_run(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    // Subscribe before the state check so no event slips between the two.
    let events = state.run_service.subscribe();
    if state.run_service.state(&id).is_none() {
        return Err(AppError::NotFound(format!("Execution '{id}' not found")));
    }
    Ok(ws
        .on_upgrade(move |socket| handle_stream(socket, state, id, events))
        .into_response())
}

/// The frame to send for `event`, if it belongs to `execution_id`.
fn frame_for(event: &RunEvent, execution_id: &str) -> Option<String> {
    if event.execution_id != execution_id {
        return None;
    }
    match serde_json::to_string(&event.event) {
        Ok(json) => Some(json),
        Err(err) => {
            tracing::warn!("Failed to serialize progress event: {err}");
            None
        }
    }
}

async fn handle_stream(
    socket: WebSocket,
    state: AppState,
    execution_id: String,
    mut events: broadcast::Receiver<RunEvent>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // A run that already finished gets its result and nothing else.
    if let Some(RunState::Finished(result)) = state.run_service.state(&execution_id) {
        let event = RunEvent {
            execution_id: execution_id.clone(),
            event: ProgressEvent::Complete { result },
        };
        if let Some(json) = frame_for(&event, &execution_id) {
            let _ = ws_sender.send(Message::Text(json.into())).await;
        }
        let _ = ws_sender.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            received = events.recv() => {
                match received {
                    Ok(event) => {
                        let Some(json) = frame_for(&event, &execution_id) else {
                            continue;
                        };
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                        if event.event.is_terminal() {
                            let _ = ws_sender.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            execution_id = %execution_id,
                            skipped = n,
                            "WebSocket subscriber lagged, skipping {n} events"
                        );
                        // The terminal event may have been among the skipped ones.
                        if let Some(result) = state.run_service.result(&execution_id) {
                            let event = ProgressEvent::Complete { result: Box::new(result) };
                            if let Ok(json) = serde_json::to_string(&event) {
                                let _ = ws_sender.send(Message::Text(json.into())).await;
                            }
                            let _ = ws_sender.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WsCommand>(&text) {
                            Ok(WsCommand::Cancel) => {
                                if let Err(err) = state.run_service.cancel(&execution_id) {
                                    tracing::warn!(execution_id = %execution_id, error = %err, "cancel via WebSocket failed");
                                } else {
                                    tracing::info!(execution_id = %execution_id, "run cancellation requested via WebSocket");
                                }
                            }
                            Ok(WsCommand::Ping) => {
                                let pong = r#"{"type":"pong"}"#;
                                if ws_sender.send(Message::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(raw = %text.as_str(), error = %err, "Ignoring malformed WebSocket command");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!("WebSocket receive error: {err}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!(execution_id = %execution_id, "run stream closed");
}
