use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use crate::coordinator::Coordinator;
use crate::quiz::AdvanceOutcome;

use super::protocol::{ClientMessage, ServerEvent};

/// What this connection has authenticated as so far. A participant identity
/// arrives via `join-room`, a host identity via `open-room`; control
/// messages are refused until the matching identity is bound.
#[derive(Default)]
struct ConnectionState {
    display_name: Option<String>,
    room_code: Option<String>,
    host_id: Option<String>,
}

pub async fn handle_connection(websocket: WebSocket, coordinator: Arc<Coordinator>) {
    let connection_id = Uuid::new_v4().to_string();
    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Writer task: everything addressed to this connection funnels through
    // one channel, whether it is an ack or a room broadcast.
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::debug!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    let mut state = ConnectionState::default();

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                let text = match message.to_str() {
                    Ok(text) => text,
                    // Ignore pings and binary frames
                    Err(_) => continue,
                };
                match serde_json::from_str::<ClientMessage>(text) {
                    Ok(client_message) => {
                        dispatch(&coordinator, &connection_id, &tx, &mut state, client_message)
                            .await;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, raw_message = %text, "Unparseable client message");
                        send(&tx, &ServerEvent::Error {
                            reason: "malformed-message".to_string(),
                        });
                    }
                }
            }
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    coordinator.handle_disconnect(&connection_id).await;
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, "WebSocket connection closed");
}

async fn dispatch(
    coordinator: &Arc<Coordinator>,
    connection_id: &str,
    tx: &mpsc::UnboundedSender<Message>,
    state: &mut ConnectionState,
    message: ClientMessage,
) {
    match message {
        ClientMessage::JoinRoom { token } => {
            match coordinator
                .join_room(connection_id, &token, tx.clone())
                .await
            {
                Ok(outcome) => {
                    state.display_name = Some(outcome.entry.display_name.clone());
                    state.room_code = Some(outcome.entry.room_code.clone());
                    send(tx, &ServerEvent::JoinAck {
                        success: true,
                        reason: None,
                        members: Some(outcome.members),
                    });
                    // Catch the late joiner up on progression state it missed
                    if let Some(opened) = outcome.current_question {
                        send(tx, &ServerEvent::QuestionOpened {
                            index: opened.index,
                            question: opened.question,
                            deadline_ms: opened.deadline_ms,
                        });
                    }
                    if let Some(leaderboard) = outcome.finished_leaderboard {
                        send(tx, &ServerEvent::QuizFinished { leaderboard });
                    }
                }
                Err(err) => {
                    send(tx, &ServerEvent::JoinAck {
                        success: false,
                        reason: Some(err.reason().to_string()),
                        members: None,
                    });
                }
            }
        }

        ClientMessage::LeaveRoom { room_code } => {
            if let Err(e) = coordinator.leave_room(&room_code, connection_id).await {
                tracing::debug!(room_code = %room_code, error = %e, "Leave failed");
            }
            state.display_name = None;
            state.room_code = None;
        }

        ClientMessage::OpenRoom { room_code, token } => {
            match coordinator.authorize_host(&room_code, &token).await {
                Ok((host, room)) => {
                    // The host connection receives room broadcasts too
                    coordinator
                        .channels
                        .subscribe(&room.code, connection_id, tx.clone())
                        .await;
                    state.host_id = Some(host.id);
                    state.room_code = Some(room.code);
                    send(tx, &ServerEvent::OpenAck {
                        success: true,
                        reason: None,
                    });
                }
                Err(err) => {
                    send(tx, &ServerEvent::OpenAck {
                        success: false,
                        reason: Some(err.reason().to_string()),
                    });
                }
            }
        }

        ClientMessage::CloseRoom { room_code } => {
            let Some(host_id) = state.host_id.clone() else {
                send_forbidden(tx);
                return;
            };
            if let Err(err) = coordinator.close_room(&room_code, &host_id).await {
                send_error(tx, &err);
            }
        }

        ClientMessage::StartQuiz {
            room_code,
            questions,
        } => {
            let Some(host_id) = state.host_id.clone() else {
                send_forbidden(tx);
                return;
            };
            if let Err(err) = coordinator.start_quiz(&room_code, &host_id, questions).await {
                send_error(tx, &err);
            }
        }

        ClientMessage::Advance {
            room_code,
            from_index,
        } => {
            let Some(host_id) = state.host_id.clone() else {
                send_forbidden(tx);
                return;
            };
            match coordinator.advance(&room_code, &host_id, from_index).await {
                // Broadcast already carried the transition to everyone,
                // including this connection
                Ok(AdvanceOutcome::Opened(_)) | Ok(AdvanceOutcome::Finished(_)) => {}
                Err(err) => send_error(tx, &err),
            }
        }

        ClientMessage::SubmitAnswer {
            room_code,
            question_id,
            selected_option_index,
        } => {
            let Some(participant) = state.display_name.clone() else {
                send(tx, &ServerEvent::SubmitAck {
                    accepted: false,
                    reason: Some("not-joined".to_string()),
                });
                return;
            };
            // Answers only count in the room this connection joined
            if state.room_code.as_deref() != Some(room_code.as_str()) {
                send(tx, &ServerEvent::SubmitAck {
                    accepted: false,
                    reason: Some("not-joined".to_string()),
                });
                return;
            }
            match coordinator
                .submit_answer(&room_code, &participant, &question_id, selected_option_index)
                .await
            {
                Ok(_) => send(tx, &ServerEvent::SubmitAck {
                    accepted: true,
                    reason: None,
                }),
                Err(err) => send(tx, &ServerEvent::SubmitAck {
                    accepted: false,
                    reason: Some(err.reason().to_string()),
                }),
            }
        }
    }
}

fn send(tx: &mpsc::UnboundedSender<Message>, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(text) => {
            // A send failure just means the connection is going away
            let _ = tx.send(Message::text(text));
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize server event"),
    }
}

fn send_error(tx: &mpsc::UnboundedSender<Message>, err: &crate::error::CoordinatorError) {
    send(tx, &ServerEvent::Error {
        reason: err.reason().to_string(),
    });
}

fn send_forbidden(tx: &mpsc::UnboundedSender<Message>) {
    send(tx, &ServerEvent::Error {
        reason: "forbidden".to_string(),
    });
}
