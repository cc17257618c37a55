use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientMessage, ServerMessage},
    error::RoomRejection,
    services::game_service,
    state::{
        SharedState,
        game::ConnectionId,
        room::{ClientSender, HostCommand, RestoreKind, RoomCommand},
    },
};

/// Handle the full lifecycle of one host, player or reconnecting client socket.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let connection: ConnectionId = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    // Rooms keep clones of the outbound sender, so the writer stops on an explicit signal rather
    // than waiting for every sender to drop.
    let writer_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = &mut shutdown_rx => break,
                message = outbound_rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            let payload = match serde_json::to_string(&message) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(event = message.event_name(), error = %err, "failed to serialize outbound event");
                    continue;
                }
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    info!(%connection, "client connected");
    let mut rooms: HashSet<String> = HashSet::new();

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(%connection, payload = %text, "received client message");
                match ClientMessage::from_json_str(&text) {
                    Ok(message) => {
                        dispatch(&state, connection, &outbound_tx, &mut rooms, message).await
                    }
                    Err(err) => {
                        warn!(%connection, error = %err, "failed to parse or validate client message");
                        let _ = outbound_tx
                            .send(ServerMessage::rejection(&RoomRejection::from(err)));
                    }
                }
            }
            Ok(Message::Close(_)) => {
                info!(%connection, "client closed");
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%connection, error = %err, "websocket error");
                break;
            }
        }
    }

    for code in &rooms {
        if let Some(room) = state.room(code) {
            let _ = room.send(RoomCommand::Disconnected { connection });
        }
    }
    info!(%connection, rooms = rooms.len(), "client disconnected");

    finalize(writer_task, shutdown_tx).await;
}

/// Route a validated client event to the game service or to the addressed room.
async fn dispatch(
    state: &SharedState,
    connection: ConnectionId,
    outbound_tx: &ClientSender,
    rooms: &mut HashSet<String>,
    message: ClientMessage,
) {
    if let ClientMessage::CreateGame(request) = message {
        match game_service::create_game(state, request, Some((connection, outbound_tx.clone())))
            .await
        {
            Ok(created) => {
                rooms.insert(created.game_code.clone());
                let _ = outbound_tx.send(ServerMessage::GameCreated(created));
            }
            Err(err) => {
                warn!(%connection, error = %err, "failed to create game");
                let _ = outbound_tx.send(ServerMessage::rejection(&RoomRejection::from(err)));
            }
        }
        return;
    }

    let Some(code) = message.game_code().map(str::to_owned) else {
        return;
    };
    let restoration = is_restoration(&message);
    let Some(command) = room_command(message, connection, outbound_tx) else {
        return;
    };

    let delivered = match state.room(&code) {
        Some(room) => {
            let leaving = matches!(command, RoomCommand::Leave { .. });
            let attaches = matches!(
                command,
                RoomCommand::Join { .. } | RoomCommand::Restore { .. }
            );
            let sent = room.send(command).is_ok();
            if sent && attaches {
                rooms.insert(code.clone());
            } else if leaving {
                rooms.remove(&code);
            }
            sent
        }
        None => false,
    };

    if !delivered {
        debug!(%connection, room = %code, "event for unknown room");
        let reply = if restoration {
            ServerMessage::expired("game not found")
        } else {
            ServerMessage::rejection(&RoomRejection::RoomNotFound)
        };
        let _ = outbound_tx.send(reply);
    }
}

fn is_restoration(message: &ClientMessage) -> bool {
    matches!(
        message,
        ClientMessage::RequestSessionRestoration(_)
            | ClientMessage::RequestPlayerRestoration(_)
            | ClientMessage::RequestHostRestoration(_)
    )
}

/// Translate a room-addressed client event into the worker command. `None` for `createGame`.
fn room_command(
    message: ClientMessage,
    connection: ConnectionId,
    sender: &ClientSender,
) -> Option<RoomCommand> {
    let host = |command| RoomCommand::Host {
        connection,
        command,
    };
    let restore = |kind, identity| RoomCommand::Restore {
        connection,
        sender: sender.clone(),
        kind,
        identity,
    };

    Some(match message {
        ClientMessage::CreateGame(_) => return None,
        ClientMessage::JoinGame(request) => RoomCommand::Join {
            connection,
            sender: sender.clone(),
            request,
        },
        ClientMessage::Answer(request) => RoomCommand::Answer {
            connection,
            request,
        },
        ClientMessage::StartGame(_) => host(HostCommand::Start),
        ClientMessage::NextQuestion(_) => host(HostCommand::Next),
        ClientMessage::Skip(_) => host(HostCommand::Skip),
        ClientMessage::Pause(_) => host(HostCommand::Pause),
        ClientMessage::Resume(_) => host(HostCommand::Resume),
        ClientMessage::JumpToQuestion(request) => host(HostCommand::JumpTo(request.question_index)),
        ClientMessage::EmergencyStop(_) => host(HostCommand::EmergencyStop),
        ClientMessage::EndGame(_) => host(HostCommand::End),
        ClientMessage::KickPlayer(request) => host(HostCommand::Kick(request.player_id)),
        ClientMessage::LeaveGame(_) => RoomCommand::Leave { connection },
        ClientMessage::RequestSessionRestoration(request) => {
            restore(RestoreKind::Session, request.identity)
        }
        ClientMessage::RequestPlayerRestoration(request) => {
            restore(RestoreKind::Player, request.identity)
        }
        ClientMessage::RequestHostRestoration(request) => {
            restore(RestoreKind::Host, request.identity)
        }
    })
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, shutdown_tx: oneshot::Sender<()>) {
    let _ = shutdown_tx.send(());
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::question_store::FileQuestionStore, state::AppState,
        timer::TimerService,
    };

    fn parse(raw: &str) -> ClientMessage {
        ClientMessage::from_json_str(raw).unwrap()
    }

    #[test]
    fn host_events_map_to_host_commands() {
        let (sender, _inbox) = mpsc::unbounded_channel();
        let connection = Uuid::new_v4();

        let command = room_command(
            parse(r#"{"event":"jumpToQuestion","data":{"gameCode":"123456","questionIndex":3}}"#),
            connection,
            &sender,
        );
        assert!(matches!(
            command,
            Some(RoomCommand::Host { command: HostCommand::JumpTo(3), connection: c }) if c == connection
        ));

        let command = room_command(
            parse(r#"{"event":"skip","data":{"gameCode":"123456"}}"#),
            connection,
            &sender,
        );
        assert!(matches!(
            command,
            Some(RoomCommand::Host {
                command: HostCommand::Skip,
                ..
            })
        ));
    }

    #[test]
    fn restoration_variants_keep_their_kind() {
        let (sender, _inbox) = mpsc::unbounded_channel();
        let message = parse(
            r#"{"event":"requestHostRestoration","data":{"gameCode":"123456","identity":{"hostId":"h"}}}"#,
        );
        assert!(is_restoration(&message));
        match room_command(message, Uuid::new_v4(), &sender) {
            Some(RoomCommand::Restore { kind, identity, .. }) => {
                assert_eq!(kind, RestoreKind::Host);
                assert_eq!(identity.host_id.as_deref(), Some("h"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn events_for_unknown_rooms_are_answered_locally() {
        let state = AppState::new(
            AppConfig::default(),
            TimerService::new(),
            Arc::new(FileQuestionStore::default()),
        );
        let (sender, mut inbox) = mpsc::unbounded_channel();
        let mut rooms = HashSet::new();

        dispatch(
            &state,
            Uuid::new_v4(),
            &sender,
            &mut rooms,
            parse(r#"{"event":"startGame","data":{"gameCode":"123456"}}"#),
        )
        .await;
        match inbox.try_recv() {
            Ok(ServerMessage::Error(err)) => assert_eq!(err.code, "roomNotFound"),
            other => panic!("unexpected reply: {other:?}"),
        }

        dispatch(
            &state,
            Uuid::new_v4(),
            &sender,
            &mut rooms,
            parse(
                r#"{"event":"requestPlayerRestoration","data":{"gameCode":"123456","identity":{"playerName":"Ada"}}}"#,
            ),
        )
        .await;
        assert!(matches!(
            inbox.try_recv(),
            Ok(ServerMessage::SessionExpired(_))
        ));
        assert!(rooms.is_empty());
    }
}
