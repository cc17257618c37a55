use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    error::ServiceError,
    state::SharedState,
};

/// Subscribe to the spectator stream of room `code`.
///
/// The subscription is taken before the handshake is built so no broadcast falls between the
/// two.
pub async fn subscribe_room(
    state: &SharedState,
    code: &str,
) -> Result<(broadcast::Receiver<ServerEvent>, ServerEvent), ServiceError> {
    let room = state
        .room(code)
        .ok_or_else(|| ServiceError::NotFound(format!("game `{code}` not found")))?;
    let receiver = room.spectators().subscribe();
    let summary = room.describe().await?;
    debug!(
        room = %code,
        spectators = room.spectators().subscriber_count(),
        "spectator subscribed"
    );

    let handshake = ServerEvent::json(
        Some("handshake".to_string()),
        &Handshake {
            game_code: summary.code,
            message: "spectator stream connected".into(),
            phase: summary.phase,
        },
    )
    .map_err(|err| ServiceError::InvalidState(format!("cannot encode handshake: {err}")))?;
    Ok((receiver, handshake))
}

/// Convert a broadcast receiver into an SSE response, forwarding events and
/// cleaning up once the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    handshake: ServerEvent,
    code: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if tx.send(Ok(to_event(handshake))).await.is_err() {
            return;
        }
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(room = %code, skipped, "spectator stream lagged");
                            continue;
                        }
                    }
                }
            }
        }
        info!(room = %code, "spectator SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::{AnswerOptionEntity, QuestionEntity, QuestionSetEntity},
            question_store::FileQuestionStore,
        },
        dto::game::{CreateGameRequest, GameSettingsInput},
        services::game_service,
        state::AppState,
        timer::TimerService,
    };

    #[tokio::test]
    async fn handshake_reports_the_room_phase() {
        let store = FileQuestionStore::from_sets([QuestionSetEntity {
            id: "set".into(),
            title: "Set".into(),
            questions: vec![QuestionEntity {
                id: "q1".into(),
                prompt: "?".into(),
                options: vec![AnswerOptionEntity {
                    text: "yes".into(),
                    correct: true,
                }],
                time_limit_secs: 10,
                points: 100,
                image_url: None,
                explanation: None,
            }],
        }]);
        let state = AppState::new(AppConfig::default(), TimerService::new(), Arc::new(store));
        let created = game_service::create_game(
            &state,
            CreateGameRequest {
                host_id: "host".into(),
                question_set_id: "set".into(),
                settings: GameSettingsInput::default(),
            },
            None,
        )
        .await
        .unwrap();

        let (_receiver, handshake) = subscribe_room(&state, &created.game_code).await.unwrap();
        assert_eq!(handshake.event.as_deref(), Some("handshake"));
        let data: serde_json::Value = serde_json::from_str(&handshake.data).unwrap();
        assert_eq!(data["gameCode"], created.game_code.as_str());
        assert_eq!(data["phase"], "waiting");

        assert!(matches!(
            subscribe_room(&state, "999999").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
