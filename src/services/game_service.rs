use dashmap::mapref::entry::Entry;
use rand::Rng;
use tracing::{info, warn};
use validator::Validate;

use crate::{
    dto::game::{CreateGameRequest, GameCreatedPayload, GameSummary, QuestionSetSummary},
    error::ServiceError,
    state::{
        SharedState,
        game::{ConnectionId, GameSession},
        room::{ClientSender, spawn_room},
    },
};

/// Random draws allowed before giving up on finding a free room code.
const MAX_CODE_ATTEMPTS: usize = 32;
const ROOM_CODE_SPACE: u32 = 1_000_000;

/// Open a new room from a stored question set.
///
/// When `host` carries a socket it is attached as host right away; REST-created rooms wait for
/// the host to claim them through host restoration.
pub async fn create_game(
    state: &SharedState,
    request: CreateGameRequest,
    host: Option<(ConnectionId, ClientSender)>,
) -> Result<GameCreatedPayload, ServiceError> {
    let CreateGameRequest {
        host_id,
        question_set_id,
        settings,
    } = request;

    let Some(set) = state
        .question_store()
        .find_question_set(question_set_id.clone())
        .await?
    else {
        return Err(ServiceError::NotFound(format!(
            "question set `{question_set_id}` not found"
        )));
    };
    set.validate().map_err(|err| {
        ServiceError::InvalidInput(format!(
            "question set `{question_set_id}` is not playable: {err}"
        ))
    })?;

    let settings = settings.resolve(state.config());
    let host_connection = host.as_ref().map(|(connection, _)| *connection);

    let mut rng = rand::rng();
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = format!("{:06}", rng.random_range(0..ROOM_CODE_SPACE));
        if let Entry::Vacant(slot) = state.rooms().entry(code.clone()) {
            let session = GameSession::new(code.clone(), host_id, set, settings, host_connection);
            let game = GameSummary::from(&session);
            slot.insert(spawn_room(state, session, host));

            info!(
                room = %code,
                game_id = %game.id,
                question_set = %question_set_id,
                questions = game.total_questions,
                "game created"
            );
            return Ok(GameCreatedPayload {
                game_code: code,
                game,
            });
        }
    }

    warn!(rooms = state.rooms().len(), "no free room code");
    Err(ServiceError::InvalidState(
        "no free room code available".into(),
    ))
}

/// Public summary of the room using `code`.
pub async fn describe_game(state: &SharedState, code: &str) -> Result<GameSummary, ServiceError> {
    let room = state
        .room(code)
        .ok_or_else(|| ServiceError::NotFound(format!("game `{code}` not found")))?;
    room.describe().await
}

/// Question sets available for new games, ordered by id.
pub async fn list_question_sets(
    state: &SharedState,
) -> Result<Vec<QuestionSetSummary>, ServiceError> {
    let sets = state.question_store().list_question_sets().await?;
    Ok(sets.into_iter().map(QuestionSetSummary::from).collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::{AnswerOptionEntity, QuestionEntity, QuestionSetEntity},
            question_store::FileQuestionStore,
        },
        dto::{game::GameSettingsInput, phase::VisibleGamePhase},
        state::AppState,
        timer::TimerService,
    };

    fn state() -> SharedState {
        let question = QuestionEntity {
            id: "q1".into(),
            prompt: "2 + 2?".into(),
            options: vec![
                AnswerOptionEntity {
                    text: "4".into(),
                    correct: true,
                },
                AnswerOptionEntity {
                    text: "5".into(),
                    correct: false,
                },
            ],
            time_limit_secs: 20,
            points: 100,
            image_url: None,
            explanation: None,
        };
        let unplayable = |id: &str, change: fn(&mut QuestionEntity)| {
            let mut broken = question.clone();
            change(&mut broken);
            QuestionSetEntity {
                id: id.into(),
                title: id.into(),
                questions: vec![broken],
            }
        };
        let store = FileQuestionStore::from_sets([
            unplayable("free", |q| q.points = 0),
            unplayable("instant", |q| q.time_limit_secs = 0),
            unplayable("trick", |q| q.options[0].correct = false),
            QuestionSetEntity {
                id: "math".into(),
                title: "Math".into(),
                questions: vec![question],
            },
            QuestionSetEntity {
                id: "empty".into(),
                title: "Empty".into(),
                questions: Vec::new(),
            },
        ]);
        AppState::new(AppConfig::default(), TimerService::new(), Arc::new(store))
    }

    fn request(set: &str) -> CreateGameRequest {
        CreateGameRequest {
            host_id: "host-1".into(),
            question_set_id: set.into(),
            settings: GameSettingsInput::default(),
        }
    }

    #[tokio::test]
    async fn creates_a_room_with_a_six_digit_code() {
        let state = state();
        let (sender, _inbox) = mpsc::unbounded_channel();
        let created = create_game(&state, request("math"), Some((Uuid::new_v4(), sender)))
            .await
            .unwrap();

        assert_eq!(created.game_code.len(), 6);
        assert!(created.game_code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(created.game.phase, VisibleGamePhase::Waiting);
        assert_eq!(created.game.total_questions, 1);

        let summary = describe_game(&state, &created.game_code).await.unwrap();
        assert_eq!(summary.id, created.game.id);
    }

    #[tokio::test]
    async fn rejects_unknown_and_empty_question_sets() {
        let state = state();
        assert!(matches!(
            create_game(&state, request("history"), None).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            create_game(&state, request("empty"), None).await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(state.rooms().is_empty());
    }

    #[tokio::test]
    async fn rejects_questions_that_cannot_be_scored() {
        let state = state();
        for set in ["free", "instant", "trick"] {
            match create_game(&state, request(set), None).await {
                Err(ServiceError::InvalidInput(message)) => {
                    assert!(message.contains(set), "{message}")
                }
                other => panic!("{set}: expected invalid input, got {other:?}"),
            }
        }
        assert!(state.rooms().is_empty());
    }

    #[tokio::test]
    async fn lists_question_sets_by_id() {
        let sets = list_question_sets(&state()).await.unwrap();
        let ids: Vec<&str> = sets.iter().map(|set| set.id.as_str()).collect();
        assert_eq!(ids, ["empty", "free", "instant", "math", "trick"]);
        assert_eq!(sets[3].question_count, 1);
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let state = state();
        assert!(matches!(
            describe_game(&state, "000000").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
