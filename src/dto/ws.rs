use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::{
        game::{
            AnswerRequest, CreateGameRequest, GameCodeRequest, GameCreatedPayload,
            JoinGameRequest, JoinedGamePayload, JumpRequest, KickRequest, PlayerSummary,
        },
        question::{
            AnswerCountPayload, AnswerResultPayload, GameOverPayload, QuestionPayload,
            ShowExplanationPayload, ShowLeaderboardPayload,
        },
        restore::{
            HostRestoredPayload, RestorationRequest, SessionExpiredPayload,
            SessionRestoredPayload,
        },
    },
    error::RoomRejection,
};

/// Events accepted from host and player WebSocket clients.
///
/// Frames use the envelope `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    CreateGame(CreateGameRequest),
    JoinGame(JoinGameRequest),
    Answer(AnswerRequest),
    StartGame(GameCodeRequest),
    NextQuestion(GameCodeRequest),
    Skip(GameCodeRequest),
    Pause(GameCodeRequest),
    Resume(GameCodeRequest),
    JumpToQuestion(JumpRequest),
    EmergencyStop(GameCodeRequest),
    EndGame(GameCodeRequest),
    KickPlayer(KickRequest),
    LeaveGame(GameCodeRequest),
    RequestSessionRestoration(RestorationRequest),
    RequestPlayerRestoration(RestorationRequest),
    RequestHostRestoration(RestorationRequest),
}

/// Why an inbound frame was dropped.
#[derive(Debug, Error)]
pub enum InboundError {
    /// Not JSON, unknown event or wrong payload shape.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Well-formed but failed validation.
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationErrors),
}

impl From<InboundError> for RoomRejection {
    fn from(err: InboundError) -> Self {
        RoomRejection::InvalidMessage(err.to_string())
    }
}

impl ClientMessage {
    /// Parse and validate a text frame.
    pub fn from_json_str(raw: &str) -> Result<Self, InboundError> {
        let message: Self = serde_json::from_str(raw)?;
        message.validate()?;
        Ok(message)
    }

    /// Room the event is addressed to, `None` for `createGame`.
    pub fn game_code(&self) -> Option<&str> {
        match self {
            ClientMessage::CreateGame(_) => None,
            ClientMessage::JoinGame(req) => Some(&req.game_code),
            ClientMessage::Answer(req) => Some(&req.game_code),
            ClientMessage::StartGame(req)
            | ClientMessage::NextQuestion(req)
            | ClientMessage::Skip(req)
            | ClientMessage::Pause(req)
            | ClientMessage::Resume(req)
            | ClientMessage::EmergencyStop(req)
            | ClientMessage::EndGame(req)
            | ClientMessage::LeaveGame(req) => Some(&req.game_code),
            ClientMessage::JumpToQuestion(req) => Some(&req.game_code),
            ClientMessage::KickPlayer(req) => Some(&req.game_code),
            ClientMessage::RequestSessionRestoration(req)
            | ClientMessage::RequestPlayerRestoration(req)
            | ClientMessage::RequestHostRestoration(req) => Some(&req.game_code),
        }
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            ClientMessage::CreateGame(req) => req.validate(),
            ClientMessage::JoinGame(req) => req.validate(),
            ClientMessage::Answer(req) => req.validate(),
            ClientMessage::StartGame(req)
            | ClientMessage::NextQuestion(req)
            | ClientMessage::Skip(req)
            | ClientMessage::Pause(req)
            | ClientMessage::Resume(req)
            | ClientMessage::EmergencyStop(req)
            | ClientMessage::EndGame(req)
            | ClientMessage::LeaveGame(req) => req.validate(),
            ClientMessage::JumpToQuestion(req) => req.validate(),
            ClientMessage::KickPlayer(req) => req.validate(),
            ClientMessage::RequestSessionRestoration(req)
            | ClientMessage::RequestPlayerRestoration(req)
            | ClientMessage::RequestHostRestoration(req) => req.validate(),
        }
    }
}

/// Events pushed by the server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    GameCreated(GameCreatedPayload),
    JoinedGame(JoinedGamePayload),
    Question(QuestionPayload),
    AnswerResult(AnswerResultPayload),
    ShowExplanation(ShowExplanationPayload),
    ShowLeaderboard(ShowLeaderboardPayload),
    GameSessionRestored(SessionRestoredPayload),
    PlayerSessionRestored(SessionRestoredPayload),
    HostRestored(HostRestoredPayload),
    SessionExpired(SessionExpiredPayload),
    #[serde(rename = "game_over")]
    GameOver(GameOverPayload),
    PlayerJoined(PlayerSummary),
    PlayerLeft(PlayerSummary),
    PlayerStatus(PlayerSummary),
    PlayerCount(PlayerCountPayload),
    AnswerCount(AnswerCountPayload),
    GamePaused(TimeRemainingPayload),
    GameResumed(TimeRemainingPayload),
    Kicked(KickedPayload),
    Error(ErrorPayload),
}

impl ServerMessage {
    /// Wire name of the event.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::GameCreated(_) => "gameCreated",
            ServerMessage::JoinedGame(_) => "joinedGame",
            ServerMessage::Question(_) => "question",
            ServerMessage::AnswerResult(_) => "answerResult",
            ServerMessage::ShowExplanation(_) => "showExplanation",
            ServerMessage::ShowLeaderboard(_) => "showLeaderboard",
            ServerMessage::GameSessionRestored(_) => "gameSessionRestored",
            ServerMessage::PlayerSessionRestored(_) => "playerSessionRestored",
            ServerMessage::HostRestored(_) => "hostRestored",
            ServerMessage::SessionExpired(_) => "sessionExpired",
            ServerMessage::GameOver(_) => "game_over",
            ServerMessage::PlayerJoined(_) => "playerJoined",
            ServerMessage::PlayerLeft(_) => "playerLeft",
            ServerMessage::PlayerStatus(_) => "playerStatus",
            ServerMessage::PlayerCount(_) => "playerCount",
            ServerMessage::AnswerCount(_) => "answerCount",
            ServerMessage::GamePaused(_) => "gamePaused",
            ServerMessage::GameResumed(_) => "gameResumed",
            ServerMessage::Kicked(_) => "kicked",
            ServerMessage::Error(_) => "error",
        }
    }

    /// `error` event for a rejection.
    pub fn rejection(rejection: &RoomRejection) -> Self {
        ServerMessage::Error(ErrorPayload {
            code: rejection.code().to_string(),
            message: rejection.to_string(),
        })
    }

    /// Terminal `sessionExpired` event.
    pub fn expired(reason: impl Into<String>) -> Self {
        ServerMessage::SessionExpired(SessionExpiredPayload::redirect(reason))
    }
}

/// Raw envelope, used by clients that dispatch on the event name only.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Build an envelope from a name and an already serialized payload.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
/// Number of players in the room.
pub struct PlayerCountPayload {
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Milliseconds left in the phase that was paused or resumed.
pub struct TimeRemainingPayload {
    pub time_remaining: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
/// Sent to a player evicted by the host.
pub struct KickedPayload {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
/// Rejection of an inbound event.
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_envelope_with_camel_case_event() {
        let message = ClientMessage::from_json_str(
            r#"{"event":"jumpToQuestion","data":{"gameCode":"123456","questionIndex":2}}"#,
        )
        .unwrap();
        match &message {
            ClientMessage::JumpToQuestion(req) => assert_eq!(req.question_index, 2),
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(message.game_code(), Some("123456"));
    }

    #[test]
    fn unknown_event_is_malformed() {
        let err = ClientMessage::from_json_str(r#"{"event":"buzz","data":{}}"#).unwrap_err();
        assert!(matches!(err, InboundError::Malformed(_)));
    }

    #[test]
    fn invalid_payload_is_rejected_after_parsing() {
        let err = ClientMessage::from_json_str(r#"{"event":"skip","data":{"gameCode":"12"}}"#)
            .unwrap_err();
        assert!(matches!(err, InboundError::Invalid(_)));
        assert_eq!(RoomRejection::from(err).code(), "invalidMessage");
    }

    #[test]
    fn server_events_use_wire_names() {
        let over = ServerMessage::GameOver(GameOverPayload {
            scoreboard: Vec::new(),
        });
        let json = serde_json::to_value(&over).unwrap();
        assert_eq!(json["event"], "game_over");
        assert_eq!(json["event"], over.event_name());

        let expired = serde_json::to_value(ServerMessage::expired("game over")).unwrap();
        assert_eq!(expired["event"], "sessionExpired");
        assert_eq!(expired["data"]["shouldRedirect"], true);

        let paused = ServerMessage::GamePaused(TimeRemainingPayload {
            time_remaining: 1500,
        });
        let json = serde_json::to_value(&paused).unwrap();
        assert_eq!(json["event"], paused.event_name());
        assert_eq!(json["data"]["timeRemaining"], 1500);
    }
}
