use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::dto::{
    game::{PlayerSummary, StandingEntry},
    phase::VisibleGamePhase,
    question::{ExplanationPayload, QuestionPayload},
    validation::validate_room_code,
};

/// Restoration request sent by a client after every (re)connection.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestorationRequest {
    pub game_code: String,
    pub identity: RestoreIdentity,
}

/// Who the reconnecting client claims to be.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RestoreIdentity {
    /// Player id handed out in `joinedGame`.
    pub player_id: Option<Uuid>,
    /// Display name, used when the player id was lost.
    pub player_name: Option<String>,
    /// Host identity given in `createGame`.
    pub host_id: Option<String>,
    /// Account reference of an authenticated player.
    pub user_id: Option<String>,
}

impl Validate for RestorationRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_room_code(&self.game_code) {
            errors.add("game_code", e);
        }
        let identity = &self.identity;
        if identity.player_id.is_none()
            && identity.player_name.as_deref().is_none_or(str::is_empty)
            && identity.host_id.as_deref().is_none_or(str::is_empty)
        {
            let mut err = ValidationError::new("identity_missing");
            err.message = Some("Restoration needs a player id, player name or host id".into());
            errors.add("identity", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Correct answer of the question being explained or ranked.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RevealPayload {
    pub question_id: String,
    pub correct_answer: String,
    pub correct_option: Option<usize>,
    pub explanation: Option<ExplanationPayload>,
}

/// Authoritative view of a room at the time of a restoration request.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameStateSnapshot {
    pub game_id: Uuid,
    pub game_code: String,
    pub title: String,
    pub phase: VisibleGamePhase,
    /// Phase interrupted by a pause.
    pub paused_phase: Option<VisibleGamePhase>,
    /// Phase-generation number, lets clients discard stale frames.
    pub generation: u64,
    pub question_number: Option<usize>,
    pub total_questions: usize,
    /// Open question, only while answers are collected.
    pub question: Option<QuestionPayload>,
    /// Server-computed milliseconds left in the phase, clamped at zero.
    pub time_remaining: Option<u64>,
    pub player_count: usize,
    pub standings: Vec<StandingEntry>,
    /// Correct answer once the question closed.
    pub reveal: Option<RevealPayload>,
}

/// Answer the player gave to the current or last question.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastAnswerPayload {
    pub question_id: String,
    pub selected_option: Option<usize>,
    pub is_correct: bool,
    pub points: u32,
}

/// Requesting player's own standing.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub player_id: Uuid,
    pub name: String,
    pub score: u64,
    pub streak: u32,
    /// Whether the open question already has an answer from this player.
    pub has_answered: bool,
    pub last_answer: Option<LastAnswerPayload>,
}

/// Reply to player and generic restoration requests.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRestoredPayload {
    pub player_state: Option<PlayerState>,
    pub game_state: GameStateSnapshot,
}

/// Reply to host restoration requests.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostRestoredPayload {
    pub game_state: GameStateSnapshot,
    pub players: Vec<PlayerSummary>,
}

/// Terminal reply: the session cannot be restored.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionExpiredPayload {
    /// Clients should leave the game screen.
    pub should_redirect: bool,
    pub reason: Option<String>,
}

impl SessionExpiredPayload {
    /// Expired session with a redirect hint.
    pub fn redirect(reason: impl Into<String>) -> Self {
        Self {
            should_redirect: true,
            reason: Some(reason.into()),
        }
    }
}
