use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    config::AppConfig,
    dao::models::QuestionSetSummaryEntity,
    dto::{
        format_system_time,
        phase::VisibleGamePhase,
        validation::{validate_player_name, validate_room_code},
    },
    state::game::{GameSession, GameSettings, Player, PlayerStatus, Standing},
};

/// Payload sent by a host to open a new room (`createGame` event or `POST /games`).
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameRequest {
    /// Identity of the host, echoed back on host restoration.
    #[validate(length(min = 1, max = 128))]
    pub host_id: String,
    /// Question set to play.
    #[validate(length(min = 1, max = 128))]
    pub question_set_id: String,
    #[serde(default)]
    #[validate(nested)]
    pub settings: GameSettingsInput,
}

/// Optional overrides of the room settings. Omitted fields use the server defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GameSettingsInput {
    pub streak_bonus: Option<bool>,
    pub time_bonus: Option<bool>,
    /// Close a question as soon as every connected player answered.
    pub early_advance: Option<bool>,
    /// Leave explanation and leaderboard phases on a timer.
    pub auto_advance: Option<bool>,
    #[validate(range(min = 1, max = 300))]
    pub explanation_time_secs: Option<u64>,
    #[validate(range(min = 1, max = 300))]
    pub leaderboard_time_secs: Option<u64>,
}

impl GameSettingsInput {
    /// Merge the overrides with the configured defaults.
    pub fn resolve(&self, config: &AppConfig) -> GameSettings {
        GameSettings {
            streak_bonus: self.streak_bonus.unwrap_or(true),
            time_bonus: self.time_bonus.unwrap_or(true),
            early_advance: self.early_advance.unwrap_or(true),
            auto_advance: self.auto_advance.unwrap_or(true),
            explanation_time: self
                .explanation_time_secs
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.explanation_time()),
            leaderboard_time: self
                .leaderboard_time_secs
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.leaderboard_time()),
        }
    }
}

/// Payload sent by a player to enter a room.
#[skip_serializing_none]
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinGameRequest {
    pub player_name: String,
    pub game_code: String,
    #[serde(default)]
    pub is_authenticated: bool,
    /// Account reference, required when `isAuthenticated` is set.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Validate for JoinGameRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_player_name(&self.player_name) {
            errors.add("player_name", e);
        }
        if let Err(e) = validate_room_code(&self.game_code) {
            errors.add("game_code", e);
        }
        if self.is_authenticated
            && self
                .user_id
                .as_deref()
                .is_none_or(|id| id.trim().is_empty())
        {
            let mut err = ValidationError::new("user_id_required");
            err.message = Some("Authenticated players must provide a user id".into());
            errors.add("user_id", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Payload of every host command that only names the room.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GameCodeRequest {
    #[validate(custom(function = "validate_room_code"))]
    pub game_code: String,
}

/// Host request to jump to a question.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JumpRequest {
    #[validate(custom(function = "validate_room_code"))]
    pub game_code: String,
    /// Zero-based index of the target question.
    pub question_index: usize,
}

/// Host request to evict a player.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct KickRequest {
    #[validate(custom(function = "validate_room_code"))]
    pub game_code: String,
    pub player_id: Uuid,
}

/// Answer submitted by a player.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    #[validate(custom(function = "validate_room_code"))]
    pub game_code: String,
    #[validate(length(min = 1))]
    pub question_id: String,
    /// Selected option index; `null` when the client timed out.
    #[serde(default)]
    pub selected_option: Option<usize>,
    /// Seconds the client says it took to answer.
    #[validate(range(min = 0.0, max = 86400.0))]
    pub time_taken: f64,
}

/// Connectivity status as exposed to clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PlayerStatusView {
    Connected,
    Reconnecting,
    Disconnected,
}

impl From<PlayerStatus> for PlayerStatusView {
    fn from(value: PlayerStatus) -> Self {
        match value {
            PlayerStatus::Connected => PlayerStatusView::Connected,
            PlayerStatus::Reconnecting => PlayerStatusView::Reconnecting,
            PlayerStatus::Disconnected => PlayerStatusView::Disconnected,
        }
    }
}

/// Public view of a player.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub id: Uuid,
    pub name: String,
    pub score: u64,
    pub streak: u32,
    pub status: PlayerStatusView,
}

impl From<&Player> for PlayerSummary {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id,
            name: player.name.clone(),
            score: player.score,
            streak: player.streak,
            status: player.status.into(),
        }
    }
}

/// One row of the standings.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StandingEntry {
    pub rank: usize,
    pub player_id: Uuid,
    pub name: String,
    pub score: u64,
    pub streak: u32,
}

impl From<&Standing> for StandingEntry {
    fn from(standing: &Standing) -> Self {
        Self {
            rank: standing.rank,
            player_id: standing.player_id,
            name: standing.name.clone(),
            score: standing.score,
            streak: standing.streak,
        }
    }
}

/// Convert a standings list for the wire.
pub fn standing_entries(standings: &[Standing]) -> Vec<StandingEntry> {
    standings.iter().map(StandingEntry::from).collect()
}

/// Effective settings of a room.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameSettingsView {
    pub streak_bonus: bool,
    pub time_bonus: bool,
    pub early_advance: bool,
    pub auto_advance: bool,
    pub explanation_time_secs: u64,
    pub leaderboard_time_secs: u64,
}

impl From<&GameSettings> for GameSettingsView {
    fn from(settings: &GameSettings) -> Self {
        Self {
            streak_bonus: settings.streak_bonus,
            time_bonus: settings.time_bonus,
            early_advance: settings.early_advance,
            auto_advance: settings.auto_advance,
            explanation_time_secs: settings.explanation_time.as_secs(),
            leaderboard_time_secs: settings.leaderboard_time.as_secs(),
        }
    }
}

/// Public summary of a room.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameSummary {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub question_set_id: String,
    pub phase: VisibleGamePhase,
    /// One-based number of the current question.
    pub question_number: Option<usize>,
    pub total_questions: usize,
    pub player_count: usize,
    pub settings: GameSettingsView,
    /// RFC3339 creation timestamp.
    pub created_at: String,
}

impl From<&GameSession> for GameSummary {
    fn from(session: &GameSession) -> Self {
        Self {
            id: session.id,
            code: session.code.clone(),
            title: session.title.clone(),
            question_set_id: session.question_set_id.clone(),
            phase: session.machine.phase().into(),
            question_number: session.machine.current_index().map(|index| index + 1),
            total_questions: session.questions.len(),
            player_count: session.players.len(),
            settings: (&session.settings).into(),
            created_at: format_system_time(session.created_at),
        }
    }
}

/// Reply to `createGame`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameCreatedPayload {
    pub game_code: String,
    pub game: GameSummary,
}

/// Reply to `joinGame`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinedGamePayload {
    pub game_code: String,
    pub player_count: usize,
    pub game_status: VisibleGamePhase,
    pub player: PlayerSummary,
}

/// Question set offered to hosts when creating a game.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSetSummary {
    pub id: String,
    pub title: String,
    pub question_count: usize,
}

impl From<QuestionSetSummaryEntity> for QuestionSetSummary {
    fn from(entity: QuestionSetSummaryEntity) -> Self {
        Self {
            id: entity.id,
            title: entity.title,
            question_count: entity.question_count,
        }
    }
}
