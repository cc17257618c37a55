use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::state_machine::{Phase, PhaseKind};

/// Publicly visible game phase exposed to clients (WebSocket/REST/SSE).
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleGamePhase {
    /// Lobby, players can join.
    Waiting,
    /// A question is open.
    Question,
    /// The explanation of the last question is shown.
    Explanation,
    /// Standings are shown between questions.
    Leaderboard,
    /// The host paused the game.
    Paused,
    /// Game over.
    Finished,
}

impl From<PhaseKind> for VisibleGamePhase {
    fn from(value: PhaseKind) -> Self {
        match value {
            PhaseKind::Waiting => VisibleGamePhase::Waiting,
            PhaseKind::Question => VisibleGamePhase::Question,
            PhaseKind::Explanation => VisibleGamePhase::Explanation,
            PhaseKind::Leaderboard => VisibleGamePhase::Leaderboard,
            PhaseKind::Paused => VisibleGamePhase::Paused,
            PhaseKind::Finished => VisibleGamePhase::Finished,
        }
    }
}

impl From<&Phase> for VisibleGamePhase {
    fn from(value: &Phase) -> Self {
        value.kind().into()
    }
}
