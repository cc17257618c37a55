//! Snapshots handed to reconnecting clients. Everything here reads the authoritative session;
//! nothing mutates it, so repeating a restoration yields the same answer.

use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    dto::{
        game::{PlayerSummary, standing_entries},
        millis,
        phase::VisibleGamePhase,
        question::{ExplanationPayload, QuestionPayload},
        restore::{GameStateSnapshot, LastAnswerPayload, PlayerState, RevealPayload},
    },
    state::{
        game::{GameSession, Player},
        state_machine::Phase,
    },
};

impl GameSession {
    /// Current state of the game as seen by a client connecting at `now`.
    pub fn snapshot(&self, now: Instant) -> GameStateSnapshot {
        let phase = self.machine.phase();
        let active = match phase {
            Phase::Paused(paused) => paused.resume.as_ref(),
            other => other,
        };
        let remaining = self.machine.remaining(now);

        let question = match active {
            Phase::Question(open) => self.questions.get(open.index).map(|question| {
                QuestionPayload::new(
                    question,
                    open.index,
                    self.questions.len(),
                    remaining.unwrap_or_default(),
                )
            }),
            _ => None,
        };

        let reveal = match active {
            Phase::Explanation(_) | Phase::Leaderboard(_) => active
                .index()
                .and_then(|index| self.questions.get(index))
                .map(|question| RevealPayload {
                    question_id: question.id.clone(),
                    correct_answer: question.correct_answer().to_string(),
                    correct_option: question.correct_option(),
                    explanation: question
                        .explanation
                        .as_ref()
                        .filter(|_| question.has_explanation())
                        .map(ExplanationPayload::from),
                }),
            _ => None,
        };

        GameStateSnapshot {
            game_id: self.id,
            game_code: self.code.clone(),
            title: self.title.clone(),
            phase: phase.into(),
            paused_phase: match phase {
                Phase::Paused(paused) => Some(VisibleGamePhase::from(paused.resume.as_ref())),
                _ => None,
            },
            generation: self.machine.generation(),
            question_number: self.machine.current_index().map(|index| index + 1),
            total_questions: self.questions.len(),
            question,
            time_remaining: remaining.map(millis),
            player_count: self.players.len(),
            standings: standing_entries(&self.standings()),
            reveal,
        }
    }

    /// Private view of one player, including whether the open question has their answer.
    pub fn player_state(&self, player_id: Uuid) -> Option<PlayerState> {
        let player = self.players.get(&player_id)?;
        let has_answered = match self.machine.phase() {
            Phase::Question(_) | Phase::Paused(_) => self
                .current_question()
                .is_some_and(|question| player.has_record_for(&question.id)),
            _ => false,
        };
        Some(PlayerState {
            player_id: player.id,
            name: player.name.clone(),
            score: player.score,
            streak: player.streak,
            has_answered,
            last_answer: player.last_answer.as_ref().map(|answer| LastAnswerPayload {
                question_id: answer.question_id.clone(),
                selected_option: answer.selected,
                is_correct: answer.correct,
                points: answer.points,
            }),
        })
    }

    /// Roster returned to a restored host.
    pub fn roster(&self) -> Vec<PlayerSummary> {
        self.players.values().map(PlayerSummary::from).collect()
    }

    /// Player matching a restoration identity: by id first, then by name.
    ///
    /// A player bound to an account only matches a name lookup carrying the same user id.
    pub fn find_player(
        &self,
        player_id: Option<Uuid>,
        name: Option<&str>,
        user_id: Option<&str>,
    ) -> Option<&Player> {
        if let Some(player) = player_id.and_then(|id| self.players.get(&id)) {
            return Some(player);
        }
        let name = name?.trim();
        self.players.values().find(|player| {
            player.name.eq_ignore_ascii_case(name)
                && player
                    .user_id
                    .as_deref()
                    .is_none_or(|expected| Some(expected) == user_id)
        })
    }
}
