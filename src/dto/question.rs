use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;

use crate::{
    dto::{game::StandingEntry, millis},
    scoring::ScoreBreakdown,
    state::game::{Explanation, Question},
};

/// Question as broadcast to participants. Carries no correctness flags.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPayload {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    /// Answer window in seconds.
    pub time_limit: u32,
    /// One-based position in the game.
    pub question_number: usize,
    pub total_questions: usize,
    pub image_url: Option<String>,
    /// Server-computed milliseconds left to answer.
    pub time_remaining: u64,
}

impl QuestionPayload {
    /// Build the public view of the question at `index`.
    pub fn new(question: &Question, index: usize, total: usize, remaining: Duration) -> Self {
        Self {
            id: question.id.clone(),
            question: question.prompt.clone(),
            options: question
                .options
                .iter()
                .map(|option| option.text.clone())
                .collect(),
            time_limit: question.time_limit_secs,
            question_number: index + 1,
            total_questions: total,
            image_url: question.image_url.clone(),
            time_remaining: millis(remaining),
        }
    }
}

/// Private feedback sent to a player once their answer is scored.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResultPayload {
    pub is_correct: bool,
    pub points: u32,
    pub new_score: u64,
    pub streak: u32,
    /// Text of the correct option.
    pub correct_answer: String,
    pub breakdown: BreakdownPayload,
}

/// Components of an awarded score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownPayload {
    pub base_points: u32,
    pub streak_bonus: u32,
    pub time_bonus: u32,
}

impl From<ScoreBreakdown> for BreakdownPayload {
    fn from(value: ScoreBreakdown) -> Self {
        Self {
            base_points: value.base_points,
            streak_bonus: value.streak_bonus,
            time_bonus: value.time_bonus,
        }
    }
}

/// How the room answered a question.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerStats {
    /// Number of players who picked each option, in option order.
    pub option_counts: Vec<usize>,
    pub correct_count: usize,
    pub answered_count: usize,
    pub total_players: usize,
}

/// Explanation content as sent to clients.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationPayload {
    pub title: Option<String>,
    pub text: Option<String>,
    pub image_url: Option<String>,
}

impl From<&Explanation> for ExplanationPayload {
    fn from(value: &Explanation) -> Self {
        Self {
            title: value.title.clone(),
            text: value.text.clone(),
            image_url: value.image_url.clone(),
        }
    }
}

/// Broadcast when a question with explanation content closes.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShowExplanationPayload {
    pub explanation: Option<ExplanationPayload>,
    pub correct_answer: String,
    pub correct_option: Option<usize>,
    pub answer_stats: AnswerStats,
    /// Seconds before auto-advance, absent when the host advances manually.
    pub explanation_time: Option<u64>,
    pub standings: Option<Vec<StandingEntry>>,
}

/// Broadcast when a question without explanation closes.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShowLeaderboardPayload {
    pub standings: Vec<StandingEntry>,
    pub correct_answer: String,
    pub correct_option: Option<usize>,
    pub answer_stats: AnswerStats,
    /// Seconds before auto-advance, absent when the host advances manually.
    pub explanation_time: Option<u64>,
    pub question_number: usize,
    pub total_questions: usize,
}

/// Final standings, broadcast once.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameOverPayload {
    pub scoreboard: Vec<StandingEntry>,
}

/// Progress of the open question, sent to the host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerCountPayload {
    pub answered: usize,
    pub connected: usize,
}
