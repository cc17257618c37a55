use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

const DEFAULT_TIME_LIMIT_SECS: u32 = 20;
const DEFAULT_POINTS: u32 = 100;
/// Longest answer window a question may ask for.
pub const MAX_TIME_LIMIT_SECS: u32 = 600;
/// Largest base value a question may carry.
pub const MAX_POINTS: u32 = 100_000;

/// Question set as authored and stored outside the game server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSetEntity {
    /// Stable identifier referenced by `createGame`.
    pub id: String,
    /// Human readable title.
    pub title: String,
    /// Ordered questions played in sequence.
    #[serde(default)]
    #[validate(length(min = 1), nested)]
    pub questions: Vec<QuestionEntity>,
}

/// One multiple-choice question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuestionEntity {
    /// Identifier unique within its set.
    pub id: String,
    /// Text shown to every participant.
    pub prompt: String,
    /// Ordered answer options; at least one is flagged correct.
    #[validate(length(min = 1), custom(function = "validate_has_correct_option"))]
    pub options: Vec<AnswerOptionEntity>,
    /// Seconds players get to answer.
    #[serde(default = "default_time_limit")]
    #[validate(range(min = 1, max = MAX_TIME_LIMIT_SECS))]
    pub time_limit_secs: u32,
    /// Base point value awarded for a correct answer.
    #[serde(default = "default_points")]
    #[validate(range(min = 1, max = MAX_POINTS))]
    pub points: u32,
    /// Optional illustration.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Optional explanation displayed after the question closes.
    #[serde(default)]
    pub explanation: Option<ExplanationEntity>,
}

/// One answer option and whether it is the right one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerOptionEntity {
    /// Text shown to players.
    pub text: String,
    /// Correctness flag, never sent to players while the question is open.
    #[serde(default)]
    pub correct: bool,
}

/// Explanation content attached to a question.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationEntity {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Lightweight listing entry for available question sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSetSummaryEntity {
    pub id: String,
    pub title: String,
    pub question_count: usize,
}

impl From<&QuestionSetEntity> for QuestionSetSummaryEntity {
    fn from(set: &QuestionSetEntity) -> Self {
        Self {
            id: set.id.clone(),
            title: set.title.clone(),
            question_count: set.questions.len(),
        }
    }
}

fn validate_has_correct_option(options: &[AnswerOptionEntity]) -> Result<(), ValidationError> {
    if options.iter().any(|option| option.correct) {
        return Ok(());
    }
    let mut err = ValidationError::new("no_correct_option");
    err.message = Some("Question must flag one option as correct".into());
    Err(err)
}

fn default_time_limit() -> u32 {
    DEFAULT_TIME_LIMIT_SECS
}

fn default_points() -> u32 {
    DEFAULT_POINTS
}
