use std::{cmp::Ordering, time::Duration, time::SystemTime};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::{
    dao::models::{AnswerOptionEntity, ExplanationEntity, QuestionEntity, QuestionSetEntity},
    state::state_machine::GameStateMachine,
};

/// Identifier allocated to each websocket connection.
pub type ConnectionId = Uuid;

/// Immutable question as played in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Identifier unique within the question set.
    pub id: String,
    /// Text shown to participants.
    pub prompt: String,
    /// Ordered answer options.
    pub options: Vec<AnswerOption>,
    /// Seconds players get to answer.
    pub time_limit_secs: u32,
    /// Base point value.
    pub points: u32,
    /// Optional illustration.
    pub image_url: Option<String>,
    /// Explanation shown once the question closes.
    pub explanation: Option<Explanation>,
}

/// One answer option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOption {
    /// Option text.
    pub text: String,
    /// Correctness flag.
    pub correct: bool,
}

/// Explanation content of a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Explanation {
    pub title: Option<String>,
    pub text: Option<String>,
    pub image_url: Option<String>,
}

impl Question {
    /// Index of the first option flagged correct.
    pub fn correct_option(&self) -> Option<usize> {
        self.options.iter().position(|option| option.correct)
    }

    /// Text of the correct option, empty when the question has none.
    pub fn correct_answer(&self) -> &str {
        self.correct_option()
            .and_then(|index| self.options.get(index))
            .map(|option| option.text.as_str())
            .unwrap_or_default()
    }

    /// Whether `selected` designates an option flagged correct. `None` means no answer.
    pub fn is_correct(&self, selected: Option<usize>) -> bool {
        selected
            .and_then(|index| self.options.get(index))
            .is_some_and(|option| option.correct)
    }

    /// Answer window as a duration.
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(u64::from(self.time_limit_secs))
    }

    /// Whether the explanation carries anything to display.
    pub fn has_explanation(&self) -> bool {
        self.explanation.as_ref().is_some_and(|explanation| {
            [&explanation.title, &explanation.text, &explanation.image_url]
                .iter()
                .any(|field| field.as_deref().is_some_and(|value| !value.trim().is_empty()))
        })
    }
}

/// Host-selected options for a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameSettings {
    /// Award the streak bonus.
    pub streak_bonus: bool,
    /// Award the time bonus.
    pub time_bonus: bool,
    /// Close a question as soon as every connected player answered.
    pub early_advance: bool,
    /// Leave explanation/leaderboard phases on a timer instead of waiting for the host.
    pub auto_advance: bool,
    /// Duration of the explanation phase.
    pub explanation_time: Duration,
    /// Duration of the leaderboard phase.
    pub leaderboard_time: Duration,
}

/// Connectivity of a player as seen by the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Connected,
    Reconnecting,
    Disconnected,
}

/// Answer kept for the question currently open or last played.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedAnswer {
    pub question_id: String,
    pub selected: Option<usize>,
    pub time_taken: f64,
    pub correct: bool,
    pub points: u32,
}

/// Ledger entry written once per (player, question).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreRecord {
    /// Question the record belongs to.
    pub question_id: String,
    /// Whether the answer was correct.
    pub correct: bool,
    /// Base points awarded.
    pub base_points: u32,
    /// Streak bonus awarded.
    pub streak_bonus: u32,
    /// Time bonus awarded.
    pub time_bonus: u32,
    /// Sum of the above.
    pub total: u32,
    /// Streak after this answer.
    pub new_streak: u32,
}

/// Participant of a room. Score and streak survive reconnects.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: Uuid,
    pub name: String,
    /// Reference to an authenticated account, when the player signed in.
    pub user_id: Option<String>,
    pub score: u64,
    pub streak: u32,
    pub status: PlayerStatus,
    /// Socket currently attached to this player.
    pub connection: Option<ConnectionId>,
    pub last_answer: Option<SubmittedAnswer>,
    /// Append-only scoring history.
    pub ledger: Vec<ScoreRecord>,
    /// Room sequence number at join time.
    pub joined_seq: u64,
    /// Room sequence number at which the current score was first reached.
    pub score_reached_seq: u64,
}

impl Player {
    /// Create a connected player.
    pub fn new(name: String, user_id: Option<String>, connection: ConnectionId, seq: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            user_id,
            score: 0,
            streak: 0,
            status: PlayerStatus::Connected,
            connection: Some(connection),
            last_answer: None,
            ledger: Vec::new(),
            joined_seq: seq,
            score_reached_seq: seq,
        }
    }

    /// Whether a record already exists for `question_id`.
    pub fn has_record_for(&self, question_id: &str) -> bool {
        self.ledger
            .iter()
            .any(|record| record.question_id == question_id)
    }

    /// Append a record and update score and streak. Returns `false` for duplicates.
    pub fn apply_record(&mut self, record: ScoreRecord, seq: u64) -> bool {
        if self.has_record_for(&record.question_id) {
            return false;
        }
        self.streak = record.new_streak;
        if record.total > 0 {
            self.score += u64::from(record.total);
            self.score_reached_seq = seq;
        }
        self.ledger.push(record);
        true
    }

    /// Whether the player has a live socket.
    pub fn is_connected(&self) -> bool {
        self.status == PlayerStatus::Connected
    }
}

/// Rank entry computed from the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    pub rank: usize,
    pub player_id: Uuid,
    pub name: String,
    pub score: u64,
    pub streak: u32,
}

/// Authoritative state of one room, owned by its worker.
#[derive(Debug)]
pub struct GameSession {
    /// Primary key of the game.
    pub id: Uuid,
    /// Six-digit code players type to join.
    pub code: String,
    /// Identity of the host that created the game.
    pub host_id: String,
    /// Question set the game was built from.
    pub question_set_id: String,
    /// Title of the question set.
    pub title: String,
    /// Ordered questions, fixed once the game exists.
    pub questions: Vec<Question>,
    pub settings: GameSettings,
    /// Roster in join order.
    pub players: IndexMap<Uuid, Player>,
    /// Socket currently attached as host.
    pub host_connection: Option<ConnectionId>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Phase machine.
    pub machine: GameStateMachine,
    seq: u64,
}

impl GameSession {
    /// Build a new room from a question set.
    pub fn new(
        code: String,
        host_id: String,
        set: QuestionSetEntity,
        settings: GameSettings,
        host_connection: Option<ConnectionId>,
    ) -> Self {
        let questions: Vec<Question> = set.questions.into_iter().map(Question::from).collect();
        Self {
            id: Uuid::new_v4(),
            code,
            host_id,
            question_set_id: set.id,
            title: set.title,
            machine: GameStateMachine::new(questions.len()),
            questions,
            settings,
            players: IndexMap::new(),
            host_connection,
            created_at: SystemTime::now(),
            seq: 0,
        }
    }

    /// Allocate the next room-local sequence number.
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Question of the current phase.
    pub fn current_question(&self) -> Option<&Question> {
        self.machine
            .current_index()
            .and_then(|index| self.questions.get(index))
    }

    /// Whether another player already uses `name` (case-insensitive).
    pub fn name_taken(&self, name: &str) -> bool {
        self.players
            .values()
            .any(|player| player.name.eq_ignore_ascii_case(name))
    }

    /// Players with a live socket.
    pub fn connected_count(&self) -> usize {
        self.players
            .values()
            .filter(|player| player.is_connected())
            .count()
    }

    /// Connected players that have a ledger entry for `question_id`.
    pub fn answered_count(&self, question_id: &str) -> usize {
        self.players
            .values()
            .filter(|player| player.is_connected() && player.has_record_for(question_id))
            .count()
    }

    /// Standings ordered by score, then by who reached it first, then by join order.
    pub fn standings(&self) -> Vec<Standing> {
        let mut ranked: Vec<&Player> = self.players.values().collect();
        ranked.sort_by(|a, b| compare_rank(a, b));
        ranked
            .into_iter()
            .enumerate()
            .map(|(position, player)| Standing {
                rank: position + 1,
                player_id: player.id,
                name: player.name.clone(),
                score: player.score,
                streak: player.streak,
            })
            .collect()
    }
}

fn compare_rank(a: &Player, b: &Player) -> Ordering {
    b.score
        .cmp(&a.score)
        .then(a.score_reached_seq.cmp(&b.score_reached_seq))
        .then(a.joined_seq.cmp(&b.joined_seq))
}

impl From<QuestionEntity> for Question {
    fn from(value: QuestionEntity) -> Self {
        Self {
            id: value.id,
            prompt: value.prompt,
            options: value.options.into_iter().map(Into::into).collect(),
            time_limit_secs: value.time_limit_secs,
            points: value.points,
            image_url: value.image_url,
            explanation: value.explanation.map(Into::into),
        }
    }
}

impl From<AnswerOptionEntity> for AnswerOption {
    fn from(value: AnswerOptionEntity) -> Self {
        Self {
            text: value.text,
            correct: value.correct,
        }
    }
}

impl From<ExplanationEntity> for Explanation {
    fn from(value: ExplanationEntity) -> Self {
        Self {
            title: value.title,
            text: value.text,
            image_url: value.image_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(question_id: &str, total: u32, new_streak: u32) -> ScoreRecord {
        ScoreRecord {
            question_id: question_id.into(),
            correct: total > 0,
            base_points: total,
            streak_bonus: 0,
            time_bonus: 0,
            total,
            new_streak,
        }
    }

    fn session_with(names: &[&str]) -> GameSession {
        let set = QuestionSetEntity {
            id: "set".into(),
            title: "Set".into(),
            questions: Vec::new(),
        };
        let settings = GameSettings {
            streak_bonus: true,
            time_bonus: true,
            early_advance: true,
            auto_advance: true,
            explanation_time: Duration::from_secs(5),
            leaderboard_time: Duration::from_secs(5),
        };
        let mut session = GameSession::new("123456".into(), "host".into(), set, settings, None);
        for name in names {
            let seq = session.next_seq();
            let player = Player::new((*name).into(), None, Uuid::new_v4(), seq);
            session.players.insert(player.id, player);
        }
        session
    }

    #[test]
    fn ledger_rejects_second_record_for_same_question() {
        let mut player = Player::new("ada".into(), None, Uuid::new_v4(), 1);
        assert!(player.apply_record(record("q1", 120, 1), 2));
        assert!(!player.apply_record(record("q1", 120, 2), 3));
        assert_eq!(player.score, 120);
        assert_eq!(player.streak, 1);
        assert_eq!(player.ledger.len(), 1);
    }

    #[test]
    fn ties_go_to_whoever_reached_the_score_first() {
        let mut session = session_with(&["ada", "bob", "cy"]);
        let ids: Vec<Uuid> = session.players.keys().copied().collect();

        let first = session.next_seq();
        let second = session.next_seq();
        session.players[&ids[1]].apply_record(record("q1", 100, 1), first);
        session.players[&ids[0]].apply_record(record("q1", 100, 1), second);

        let standings = session.standings();
        let names: Vec<&str> = standings.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["bob", "ada", "cy"]);
        assert_eq!(standings[2].rank, 3);
    }

    #[test]
    fn zero_scores_fall_back_to_join_order() {
        let session = session_with(&["zed", "amy"]);
        let names: Vec<String> = session.standings().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["zed", "amy"]);
    }

    #[test]
    fn blank_explanation_does_not_count() {
        let mut question = Question {
            id: "q".into(),
            prompt: "?".into(),
            options: vec![
                AnswerOption {
                    text: "a".into(),
                    correct: false,
                },
                AnswerOption {
                    text: "b".into(),
                    correct: true,
                },
            ],
            time_limit_secs: 10,
            points: 100,
            image_url: None,
            explanation: Some(Explanation {
                title: Some("  ".into()),
                text: None,
                image_url: None,
            }),
        };
        assert!(!question.has_explanation());
        assert_eq!(question.correct_option(), Some(1));
        assert_eq!(question.correct_answer(), "b");
        assert!(question.is_correct(Some(1)));
        assert!(!question.is_correct(None));
        assert!(!question.is_correct(Some(7)));

        question.explanation = Some(Explanation {
            title: None,
            text: Some("because".into()),
            image_url: None,
        });
        assert!(question.has_explanation());
    }
}
