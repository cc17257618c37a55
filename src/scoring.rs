//! Pure scoring rules: base points, streak bonus and time bonus.

use thiserror::Error;

use crate::state::game::{GameSettings, Player, Question, ScoreRecord};

/// Bonus rules enabled for a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringOptions {
    /// Award `floor(base × min(log2(streak + 1) / 4, 0.6))`.
    pub streak_bonus: bool,
    /// Award one percent of the base points per second saved, capped at half the base.
    pub time_bonus: bool,
}

impl From<&GameSettings> for ScoringOptions {
    fn from(settings: &GameSettings) -> Self {
        Self {
            streak_bonus: settings.streak_bonus,
            time_bonus: settings.time_bonus,
        }
    }
}

/// Components of a score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreBreakdown {
    pub base_points: u32,
    pub streak_bonus: u32,
    pub time_bonus: u32,
}

/// Result of [`score`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Score {
    pub total: u32,
    pub breakdown: ScoreBreakdown,
}

/// Result of [`record_answer`], ready to be appended to the player's ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub points: u32,
    pub breakdown: ScoreBreakdown,
    pub new_streak: u32,
}

impl AnswerOutcome {
    /// Ledger entry for `question_id`.
    pub fn into_record(self, question_id: String) -> ScoreRecord {
        ScoreRecord {
            question_id,
            correct: self.correct,
            base_points: self.breakdown.base_points,
            streak_bonus: self.breakdown.streak_bonus,
            time_bonus: self.breakdown.time_bonus,
            total: self.points,
            new_streak: self.new_streak,
        }
    }
}

/// Errors raised for inputs outside the scoring domain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoringError {
    /// An argument is out of range or not finite.
    #[error("invalid scoring parameters: {0}")]
    InvalidParameters(&'static str),
}

/// Score one correct answer.
///
/// Times are in seconds. An answer taken after `time_limit` scores nothing.
pub fn score(
    base_points: u32,
    streak: u32,
    time_taken: f64,
    time_limit: f64,
    options: ScoringOptions,
) -> Result<Score, ScoringError> {
    if base_points == 0 {
        return Err(ScoringError::InvalidParameters("base points must be positive"));
    }
    if !time_taken.is_finite() || time_taken < 0.0 {
        return Err(ScoringError::InvalidParameters(
            "time taken must be a non-negative number",
        ));
    }
    if !time_limit.is_finite() || time_limit <= 0.0 {
        return Err(ScoringError::InvalidParameters("time limit must be positive"));
    }

    if time_taken > time_limit {
        return Ok(Score::default());
    }

    let base = f64::from(base_points);
    let wide_base = u64::from(base_points);
    let streak_bonus = if options.streak_bonus {
        let raw = (base * (f64::from(streak) + 1.0).log2() / 4.0).floor();
        (raw as u64).min(wide_base * 3 / 5)
    } else {
        0
    };
    let time_bonus = if options.time_bonus {
        let saved = (time_limit - time_taken).max(0.0);
        let raw = (saved * base / 100.0).floor();
        (raw as u64).min(wide_base / 2)
    } else {
        0
    };

    // bonuses are bounded by the base, so only the sum can leave u32
    let narrow = |value: u64| {
        u32::try_from(value)
            .map_err(|_| ScoringError::InvalidParameters("base points too large to score"))
    };
    Ok(Score {
        total: narrow(wide_base + streak_bonus + time_bonus)?,
        breakdown: ScoreBreakdown {
            base_points,
            streak_bonus: narrow(streak_bonus)?,
            time_bonus: narrow(time_bonus)?,
        },
    })
}

/// Score a player's answer to `question`, using the streak they had before answering.
pub fn record_answer(
    question: &Question,
    settings: &GameSettings,
    player: &Player,
    time_taken: f64,
    is_correct: bool,
) -> Result<AnswerOutcome, ScoringError> {
    let time_limit = f64::from(question.time_limit_secs);
    // a late answer counts as not submitted, which also breaks the streak
    if !is_correct || time_taken > time_limit {
        return Ok(AnswerOutcome {
            correct: false,
            points: 0,
            breakdown: ScoreBreakdown::default(),
            new_streak: 0,
        });
    }

    let scored = score(
        question.points,
        player.streak,
        time_taken,
        time_limit,
        ScoringOptions::from(settings),
    )?;
    Ok(AnswerOutcome {
        correct: true,
        points: scored.total,
        breakdown: scored.breakdown,
        new_streak: player.streak + 1,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::state::game::AnswerOption;

    const ALL: ScoringOptions = ScoringOptions {
        streak_bonus: true,
        time_bonus: true,
    };
    const TIME_ONLY: ScoringOptions = ScoringOptions {
        streak_bonus: false,
        time_bonus: true,
    };

    #[test]
    fn time_bonus_rewards_seconds_saved() {
        let scored = score(200, 0, 3.0, 10.0, TIME_ONLY).unwrap();
        assert_eq!(scored.breakdown.time_bonus, 14);
        assert_eq!(scored.total, 214);
    }

    #[test]
    fn time_bonus_is_capped_at_half_the_base() {
        assert_eq!(score(100, 0, 0.0, 30.0, TIME_ONLY).unwrap().total, 130);
        assert_eq!(score(100, 0, 0.0, 100.0, TIME_ONLY).unwrap().total, 150);
    }

    #[test]
    fn streak_bonus_grows_then_caps() {
        assert_eq!(score(200, 0, 3.0, 10.0, ALL).unwrap().breakdown.streak_bonus, 0);
        assert_eq!(score(100, 3, 10.0, 10.0, ALL).unwrap().breakdown.streak_bonus, 50);

        let mut previous = 0;
        for streak in 0..200 {
            let bonus = score(100, streak, 10.0, 10.0, ALL).unwrap().breakdown.streak_bonus;
            assert!(bonus <= 60, "streak {streak} gave {bonus}");
            assert!(bonus >= previous);
            previous = bonus;
        }
        assert_eq!(previous, 60);
    }

    #[test]
    fn late_answer_scores_nothing() {
        let scored = score(100, 9, 10.5, 10.0, ALL).unwrap();
        assert_eq!(scored, Score::default());
    }

    #[test]
    fn large_bases_score_without_overflow() {
        let scored = score(2_000_000_000, 1, 0.0, 10.0, ALL).unwrap();
        assert_eq!(scored.breakdown.streak_bonus, 500_000_000);
        assert_eq!(scored.breakdown.time_bonus, 200_000_000);
        assert_eq!(scored.total, 2_700_000_000);

        assert_eq!(
            score(u32::MAX, 3, 0.0, 100.0, ALL),
            Err(ScoringError::InvalidParameters("base points too large to score"))
        );
    }

    #[test]
    fn disabled_bonuses_leave_base_points() {
        let none = ScoringOptions {
            streak_bonus: false,
            time_bonus: false,
        };
        assert_eq!(score(100, 5, 1.0, 10.0, none).unwrap().total, 100);
    }

    #[test]
    fn out_of_range_inputs_are_rejected() {
        assert!(score(0, 0, 1.0, 10.0, ALL).is_err());
        assert!(score(100, 0, -1.0, 10.0, ALL).is_err());
        assert!(score(100, 0, f64::NAN, 10.0, ALL).is_err());
        assert!(score(100, 0, 1.0, 0.0, ALL).is_err());
    }

    #[test]
    fn scoring_is_deterministic() {
        let first = score(150, 4, 2.25, 20.0, ALL).unwrap();
        for _ in 0..10 {
            assert_eq!(score(150, 4, 2.25, 20.0, ALL).unwrap(), first);
        }
    }

    #[test]
    fn record_answer_uses_pre_increment_streak() {
        let question = Question {
            id: "q1".into(),
            prompt: "?".into(),
            options: vec![AnswerOption {
                text: "yes".into(),
                correct: true,
            }],
            time_limit_secs: 10,
            points: 100,
            image_url: None,
            explanation: None,
        };
        let settings = GameSettings {
            streak_bonus: true,
            time_bonus: true,
            early_advance: true,
            auto_advance: true,
            explanation_time: Duration::from_secs(5),
            leaderboard_time: Duration::from_secs(5),
        };
        let mut player = Player::new("ada".into(), None, Uuid::new_v4(), 1);
        player.streak = 3;

        let outcome = record_answer(&question, &settings, &player, 2.0, true).unwrap();
        assert_eq!(outcome.breakdown.streak_bonus, 50);
        assert_eq!(outcome.breakdown.time_bonus, 8);
        assert_eq!(outcome.points, 158);
        assert_eq!(outcome.new_streak, 4);

        let miss = record_answer(&question, &settings, &player, 2.0, false).unwrap();
        assert_eq!(miss.points, 0);
        assert_eq!(miss.new_streak, 0);

        let late = record_answer(&question, &settings, &player, 50.0, true).unwrap();
        assert!(!late.correct);
        assert_eq!(late.points, 0);
        assert_eq!(late.new_streak, 0);
    }
}
