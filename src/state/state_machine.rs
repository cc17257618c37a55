use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::state::game::Standing;

/// Phase a room is in. Each variant carries only the data valid for that phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Lobby: players join, nothing is timed.
    Waiting,
    /// A question is open and answers are collected until `deadline`.
    Question(QuestionPhase),
    /// The correct answer and its explanation are shown.
    Explanation(RevealPhase),
    /// Standings are shown between questions.
    Leaderboard(LeaderboardPhase),
    /// The host froze a timed phase; it resumes with the stored remaining time.
    Paused(PausedPhase),
    /// Terminal phase; the room only answers restoration requests with `sessionExpired`.
    Finished(FinishReason),
}

/// Data of an open question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionPhase {
    /// Zero-based index of the question.
    pub index: usize,
    /// Server-side instant after which answers are late.
    pub deadline: Instant,
}

/// Data of the explanation phase following a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealPhase {
    /// Index of the question being explained.
    pub index: usize,
    /// Auto-advance instant, absent when the host advances manually.
    pub deadline: Option<Instant>,
}

/// Data of the leaderboard phase following a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardPhase {
    /// Index of the question that just closed.
    pub index: usize,
    /// Auto-advance instant, absent when the host advances manually.
    pub deadline: Option<Instant>,
    /// Standings computed when the question closed.
    pub standings: Vec<Standing>,
}

/// A frozen phase and the time it had left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PausedPhase {
    /// Phase to go back to on resume.
    pub resume: Box<Phase>,
    /// Time left on the interrupted deadline.
    pub remaining: Duration,
}

/// Why the game reached [`Phase::Finished`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Last question was played.
    Completed,
    /// Host pulled the emergency stop.
    EmergencyStop,
    /// Host ended the game.
    HostEnded,
    /// Room worker failed and the room was torn down.
    Crashed,
}

/// Discriminant of [`Phase`], used in errors and wire payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    Waiting,
    Question,
    Explanation,
    Leaderboard,
    Paused,
    Finished,
}

/// Phase shown once a question closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    /// Show the explanation attached to the question.
    Explanation {
        /// Auto-advance instant, if any.
        deadline: Option<Instant>,
    },
    /// Show the standings.
    Leaderboard {
        /// Auto-advance instant, if any.
        deadline: Option<Instant>,
        /// Standings after scoring the question.
        standings: Vec<Standing>,
    },
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// Host starts the game with the first question.
    Start {
        /// Deadline of the first question.
        deadline: Instant,
    },
    /// The open question stops accepting answers.
    CloseQuestion(Followup),
    /// Move on from the explanation or leaderboard to the next question.
    Advance {
        /// Deadline of the next question; unused when the last question was played.
        deadline: Instant,
    },
    /// Host jumps straight to a given question.
    JumpTo {
        /// Target question index.
        index: usize,
        /// Deadline of the target question.
        deadline: Instant,
    },
    /// Freeze the current timed phase.
    Pause {
        /// Current server time, used to compute the remaining time.
        now: Instant,
    },
    /// Continue a frozen phase.
    Resume {
        /// Current server time, used to derive the new deadline.
        now: Instant,
    },
    /// Stop the game for good.
    Finish(FinishReason),
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Kind of phase the state machine was in when the invalid event was received.
    pub from: PhaseKind,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase kind.
    pub phase: PhaseKind,
    /// Generation number (increments on each transition).
    pub generation: u64,
    /// Question index the phase refers to, if any.
    pub index: Option<usize>,
}

/// Per-room phase machine. Every applied transition bumps the generation so timers
/// scheduled for an earlier phase can recognise they are stale.
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    phase: Phase,
    generation: u64,
    question_count: usize,
}

impl Phase {
    /// Discriminant of this phase.
    pub fn kind(&self) -> PhaseKind {
        match self {
            Phase::Waiting => PhaseKind::Waiting,
            Phase::Question(_) => PhaseKind::Question,
            Phase::Explanation(_) => PhaseKind::Explanation,
            Phase::Leaderboard(_) => PhaseKind::Leaderboard,
            Phase::Paused(_) => PhaseKind::Paused,
            Phase::Finished(_) => PhaseKind::Finished,
        }
    }

    /// Question index the phase refers to. Paused phases report the interrupted one.
    pub fn index(&self) -> Option<usize> {
        match self {
            Phase::Question(q) => Some(q.index),
            Phase::Explanation(r) => Some(r.index),
            Phase::Leaderboard(l) => Some(l.index),
            Phase::Paused(p) => p.resume.index(),
            Phase::Waiting | Phase::Finished(_) => None,
        }
    }

    /// Absolute deadline of the phase, if it is timed and running.
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            Phase::Question(q) => Some(q.deadline),
            Phase::Explanation(r) => r.deadline,
            Phase::Leaderboard(l) => l.deadline,
            Phase::Waiting | Phase::Paused(_) | Phase::Finished(_) => None,
        }
    }

    fn with_deadline(self, deadline: Instant) -> Phase {
        match self {
            Phase::Question(q) => Phase::Question(QuestionPhase { deadline, ..q }),
            Phase::Explanation(r) => Phase::Explanation(RevealPhase {
                deadline: Some(deadline),
                ..r
            }),
            Phase::Leaderboard(l) => Phase::Leaderboard(LeaderboardPhase {
                deadline: Some(deadline),
                ..l
            }),
            other => other,
        }
    }
}

impl GameStateMachine {
    /// Create a machine in [`Phase::Waiting`] for a game of `question_count` questions.
    pub fn new(question_count: usize) -> Self {
        Self {
            phase: Phase::Waiting,
            generation: 0,
            question_count,
        }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Current generation number.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Question index of the current phase, if any.
    pub fn current_index(&self) -> Option<usize> {
        self.phase.index()
    }

    /// Deadline of the running phase, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.phase.deadline()
    }

    /// Server-computed time left in the current phase, clamped at zero.
    ///
    /// Paused phases report the stored remaining time; untimed phases report `None`.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match &self.phase {
            Phase::Paused(paused) => Some(paused.remaining),
            phase => phase
                .deadline()
                .map(|deadline| deadline.saturating_duration_since(now)),
        }
    }

    /// Whether the game reached its terminal phase.
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished(_))
    }

    /// Whether `index` is the last question of the game.
    pub fn is_last(&self, index: usize) -> bool {
        index + 1 >= self.question_count
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase.kind(),
            generation: self.generation,
            index: self.phase.index(),
        }
    }

    /// Apply an event, returning the new phase. The generation is bumped on success only.
    pub fn apply(&mut self, event: GameEvent) -> Result<&Phase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.phase = next;
        self.generation += 1;
        Ok(&self.phase)
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: GameEvent) -> Result<Phase, InvalidTransition> {
        let invalid = |event: GameEvent| InvalidTransition {
            from: self.phase.kind(),
            event,
        };

        let next = match (&self.phase, event) {
            (Phase::Waiting, GameEvent::Start { deadline }) if self.question_count > 0 => {
                Phase::Question(QuestionPhase { index: 0, deadline })
            }
            (Phase::Question(q), GameEvent::CloseQuestion(followup)) => match followup {
                Followup::Explanation { deadline } => Phase::Explanation(RevealPhase {
                    index: q.index,
                    deadline,
                }),
                Followup::Leaderboard {
                    deadline,
                    standings,
                } => Phase::Leaderboard(LeaderboardPhase {
                    index: q.index,
                    deadline,
                    standings,
                }),
            },
            (Phase::Explanation(RevealPhase { index, .. }), GameEvent::Advance { deadline })
            | (
                Phase::Leaderboard(LeaderboardPhase { index, .. }),
                GameEvent::Advance { deadline },
            ) => {
                if self.is_last(*index) {
                    Phase::Finished(FinishReason::Completed)
                } else {
                    Phase::Question(QuestionPhase {
                        index: index + 1,
                        deadline,
                    })
                }
            }
            (
                Phase::Waiting
                | Phase::Question(_)
                | Phase::Explanation(_)
                | Phase::Leaderboard(_)
                | Phase::Paused(_),
                GameEvent::JumpTo { index, deadline },
            ) if index < self.question_count => Phase::Question(QuestionPhase { index, deadline }),
            (
                phase @ (Phase::Question(_) | Phase::Explanation(_) | Phase::Leaderboard(_)),
                GameEvent::Pause { now },
            ) if phase.deadline().is_some() => {
                let remaining = phase
                    .deadline()
                    .map(|deadline| deadline.saturating_duration_since(now))
                    .unwrap_or_default();
                Phase::Paused(PausedPhase {
                    resume: Box::new(phase.clone()),
                    remaining,
                })
            }
            (Phase::Paused(paused), GameEvent::Resume { now }) => {
                (*paused.resume).clone().with_deadline(now + paused.remaining)
            }
            (Phase::Finished(_), event @ GameEvent::Finish(_)) => return Err(invalid(event)),
            (_, GameEvent::Finish(reason)) => Phase::Finished(reason),
            (_, event) => return Err(invalid(event)),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut GameStateMachine, event: GameEvent) -> Phase {
        sm.apply(event).unwrap().clone()
    }

    fn leaderboard(deadline: Option<Instant>) -> GameEvent {
        GameEvent::CloseQuestion(Followup::Leaderboard {
            deadline,
            standings: Vec::new(),
        })
    }

    #[test]
    fn initial_state_is_waiting() {
        let sm = GameStateMachine::new(3);
        assert_eq!(sm.phase(), &Phase::Waiting);
        assert_eq!(sm.generation(), 0);
        assert_eq!(sm.remaining(Instant::now()), None);
    }

    #[test]
    fn full_happy_path_through_game() {
        let now = Instant::now();
        let mut sm = GameStateMachine::new(2);

        assert_eq!(
            apply(&mut sm, GameEvent::Start { deadline: now }),
            Phase::Question(QuestionPhase {
                index: 0,
                deadline: now
            })
        );
        assert_eq!(
            apply(&mut sm, GameEvent::CloseQuestion(Followup::Explanation { deadline: None })),
            Phase::Explanation(RevealPhase {
                index: 0,
                deadline: None
            })
        );
        assert_eq!(
            apply(&mut sm, GameEvent::Advance { deadline: now }).kind(),
            PhaseKind::Question
        );
        assert_eq!(sm.current_index(), Some(1));
        assert_eq!(apply(&mut sm, leaderboard(None)).kind(), PhaseKind::Leaderboard);
        assert_eq!(
            apply(&mut sm, GameEvent::Advance { deadline: now }),
            Phase::Finished(FinishReason::Completed)
        );
        assert_eq!(sm.generation(), 5);
        assert!(sm.is_finished());
    }

    #[test]
    fn invalid_transition_returns_error_and_keeps_generation() {
        let mut sm = GameStateMachine::new(1);
        let err = sm
            .apply(GameEvent::Advance {
                deadline: Instant::now(),
            })
            .unwrap_err();
        assert_eq!(err.from, PhaseKind::Waiting);
        assert!(matches!(err.event, GameEvent::Advance { .. }));
        assert_eq!(sm.generation(), 0);
    }

    #[test]
    fn empty_game_cannot_start() {
        let mut sm = GameStateMachine::new(0);
        assert!(
            sm.apply(GameEvent::Start {
                deadline: Instant::now()
            })
            .is_err()
        );
    }

    #[test]
    fn pause_keeps_remaining_time_and_resume_restores_it() {
        let now = Instant::now();
        let mut sm = GameStateMachine::new(1);
        apply(
            &mut sm,
            GameEvent::Start {
                deadline: now + Duration::from_secs(10),
            },
        );

        let paused_at = now + Duration::from_secs(4);
        apply(&mut sm, GameEvent::Pause { now: paused_at });
        assert_eq!(sm.snapshot().phase, PhaseKind::Paused);
        assert_eq!(sm.current_index(), Some(0));
        assert_eq!(sm.remaining(paused_at + Duration::from_secs(30)), Some(Duration::from_secs(6)));

        let resumed_at = now + Duration::from_secs(60);
        apply(&mut sm, GameEvent::Resume { now: resumed_at });
        assert_eq!(sm.deadline(), Some(resumed_at + Duration::from_secs(6)));
    }

    #[test]
    fn untimed_phases_cannot_be_paused() {
        let now = Instant::now();
        let mut sm = GameStateMachine::new(2);
        apply(&mut sm, GameEvent::Start { deadline: now });
        apply(&mut sm, leaderboard(None));

        let err = sm.apply(GameEvent::Pause { now }).unwrap_err();
        assert_eq!(err.from, PhaseKind::Leaderboard);
        assert!(sm.apply(GameEvent::Resume { now }).is_err());
    }

    #[test]
    fn jump_requires_a_valid_index() {
        let now = Instant::now();
        let mut sm = GameStateMachine::new(3);
        assert!(
            sm.apply(GameEvent::JumpTo {
                index: 3,
                deadline: now
            })
            .is_err()
        );
        apply(
            &mut sm,
            GameEvent::JumpTo {
                index: 2,
                deadline: now,
            },
        );
        assert_eq!(sm.current_index(), Some(2));
        assert!(sm.is_last(2));
    }

    #[test]
    fn remaining_is_clamped_at_zero() {
        let now = Instant::now();
        let mut sm = GameStateMachine::new(1);
        apply(&mut sm, GameEvent::Start { deadline: now });
        assert_eq!(sm.remaining(now + Duration::from_secs(5)), Some(Duration::ZERO));
    }

    #[test]
    fn finished_is_terminal() {
        let mut sm = GameStateMachine::new(1);
        apply(&mut sm, GameEvent::Finish(FinishReason::HostEnded));
        assert!(sm.apply(GameEvent::Finish(FinishReason::EmergencyStop)).is_err());
        assert!(
            sm.apply(GameEvent::Start {
                deadline: Instant::now()
            })
            .is_err()
        );
        assert_eq!(sm.phase(), &Phase::Finished(FinishReason::HostEnded));
    }
}
