pub mod game;
pub mod restore;
pub mod room;
mod sse;
pub mod state_machine;

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use uuid::Uuid;

use crate::{config::AppConfig, dao::question_store::QuestionStore, timer::TimerService};

pub use self::room::RoomHandle;
pub use self::sse::SseHub;
pub use self::state_machine::{InvalidTransition, Snapshot};

pub type SharedState = Arc<AppState>;
/// Upper bound on request/reply exchanges with a room worker.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Central application state: configuration, the timer service, the question source and the
/// registry of live rooms keyed by room code.
pub struct AppState {
    config: Arc<AppConfig>,
    timers: Arc<TimerService>,
    question_store: Arc<dyn QuestionStore>,
    rooms: DashMap<String, RoomHandle>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(
        config: AppConfig,
        timers: Arc<TimerService>,
        question_store: Arc<dyn QuestionStore>,
    ) -> SharedState {
        Arc::new(Self {
            config: Arc::new(config),
            timers,
            question_store,
            rooms: DashMap::new(),
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    /// Process-wide timer service.
    pub fn timers(&self) -> &Arc<TimerService> {
        &self.timers
    }

    /// Source of question sets.
    pub fn question_store(&self) -> Arc<dyn QuestionStore> {
        Arc::clone(&self.question_store)
    }

    /// Registry of live rooms keyed by their code.
    pub fn rooms(&self) -> &DashMap<String, RoomHandle> {
        &self.rooms
    }

    /// Handle of the room using `code`, if any.
    pub fn room(&self, code: &str) -> Option<RoomHandle> {
        self.rooms.get(code).map(|entry| entry.value().clone())
    }

    /// Remove the registry entry for `code` if it still belongs to `game_id`.
    pub fn remove_room(&self, code: &str, game_id: Uuid) -> bool {
        self.rooms
            .remove_if(code, |_, handle| handle.game_id == game_id)
            .is_some()
    }
}
