use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    state::{AppState, SharedState, room::RoomCommand},
    timer::{TimerError, TimerHandle, TimerScope},
};

/// Register the periodic idle-room sweep on the shared timer service.
///
/// The interval only holds a weak reference to the state, so it never keeps the application
/// alive on its own.
pub fn start(state: &SharedState) -> Result<TimerHandle, TimerError> {
    let weak = Arc::downgrade(state);
    let period = state.config().sweep_interval();
    let handle = state.timers().schedule_interval(
        move || {
            if let Some(state) = weak.upgrade() {
                sweep(&state);
            }
        },
        period,
        "idle-room-sweep",
        TimerScope::Service,
    )?;
    info!(period_secs = period.as_secs(), "idle room sweep started");
    Ok(handle)
}

/// Ask every room to check its own inactivity and drop registry entries whose worker is gone.
///
/// Returns the number of entries removed.
pub fn sweep(state: &AppState) -> usize {
    let stale: Vec<_> = state
        .rooms()
        .iter()
        .filter_map(|entry| {
            let room = entry.value();
            match room.send(RoomCommand::IdleCheck) {
                Ok(()) => None,
                Err(_) => Some((room.code.clone(), room.game_id)),
            }
        })
        .collect();

    let removed = stale
        .into_iter()
        .filter(|(code, game_id)| state.remove_room(code, *game_id))
        .count();
    debug!(rooms = state.rooms().len(), removed, "idle room sweep");
    removed
}
