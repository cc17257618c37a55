use tracing::warn;

use crate::{
    dto::{health::HealthResponse, millis},
    state::{DEFAULT_QUERY_TIMEOUT, SharedState},
};

/// Report live rooms and timers, flagging the service as degraded when the question source
/// does not answer.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let rooms = state.rooms().len();
    let stats = state.timers().stats();
    let oldest = stats.oldest_age.map(millis);

    let store = state.question_store();
    let healthy = match tokio::time::timeout(DEFAULT_QUERY_TIMEOUT, store.health_check()).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(error = %err, "question store health check failed");
            false
        }
        Err(_) => {
            warn!("question store health check timed out");
            false
        }
    };

    if healthy {
        HealthResponse::ok(rooms, stats.total(), oldest)
    } else {
        HealthResponse::degraded(rooms, stats.total(), oldest)
    }
}
