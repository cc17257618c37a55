use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/games/{code}/events",
    tag = "sse",
    params(("code" = String, Path, description = "Six-digit room code")),
    responses(
        (status = 200, description = "Spectator SSE stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "No room uses this code")
    )
)]
/// Stream every room-wide event of a game to a spectator screen.
pub async fn room_stream(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (receiver, handshake) = sse_service::subscribe_room(&state, &code).await?;
    info!(room = %code, "new spectator SSE connection");
    Ok(sse_service::to_sse_stream(receiver, handshake, code))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/games/{code}/events", get(room_stream))
}
