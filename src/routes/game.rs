use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::game::{CreateGameRequest, GameCreatedPayload, GameSummary, QuestionSetSummary},
    error::AppError,
    services::game_service,
    state::SharedState,
};

/// Routes handling game bootstrap and lookup.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/games", post(create_game))
        .route("/games/{code}", get(get_game))
        .route("/question-sets", get(list_question_sets))
}

/// Open a room without a host socket; the host claims it through host restoration.
#[utoipa::path(
    post,
    path = "/games",
    tag = "game",
    request_body = CreateGameRequest,
    responses(
        (status = 200, description = "Game created", body = GameCreatedPayload),
        (status = 400, description = "Invalid settings or empty question set"),
        (status = 404, description = "Unknown question set")
    )
)]
pub async fn create_game(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateGameRequest>>,
) -> Result<Json<GameCreatedPayload>, AppError> {
    let created = game_service::create_game(&state, payload, None).await?;
    Ok(Json(created))
}

/// Public summary of a live room.
#[utoipa::path(
    get,
    path = "/games/{code}",
    tag = "game",
    params(("code" = String, Path, description = "Six-digit room code")),
    responses(
        (status = 200, description = "Room summary", body = GameSummary),
        (status = 404, description = "No room uses this code")
    )
)]
pub async fn get_game(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<GameSummary>, AppError> {
    let summary = game_service::describe_game(&state, &code).await?;
    Ok(Json(summary))
}

/// Question sets hosts can start a game from.
#[utoipa::path(
    get,
    path = "/question-sets",
    tag = "game",
    responses((status = 200, description = "Available question sets", body = [QuestionSetSummary]))
)]
pub async fn list_question_sets(
    State(state): State<SharedState>,
) -> Result<Json<Vec<QuestionSetSummary>>, AppError> {
    Ok(Json(game_service::list_question_sets(&state).await?))
}
