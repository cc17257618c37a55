use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Live Quiz Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::game::create_game,
        crate::routes::game::get_game,
        crate::routes::game::list_question_sets,
        crate::routes::sse::room_stream,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::game::CreateGameRequest,
            crate::dto::game::GameSettingsInput,
            crate::dto::game::GameCreatedPayload,
            crate::dto::game::GameSummary,
            crate::dto::game::QuestionSetSummary,
            crate::dto::game::JoinGameRequest,
            crate::dto::game::JoinedGamePayload,
            crate::dto::game::AnswerRequest,
            crate::dto::game::GameCodeRequest,
            crate::dto::game::JumpRequest,
            crate::dto::game::KickRequest,
            crate::dto::question::QuestionPayload,
            crate::dto::question::AnswerResultPayload,
            crate::dto::question::ShowExplanationPayload,
            crate::dto::question::ShowLeaderboardPayload,
            crate::dto::question::GameOverPayload,
            crate::dto::restore::RestorationRequest,
            crate::dto::restore::SessionRestoredPayload,
            crate::dto::restore::HostRestoredPayload,
            crate::dto::restore::SessionExpiredPayload,
            crate::dto::ws::ErrorPayload,
            crate::dto::sse::Handshake,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "game", description = "Game bootstrap and lookup"),
        (name = "sse", description = "Spectator server-sent events streams"),
        (name = "websocket", description = "Realtime host and player events"),
    )
)]
pub struct ApiDoc;
