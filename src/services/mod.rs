/// OpenAPI documentation generation.
pub mod documentation;
/// Game bootstrap and room lookup.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Periodic inactivity check over the room registry.
pub mod room_sweeper;
/// Spectator Server-Sent Events streams.
pub mod sse_service;
/// WebSocket connection and message handling service.
pub mod websocket_service;
