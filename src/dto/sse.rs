use serde::Serialize;
use utoipa::ToSchema;

use crate::dto::{phase::VisibleGamePhase, ws::ServerMessage};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }

    /// Re-emit a room broadcast for spectators, keeping the websocket event name.
    pub fn from_message(message: &ServerMessage) -> serde_json::Result<Self> {
        let mut envelope = serde_json::to_value(message)?;
        let data = envelope
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or_default();
        Self::json(message.event_name().to_string(), &data)
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Initial metadata sent to an SSE spectator when it connects.
pub struct Handshake {
    /// Room being watched.
    pub game_code: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Phase of the room at subscription time.
    pub phase: VisibleGamePhase,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::ws::PlayerCountPayload;

    #[test]
    fn spectator_event_strips_the_envelope() {
        let event =
            ServerEvent::from_message(&ServerMessage::PlayerCount(PlayerCountPayload { count: 3 }))
                .unwrap();
        assert_eq!(event.event.as_deref(), Some("playerCount"));
        assert_eq!(event.data, r#"{"count":3}"#);
    }
}
