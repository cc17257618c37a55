//! Client side of the realtime protocol: a reconnecting connection manager with session
//! restoration, usable by host and player front-ends written in Rust.

/// Reconnect policy and doubling backoff.
pub mod backoff;
/// Connection actor and its handle.
pub mod connection;
/// Persisted session identity.
pub mod identity;
/// Link abstraction and the WebSocket connector.
pub mod transport;

use thiserror::Error;

pub use backoff::{Backoff, ReconnectPolicy};
pub use connection::{ConnectionManager, ConnectionStatus, Subscription, SubscriptionId};
pub use identity::{IdentityError, IdentityStore, SessionIdentity};
pub use transport::{Connector, Transport, TransportError, TransportEvent, WsConnector};

/// Errors surfaced by [`ConnectionManager`] calls.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection manager is not running")]
    NotRunning,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("cannot encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
