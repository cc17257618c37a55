//! Client-side connection actor.
//!
//! One task owns the link, the outbound queue, the subscriptions and the cached identity.
//! Callers talk to it through [`ConnectionManager`]; reconnect waits are scheduled on the shared
//! [`TimerService`] under the connection's own scope, so dropping the manager cancels them.

use std::{collections::VecDeque, fmt, sync::Arc};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    client::{
        ClientError,
        backoff::{Backoff, ReconnectPolicy},
        identity::{IdentityStore, SessionIdentity},
        transport::{Connector, Transport, TransportError, TransportEvent},
    },
    dto::ws::Envelope,
    timer::{ScopeGuard, TimerHandle, TimerScope, TimerService},
};

/// Event the server sends when a session cannot be restored.
const SESSION_EXPIRED: &str = "sessionExpired";

/// Link state as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Automatic retries are exhausted; only a manual `connect` starts over.
    Failed,
}

/// Identifier returned by [`ConnectionManager::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Stream of one server event.
///
/// The receiver ends when the subscription is removed, or on the next disconnect for
/// subscriptions that are not persistent.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::UnboundedReceiver<Envelope>,
}

struct Listener {
    id: SubscriptionId,
    event: String,
    persistent: bool,
    sender: mpsc::UnboundedSender<Envelope>,
}

enum Command {
    Connect,
    Disconnect,
    Emit(String),
    Subscribe {
        event: String,
        persistent: bool,
        reply: oneshot::Sender<Subscription>,
    },
    Unsubscribe(SubscriptionId),
    SetIdentity(Option<SessionIdentity>),
    Identity(oneshot::Sender<Option<SessionIdentity>>),
    /// Backoff wait of connection attempt `attempt` elapsed.
    RetryDue {
        attempt: u64,
    },
    /// Outcome of connection attempt `attempt`.
    Established {
        attempt: u64,
        result: Result<Transport, TransportError>,
    },
}

/// Handle to a running connection actor. Cheap to clone; the actor stops once every handle is
/// dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionManager {
    /// Start the actor. A saved identity in `identity_store` is picked up right away.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        timers: Arc<TimerService>,
        policy: ReconnectPolicy,
        identity_store: Option<IdentityStore>,
    ) -> Self {
        let id = Uuid::new_v4();
        let (commands, receiver) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::Disconnected);

        let identity = identity_store.as_ref().and_then(|store| match store.load() {
            Ok(identity) => identity,
            Err(err) => {
                warn!(path = %store.path().display(), error = %err, "ignoring unreadable session identity");
                None
            }
        });

        let actor = ConnectionActor {
            connector,
            timers,
            scope: TimerScope::Connection(id),
            commands: commands.downgrade(),
            status: status_tx,
            queue_limit: policy.outbound_queue_limit,
            backoff: Backoff::new(policy),
            link: None,
            attempt: 0,
            retry_timer: None,
            queue: VecDeque::new(),
            listeners: Vec::new(),
            next_listener: 0,
            identity,
            identity_store,
        };
        tokio::spawn(actor.run(receiver));

        Self {
            id,
            commands,
            status,
        }
    }

    /// Identifier used as the timer scope of this connection.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Open the link. Also restarts a manager that gave up ([`ConnectionStatus::Failed`]).
    pub fn connect(&self) -> Result<(), ClientError> {
        self.send(Command::Connect)
    }

    /// Close the link and cancel any pending retry.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.send(Command::Disconnect)
    }

    /// Send `event` now, or queue it until the next successful connection.
    pub fn emit<T: Serialize>(&self, event: &str, payload: &T) -> Result<(), ClientError> {
        let frame = serde_json::to_string(&Envelope::new(event, serde_json::to_value(payload)?))?;
        self.send(Command::Emit(frame))
    }

    /// Subscribe to `event`. Persistent subscriptions survive reconnection.
    pub async fn on(&self, event: &str, persistent: bool) -> Result<Subscription, ClientError> {
        let (reply, receiver) = oneshot::channel();
        self.send(Command::Subscribe {
            event: event.to_string(),
            persistent,
            reply,
        })?;
        receiver.await.map_err(|_| ClientError::NotRunning)
    }

    /// Remove a subscription; its receiver ends.
    pub fn off(&self, id: SubscriptionId) -> Result<(), ClientError> {
        self.send(Command::Unsubscribe(id))
    }

    /// Replace the identity sent as restoration request on every connection.
    pub fn set_identity(&self, identity: Option<SessionIdentity>) -> Result<(), ClientError> {
        self.send(Command::SetIdentity(identity))
    }

    /// Identity currently cached by the actor.
    pub async fn identity(&self) -> Result<Option<SessionIdentity>, ClientError> {
        let (reply, receiver) = oneshot::channel();
        self.send(Command::Identity(reply))?;
        receiver.await.map_err(|_| ClientError::NotRunning)
    }

    /// Whether the link is currently open.
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Current link state.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch link state changes.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::NotRunning)
    }
}

enum Step {
    Command(Option<Command>),
    Inbound(Option<TransportEvent>),
}

struct ConnectionActor {
    connector: Arc<dyn Connector>,
    timers: Arc<TimerService>,
    scope: TimerScope,
    commands: mpsc::WeakUnboundedSender<Command>,
    status: watch::Sender<ConnectionStatus>,
    queue_limit: usize,
    backoff: Backoff,
    link: Option<Transport>,
    /// Generation of connection attempts; stale outcomes and retry timers are ignored.
    attempt: u64,
    retry_timer: Option<TimerHandle>,
    queue: VecDeque<String>,
    listeners: Vec<Listener>,
    next_listener: u64,
    identity: Option<SessionIdentity>,
    identity_store: Option<IdentityStore>,
}

impl ConnectionActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let _timers = ScopeGuard::new(Arc::clone(&self.timers), self.scope.clone());

        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                event = next_inbound(&mut self.link) => Step::Inbound(event),
            };
            match step {
                Step::Command(Some(command)) => self.handle(command),
                Step::Command(None) => break,
                Step::Inbound(Some(event)) => self.inbound(event),
                Step::Inbound(None) => self.inbound(TransportEvent::Closed { by_server: false }),
            }
        }

        debug!(scope = %self.scope, "connection actor stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect => {
                if matches!(
                    self.current(),
                    ConnectionStatus::Connected | ConnectionStatus::Connecting
                ) {
                    return;
                }
                self.cancel_retry();
                self.backoff.reset();
                self.begin_connect();
            }
            Command::Disconnect => {
                self.cancel_retry();
                // invalidates an attempt still in flight
                self.attempt += 1;
                if self.link.take().is_some() {
                    info!(scope = %self.scope, "disconnected by client");
                }
                self.drop_transient_listeners();
                self.set_status(ConnectionStatus::Disconnected);
            }
            Command::Emit(frame) => self.emit(frame),
            Command::Subscribe {
                event,
                persistent,
                reply,
            } => {
                self.next_listener += 1;
                let id = SubscriptionId(self.next_listener);
                let (sender, receiver) = mpsc::unbounded_channel();
                self.listeners.push(Listener {
                    id,
                    event,
                    persistent,
                    sender,
                });
                let _ = reply.send(Subscription { id, receiver });
            }
            Command::Unsubscribe(id) => self.listeners.retain(|listener| listener.id != id),
            Command::SetIdentity(identity) => self.store_identity(identity),
            Command::Identity(reply) => {
                let _ = reply.send(self.identity.clone());
            }
            Command::RetryDue { attempt } => {
                if attempt != self.attempt || self.link.is_some() {
                    return;
                }
                self.retry_timer = None;
                self.begin_connect();
            }
            Command::Established { attempt, result } => {
                if attempt != self.attempt {
                    debug!(scope = %self.scope, attempt, "dropping outcome of abandoned attempt");
                    return;
                }
                match result {
                    Ok(transport) => self.on_connected(transport),
                    Err(err) => {
                        warn!(scope = %self.scope, attempt = self.backoff.attempts(), error = %err, "connection attempt failed");
                        self.schedule_retry();
                    }
                }
            }
        }
    }

    fn inbound(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(frame) => {
                let envelope = match serde_json::from_str::<Envelope>(&frame) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        warn!(scope = %self.scope, error = %err, "dropping malformed server frame");
                        return;
                    }
                };
                if envelope.event == SESSION_EXPIRED {
                    info!(scope = %self.scope, "server expired the session");
                    self.store_identity(None);
                }
                self.listeners.retain(|listener| {
                    listener.event != envelope.event || listener.sender.send(envelope.clone()).is_ok()
                });
            }
            TransportEvent::Closed { by_server } => {
                self.link = None;
                self.drop_transient_listeners();
                if by_server {
                    info!(scope = %self.scope, "server closed the connection");
                    self.set_status(ConnectionStatus::Disconnected);
                } else {
                    warn!(scope = %self.scope, "connection lost");
                    self.schedule_retry();
                }
            }
        }
    }

    fn begin_connect(&mut self) {
        self.attempt += 1;
        self.link = None;
        self.set_status(ConnectionStatus::Connecting);

        let attempt = self.attempt;
        let connecting = self.connector.connect();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = connecting.await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Established { attempt, result });
            }
        });
    }

    fn on_connected(&mut self, transport: Transport) {
        self.backoff.reset();
        info!(scope = %self.scope, "connected");

        // restoration goes out before anything queued while offline
        let mut open = true;
        if let Some(identity) = &self.identity {
            match serde_json::to_string(&identity.restoration_message()) {
                Ok(frame) => {
                    if transport.send(frame).is_err() {
                        // identity stays cached and is sent again on the next link
                        debug!(scope = %self.scope, "link closed before restoration");
                        open = false;
                    }
                }
                Err(err) => warn!(scope = %self.scope, error = %err, "cannot encode restoration request"),
            }
        }
        let mut flushed = 0;
        while open {
            let Some(frame) = self.queue.pop_front() else {
                break;
            };
            if let Err(unsent) = transport.outbound.send(frame) {
                debug!(scope = %self.scope, "link closed while flushing");
                self.queue.push_front(unsent.0);
                open = false;
            } else {
                flushed += 1;
            }
        }
        if flushed > 0 {
            debug!(scope = %self.scope, flushed, "flushed queued messages");
        }

        self.link = Some(transport);
        self.set_status(ConnectionStatus::Connected);
    }

    fn emit(&mut self, frame: String) {
        let frame = match &self.link {
            Some(link) if self.current() == ConnectionStatus::Connected => {
                match link.outbound.send(frame) {
                    Ok(()) => return,
                    Err(unsent) => {
                        // the close event follows on the inbound side; keep the frame for the next link
                        debug!(scope = %self.scope, "link closed under an outgoing frame; queued");
                        unsent.0
                    }
                }
            }
            _ => frame,
        };
        self.enqueue(frame);
    }

    fn enqueue(&mut self, frame: String) {
        if self.queue_limit == 0 {
            warn!(scope = %self.scope, "outbound queue disabled; dropping message");
            return;
        }
        while self.queue.len() >= self.queue_limit {
            self.queue.pop_front();
            warn!(scope = %self.scope, limit = self.queue_limit, "outbound queue full; dropped oldest message");
        }
        self.queue.push_back(frame);
    }

    fn schedule_retry(&mut self) {
        self.link = None;
        let Some(delay) = self.backoff.next_delay() else {
            warn!(scope = %self.scope, attempts = self.backoff.attempts(), "giving up reconnecting");
            self.set_status(ConnectionStatus::Failed);
            return;
        };
        self.set_status(ConnectionStatus::Disconnected);

        let attempt = self.attempt;
        let commands = self.commands.clone();
        match self.timers.schedule(
            move || {
                if let Some(commands) = commands.upgrade() {
                    let _ = commands.send(Command::RetryDue { attempt });
                }
            },
            delay,
            "reconnect-backoff",
            self.scope.clone(),
        ) {
            Ok(handle) => {
                debug!(scope = %self.scope, delay_ms = delay.as_millis() as u64, retry = self.backoff.attempts(), "reconnect scheduled");
                self.retry_timer = Some(handle);
            }
            Err(err) => {
                warn!(scope = %self.scope, error = %err, "cannot schedule reconnect");
                self.set_status(ConnectionStatus::Failed);
            }
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(handle) = self.retry_timer.take() {
            self.timers.cancel(handle);
        }
    }

    fn drop_transient_listeners(&mut self) {
        self.listeners.retain(|listener| listener.persistent);
    }

    fn store_identity(&mut self, identity: Option<SessionIdentity>) {
        if let Some(store) = &self.identity_store {
            let saved = match &identity {
                Some(identity) => store.save(identity),
                None => store.clear(),
            };
            if let Err(err) = saved {
                warn!(path = %store.path().display(), error = %err, "cannot persist session identity");
            }
        }
        self.identity = identity;
    }

    fn current(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }
}

async fn next_inbound(link: &mut Option<Transport>) -> Option<TransportEvent> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}
