//! Per-room worker driving the question flow.
//!
//! Each room runs one task that owns its [`GameSession`] and processes [`RoomCommand`]s one at a
//! time: client events, host overrides, restoration requests and timer firings all go through the
//! same queue, so the session is never shared. Phase deadlines are scheduled on the
//! [`TimerService`] and carry the generation they were armed for; a firing whose generation no
//! longer matches the state machine is dropped.

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dto::{
        game::{
            AnswerRequest, GameSummary, JoinGameRequest, JoinedGamePayload, PlayerSummary,
            standing_entries,
        },
        millis,
        question::{
            AnswerCountPayload, AnswerResultPayload, AnswerStats, ExplanationPayload,
            GameOverPayload, QuestionPayload, ShowExplanationPayload, ShowLeaderboardPayload,
        },
        restore::{HostRestoredPayload, RestoreIdentity, SessionRestoredPayload},
        sse::ServerEvent,
        ws::{KickedPayload, PlayerCountPayload, ServerMessage, TimeRemainingPayload},
    },
    error::{RoomRejection, ServiceError},
    scoring,
    state::{
        DEFAULT_QUERY_TIMEOUT, SharedState, SseHub,
        game::{ConnectionId, GameSession, Player, PlayerStatus, Question, SubmittedAnswer},
        state_machine::{FinishReason, Followup, GameEvent, Phase, PhaseKind},
    },
    timer::{ScopeGuard, TimerHandle, TimerScope, TimerService},
};

/// Channel feeding a socket writer task.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

const SPECTATOR_CAPACITY: usize = 64;

/// Role of a socket inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Player(Uuid),
}

struct Member {
    role: Role,
    sender: ClientSender,
}

/// Sockets attached to a room. Shared with the supervisor so clients can be told when the
/// worker dies.
#[derive(Default)]
pub struct Audience {
    members: DashMap<ConnectionId, Member>,
}

impl Audience {
    /// Attach or re-attach `connection`, replacing any previous role it had.
    pub fn attach(&self, connection: ConnectionId, role: Role, sender: ClientSender) {
        self.members.insert(connection, Member { role, sender });
    }

    /// Detach `connection`, returning the role it had.
    pub fn detach(&self, connection: ConnectionId) -> Option<Role> {
        self.members
            .remove(&connection)
            .map(|(_, member)| member.role)
    }

    /// Role of `connection`, if attached.
    pub fn role(&self, connection: ConnectionId) -> Option<Role> {
        self.members.get(&connection).map(|member| member.role)
    }

    /// Number of attached sockets.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether no socket is attached.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Send to one socket. Closed sockets are ignored; their disconnect is reported separately.
    pub fn send_to(&self, connection: ConnectionId, message: ServerMessage) {
        if let Some(member) = self.members.get(&connection) {
            if member.sender.send(message).is_err() {
                debug!(%connection, "dropping message for closed socket");
            }
        }
    }

    /// Send to every socket attached as host.
    pub fn send_to_host(&self, message: ServerMessage) {
        for member in self.members.iter().filter(|m| m.role == Role::Host) {
            let _ = member.sender.send(message.clone());
        }
    }

    /// Send to every attached socket.
    pub fn broadcast(&self, message: &ServerMessage) {
        for member in self.members.iter() {
            let _ = member.sender.send(message.clone());
        }
    }

    /// Tell every socket the session is gone and detach them all.
    pub fn expire_all(&self, reason: &str) {
        let message = ServerMessage::expired(reason);
        self.broadcast(&message);
        self.members.clear();
    }
}

/// Host-only commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    Start,
    Next,
    Skip,
    Pause,
    Resume,
    JumpTo(usize),
    EmergencyStop,
    End,
    Kick(Uuid),
}

/// Which restoration event the client sent; decides the reply event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreKind {
    /// `requestSessionRestoration`, answered with `gameSessionRestored`.
    Session,
    /// `requestPlayerRestoration`, answered with `playerSessionRestored`.
    Player,
    /// `requestHostRestoration`, answered with `hostRestored`.
    Host,
}

/// Inbound queue item of a room worker.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        connection: ConnectionId,
        sender: ClientSender,
        request: JoinGameRequest,
    },
    Answer {
        connection: ConnectionId,
        request: AnswerRequest,
    },
    Host {
        connection: ConnectionId,
        command: HostCommand,
    },
    Restore {
        connection: ConnectionId,
        sender: ClientSender,
        kind: RestoreKind,
        identity: RestoreIdentity,
    },
    Leave {
        connection: ConnectionId,
    },
    /// The socket went away without leaving.
    Disconnected {
        connection: ConnectionId,
    },
    /// Phase deadline reached for the phase armed at `generation`.
    PhaseTimeout {
        generation: u64,
    },
    /// A dropped player did not come back in time.
    ReconnectGraceExpired {
        player_id: Uuid,
    },
    /// A finished room reached the end of its retention.
    FinishedTtlExpired,
    /// Periodic inactivity check.
    IdleCheck,
    /// Request a public summary.
    Describe {
        reply: oneshot::Sender<GameSummary>,
    },
}

/// Cloneable handle to a running room.
#[derive(Clone)]
pub struct RoomHandle {
    /// Six-digit room code.
    pub code: String,
    /// Identifier of the game the worker owns.
    pub game_id: Uuid,
    commands: mpsc::UnboundedSender<RoomCommand>,
    spectators: Arc<SseHub>,
}

impl RoomHandle {
    /// Queue a command. Fails once the worker stopped.
    pub fn send(&self, command: RoomCommand) -> Result<(), ServiceError> {
        self.commands
            .send(command)
            .map_err(|_| ServiceError::NotFound(format!("game {} has ended", self.code)))
    }

    /// Ask the worker for a public summary.
    pub async fn describe(&self) -> Result<GameSummary, ServiceError> {
        let (reply, receiver) = oneshot::channel();
        self.send(RoomCommand::Describe { reply })?;
        match tokio::time::timeout(DEFAULT_QUERY_TIMEOUT, receiver).await {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(_)) => Err(ServiceError::NotFound(format!(
                "game {} has ended",
                self.code
            ))),
            Err(_) => Err(ServiceError::Timeout),
        }
    }

    /// Broadcast hub of the spectator SSE stream.
    pub fn spectators(&self) -> &Arc<SseHub> {
        &self.spectators
    }

    /// Whether the worker still accepts commands.
    pub fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Collaborators of a room worker.
pub struct RoomContext {
    pub timers: Arc<TimerService>,
    pub config: Arc<AppConfig>,
    /// Used by timer callbacks to post back into the room queue.
    pub commands: mpsc::WeakUnboundedSender<RoomCommand>,
    pub spectators: Arc<SseHub>,
    pub audience: Arc<Audience>,
}

/// State machine driver owning one [`GameSession`].
pub struct RoomController {
    session: GameSession,
    ctx: RoomContext,
    phase_timer: Option<TimerHandle>,
    grace_timers: HashMap<Uuid, TimerHandle>,
    last_activity: Instant,
    closed: bool,
}

impl RoomController {
    /// Wrap a freshly created session.
    pub fn new(session: GameSession, ctx: RoomContext) -> Self {
        Self {
            session,
            ctx,
            phase_timer: None,
            grace_timers: HashMap::new(),
            last_activity: Instant::now(),
            closed: false,
        }
    }

    /// Authoritative session, read-only.
    pub fn session(&self) -> &GameSession {
        &self.session
    }

    /// Whether the worker should stop.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn scope(&self) -> TimerScope {
        TimerScope::Room(self.session.code.clone())
    }

    /// Process commands until the room closes or every handle is dropped.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<RoomCommand>) {
        let _timers = ScopeGuard::new(Arc::clone(&self.ctx.timers), self.scope());
        info!(room = %self.session.code, game_id = %self.session.id, "room worker started");

        while let Some(command) = commands.recv().await {
            self.handle(command);
            if self.closed {
                break;
            }
        }

        info!(room = %self.session.code, "room worker stopped");
    }

    /// Apply one command to the session.
    pub fn handle(&mut self, command: RoomCommand) {
        let now = Instant::now();
        match command {
            RoomCommand::Join {
                connection,
                sender,
                request,
            } => {
                self.last_activity = now;
                if let Err(rejection) = self.join(connection, sender.clone(), request) {
                    let _ = sender.send(ServerMessage::rejection(&rejection));
                }
            }
            RoomCommand::Answer {
                connection,
                request,
            } => {
                self.last_activity = now;
                if let Err(rejection) = self.answer(connection, request, now) {
                    self.reject(connection, rejection);
                }
            }
            RoomCommand::Host {
                connection,
                command,
            } => {
                self.last_activity = now;
                if let Err(rejection) = self.host_command(connection, command, now) {
                    self.reject(connection, rejection);
                }
            }
            RoomCommand::Restore {
                connection,
                sender,
                kind,
                identity,
            } => {
                self.last_activity = now;
                self.restore(connection, sender, kind, identity, now);
            }
            RoomCommand::Leave { connection } => {
                self.last_activity = now;
                self.leave(connection, now);
            }
            RoomCommand::Disconnected { connection } => self.disconnected(connection, now),
            RoomCommand::PhaseTimeout { generation } => self.phase_timeout(generation, now),
            RoomCommand::ReconnectGraceExpired { player_id } => self.grace_expired(player_id),
            RoomCommand::FinishedTtlExpired => {
                info!(room = %self.session.code, "finished room retention elapsed");
                self.closed = true;
            }
            RoomCommand::IdleCheck => self.idle_check(now),
            RoomCommand::Describe { reply } => {
                let _ = reply.send(GameSummary::from(&self.session));
            }
        }
    }

    fn join(
        &mut self,
        connection: ConnectionId,
        sender: ClientSender,
        request: JoinGameRequest,
    ) -> Result<(), RoomRejection> {
        if self.session.machine.is_finished() {
            return Err(RoomRejection::GameEnded);
        }
        if self.ctx.audience.role(connection).is_some() {
            return Err(RoomRejection::InvalidTransition(
                "connection already joined this game".into(),
            ));
        }
        let name = request.player_name.trim().to_string();
        if self.session.name_taken(&name) {
            return Err(RoomRejection::NameTaken);
        }

        let seq = self.session.next_seq();
        let player = Player::new(name, request.user_id, connection, seq);
        let summary = PlayerSummary::from(&player);
        let player_id = player.id;
        self.session.players.insert(player_id, player);
        self.ctx
            .audience
            .attach(connection, Role::Player(player_id), sender);

        info!(room = %self.session.code, %player_id, name = %summary.name, "player joined");
        self.ctx.audience.send_to(
            connection,
            ServerMessage::JoinedGame(JoinedGamePayload {
                game_code: self.session.code.clone(),
                player_count: self.session.players.len(),
                game_status: self.session.machine.phase().into(),
                player: summary.clone(),
            }),
        );
        self.ctx
            .audience
            .send_to_host(ServerMessage::PlayerJoined(summary));
        self.broadcast_player_count();
        Ok(())
    }

    fn answer(
        &mut self,
        connection: ConnectionId,
        request: AnswerRequest,
        now: Instant,
    ) -> Result<(), RoomRejection> {
        let player_id = match self.ctx.audience.role(connection) {
            Some(Role::Player(id)) => id,
            Some(Role::Host) => return Err(RoomRejection::UnknownPlayer),
            None => return Err(RoomRejection::NotInRoom),
        };
        let (index, deadline) = match self.session.machine.phase() {
            Phase::Question(open) => (open.index, open.deadline),
            _ => return Err(RoomRejection::QuestionClosed),
        };
        if now >= deadline {
            return Err(RoomRejection::QuestionClosed);
        }
        let question = self
            .session
            .questions
            .get(index)
            .cloned()
            .ok_or(RoomRejection::QuestionClosed)?;
        if request.question_id != question.id {
            return Err(RoomRejection::QuestionClosed);
        }
        if let Some(selected) = request.selected_option {
            if selected >= question.options.len() {
                return Err(RoomRejection::InvalidOption(format!(
                    "option {selected} does not exist"
                )));
            }
        }

        let seq = self.session.next_seq();
        let player = self
            .session
            .players
            .get_mut(&player_id)
            .ok_or(RoomRejection::UnknownPlayer)?;
        if player.has_record_for(&question.id) {
            return Err(RoomRejection::AlreadyAnswered);
        }

        // the server clock bounds how fast an answer can claim to be, and the answer arrived
        // before the deadline so it cannot be slower than the limit either
        let limit = question.time_limit().as_secs_f64();
        let server_elapsed = question
            .time_limit()
            .saturating_sub(deadline.saturating_duration_since(now))
            .as_secs_f64();
        let time_taken = request.time_taken.max(server_elapsed).min(limit);
        let outcome = scoring::record_answer(
            &question,
            &self.session.settings,
            player,
            time_taken,
            question.is_correct(request.selected_option),
        )?;

        let correct = outcome.correct;
        let points = outcome.points;
        let breakdown = outcome.breakdown;
        player.apply_record(outcome.into_record(question.id.clone()), seq);
        player.last_answer = Some(SubmittedAnswer {
            question_id: question.id.clone(),
            selected: request.selected_option,
            time_taken,
            correct,
            points,
        });
        let result = AnswerResultPayload {
            is_correct: correct,
            points,
            new_score: player.score,
            streak: player.streak,
            correct_answer: question.correct_answer().to_string(),
            breakdown: breakdown.into(),
        };
        debug!(room = %self.session.code, %player_id, points, "answer recorded");

        self.ctx
            .audience
            .send_to(connection, ServerMessage::AnswerResult(result));
        self.report_answer_count(&question.id);
        self.close_if_everyone_answered(now);
        Ok(())
    }

    fn host_command(
        &mut self,
        connection: ConnectionId,
        command: HostCommand,
        now: Instant,
    ) -> Result<(), RoomRejection> {
        match self.ctx.audience.role(connection) {
            Some(Role::Host) => {}
            Some(Role::Player(_)) => return Err(RoomRejection::NotHost),
            None => return Err(RoomRejection::NotInRoom),
        }
        if self.session.machine.is_finished() {
            return Err(RoomRejection::GameEnded);
        }
        info!(room = %self.session.code, ?command, "host command");

        match command {
            HostCommand::Start => self.start(now),
            HostCommand::Next | HostCommand::Skip => match self.session.machine.phase().kind() {
                PhaseKind::Waiting => self.start(now),
                PhaseKind::Question => self.close_question(now),
                PhaseKind::Explanation | PhaseKind::Leaderboard => self.advance(now),
                other => Err(RoomRejection::InvalidTransition(format!(
                    "cannot skip while {other:?}"
                ))),
            },
            HostCommand::Pause => self.pause(now),
            HostCommand::Resume => self.resume(now),
            HostCommand::JumpTo(index) => self.jump(index, now),
            HostCommand::EmergencyStop => self.finish(FinishReason::EmergencyStop),
            HostCommand::End => {
                self.end();
                Ok(())
            }
            HostCommand::Kick(player_id) => self.kick(player_id, now),
        }
    }

    fn start(&mut self, now: Instant) -> Result<(), RoomRejection> {
        let first = self
            .session
            .questions
            .first()
            .ok_or_else(|| RoomRejection::InvalidTransition("game has no questions".into()))?;
        let deadline = now + first.time_limit();
        self.session.machine.apply(GameEvent::Start { deadline })?;
        self.enter_question(now);
        Ok(())
    }

    fn advance(&mut self, now: Instant) -> Result<(), RoomRejection> {
        let next_limit = self
            .session
            .machine
            .current_index()
            .and_then(|index| self.session.questions.get(index + 1))
            .map(Question::time_limit)
            .unwrap_or_default();
        self.session.machine.apply(GameEvent::Advance {
            deadline: now + next_limit,
        })?;
        if self.session.machine.is_finished() {
            self.on_finished();
        } else {
            self.enter_question(now);
        }
        Ok(())
    }

    fn jump(&mut self, index: usize, now: Instant) -> Result<(), RoomRejection> {
        let limit = self
            .session
            .questions
            .get(index)
            .map(Question::time_limit)
            .ok_or_else(|| RoomRejection::InvalidOption(format!("question {index} does not exist")))?;
        // a question abandoned mid-way still counts as missed for whoever did not answer
        let abandoned = match self.session.machine.phase() {
            Phase::Question(open) => Some(open.index),
            Phase::Paused(paused) => match paused.resume.as_ref() {
                Phase::Question(open) => Some(open.index),
                _ => None,
            },
            _ => None,
        };
        self.session.machine.apply(GameEvent::JumpTo {
            index,
            deadline: now + limit,
        })?;
        if let Some(abandoned) = abandoned {
            self.score_unanswered(abandoned);
        }
        self.enter_question(now);
        Ok(())
    }

    fn pause(&mut self, now: Instant) -> Result<(), RoomRejection> {
        self.session.machine.apply(GameEvent::Pause { now })?;
        self.disarm_phase_timer();
        let remaining = self.session.machine.remaining(now).unwrap_or_default();
        self.broadcast(ServerMessage::GamePaused(TimeRemainingPayload {
            time_remaining: millis(remaining),
        }));
        Ok(())
    }

    fn resume(&mut self, now: Instant) -> Result<(), RoomRejection> {
        self.session.machine.apply(GameEvent::Resume { now })?;
        self.arm_phase_timer(now);
        let remaining = self.session.machine.remaining(now).unwrap_or_default();
        self.broadcast(ServerMessage::GameResumed(TimeRemainingPayload {
            time_remaining: millis(remaining),
        }));
        Ok(())
    }

    fn finish(&mut self, reason: FinishReason) -> Result<(), RoomRejection> {
        self.session.machine.apply(GameEvent::Finish(reason))?;
        self.on_finished();
        Ok(())
    }

    /// Host ended the game: everybody is told the session is over and the room closes.
    fn end(&mut self) {
        if !self.session.machine.is_finished() {
            let _ = self
                .session
                .machine
                .apply(GameEvent::Finish(FinishReason::HostEnded));
        }
        info!(room = %self.session.code, "host ended the game");
        self.close("the host ended the game");
    }

    fn kick(&mut self, player_id: Uuid, now: Instant) -> Result<(), RoomRejection> {
        let player = self
            .session
            .players
            .shift_remove(&player_id)
            .ok_or(RoomRejection::UnknownPlayer)?;
        if let Some(handle) = self.grace_timers.remove(&player_id) {
            self.ctx.timers.cancel(handle);
        }
        if let Some(connection) = player.connection {
            self.ctx.audience.send_to(
                connection,
                ServerMessage::Kicked(KickedPayload {
                    reason: "removed by the host".into(),
                }),
            );
            self.ctx.audience.detach(connection);
        }
        info!(room = %self.session.code, %player_id, "player kicked");
        self.ctx
            .audience
            .send_to_host(ServerMessage::PlayerLeft(PlayerSummary::from(&player)));
        self.broadcast_player_count();
        self.close_if_everyone_answered(now);
        Ok(())
    }

    fn leave(&mut self, connection: ConnectionId, now: Instant) {
        match self.ctx.audience.detach(connection) {
            Some(Role::Player(player_id)) => {
                let waiting = self.session.machine.phase().kind() == PhaseKind::Waiting;
                let summary = if waiting {
                    self.session
                        .players
                        .shift_remove(&player_id)
                        .map(|player| PlayerSummary::from(&player))
                } else {
                    self.session.players.get_mut(&player_id).map(|player| {
                        player.status = PlayerStatus::Disconnected;
                        player.connection = None;
                        PlayerSummary::from(&*player)
                    })
                };
                if let Some(summary) = summary {
                    info!(room = %self.session.code, %player_id, "player left");
                    self.ctx
                        .audience
                        .send_to_host(ServerMessage::PlayerLeft(summary));
                    self.broadcast_player_count();
                    self.close_if_everyone_answered(now);
                }
            }
            Some(Role::Host) => {
                if self.session.host_connection == Some(connection) {
                    self.session.host_connection = None;
                }
            }
            None => {}
        }
    }

    fn disconnected(&mut self, connection: ConnectionId, now: Instant) {
        match self.ctx.audience.detach(connection) {
            Some(Role::Player(player_id)) => {
                let Some(player) = self.session.players.get_mut(&player_id) else {
                    return;
                };
                if player.connection != Some(connection) {
                    return;
                }
                player.connection = None;
                player.status = PlayerStatus::Reconnecting;
                let summary = PlayerSummary::from(&*player);
                debug!(room = %self.session.code, %player_id, "player connection lost");

                self.arm_grace_timer(player_id);
                self.ctx
                    .audience
                    .send_to_host(ServerMessage::PlayerStatus(summary));
                self.close_if_everyone_answered(now);
            }
            Some(Role::Host) => {
                if self.session.host_connection == Some(connection) {
                    debug!(room = %self.session.code, "host connection lost");
                    self.session.host_connection = None;
                }
            }
            None => {}
        }
    }

    fn grace_expired(&mut self, player_id: Uuid) {
        self.grace_timers.remove(&player_id);
        let Some(player) = self.session.players.get_mut(&player_id) else {
            return;
        };
        if player.status != PlayerStatus::Reconnecting {
            return;
        }
        player.status = PlayerStatus::Disconnected;
        let summary = PlayerSummary::from(&*player);
        debug!(room = %self.session.code, %player_id, "player reconnect grace elapsed");
        self.ctx
            .audience
            .send_to_host(ServerMessage::PlayerStatus(summary));
    }

    fn restore(
        &mut self,
        connection: ConnectionId,
        sender: ClientSender,
        kind: RestoreKind,
        identity: RestoreIdentity,
        now: Instant,
    ) {
        if self.session.machine.is_finished() {
            let _ = sender.send(ServerMessage::expired("game has ended"));
            return;
        }

        let is_host = identity.host_id.as_deref() == Some(self.session.host_id.as_str());
        let reply = match kind {
            RestoreKind::Host if is_host => {
                self.attach_host(connection, sender.clone());
                Some(ServerMessage::HostRestored(HostRestoredPayload {
                    game_state: self.session.snapshot(now),
                    players: self.session.roster(),
                }))
            }
            RestoreKind::Session if is_host => {
                self.attach_host(connection, sender.clone());
                Some(ServerMessage::GameSessionRestored(SessionRestoredPayload {
                    player_state: None,
                    game_state: self.session.snapshot(now),
                }))
            }
            RestoreKind::Player | RestoreKind::Session => self
                .attach_player(connection, sender.clone(), &identity)
                .map(|player_id| {
                    let payload = SessionRestoredPayload {
                        player_state: self.session.player_state(player_id),
                        game_state: self.session.snapshot(now),
                    };
                    if kind == RestoreKind::Player {
                        ServerMessage::PlayerSessionRestored(payload)
                    } else {
                        ServerMessage::GameSessionRestored(payload)
                    }
                }),
            RestoreKind::Host => None,
        };

        match reply {
            Some(message) => {
                debug!(room = %self.session.code, %connection, ?kind, "session restored");
                self.ctx.audience.send_to(connection, message);
            }
            None => {
                debug!(room = %self.session.code, %connection, ?kind, "unknown identity");
                let _ = sender.send(ServerMessage::expired("unknown identity for this game"));
            }
        }
    }

    fn attach_host(&mut self, connection: ConnectionId, sender: ClientSender) {
        if let Some(previous) = self.session.host_connection {
            if previous != connection {
                self.ctx.audience.detach(previous);
            }
        }
        self.session.host_connection = Some(connection);
        self.ctx.audience.attach(connection, Role::Host, sender);
    }

    fn attach_player(
        &mut self,
        connection: ConnectionId,
        sender: ClientSender,
        identity: &RestoreIdentity,
    ) -> Option<Uuid> {
        let player_id = self
            .session
            .find_player(
                identity.player_id,
                identity.player_name.as_deref(),
                identity.user_id.as_deref(),
            )?
            .id;
        if let Some(handle) = self.grace_timers.remove(&player_id) {
            self.ctx.timers.cancel(handle);
        }
        if let Some(Role::Player(previous_id)) = self.ctx.audience.role(connection) {
            if previous_id != player_id {
                self.release_player(previous_id, connection);
            }
        }

        let player = self.session.players.get_mut(&player_id)?;
        if let Some(previous) = player.connection {
            if previous != connection {
                self.ctx.audience.detach(previous);
            }
        }
        let status_changed = player.status != PlayerStatus::Connected;
        player.connection = Some(connection);
        player.status = PlayerStatus::Connected;
        let summary = PlayerSummary::from(&*player);

        self.ctx
            .audience
            .attach(connection, Role::Player(player_id), sender);
        if status_changed {
            self.ctx
                .audience
                .send_to_host(ServerMessage::PlayerStatus(summary));
        }
        Some(player_id)
    }

    /// Unbind `player_id` from a socket that now speaks for someone else.
    fn release_player(&mut self, player_id: Uuid, connection: ConnectionId) {
        let Some(player) = self.session.players.get_mut(&player_id) else {
            return;
        };
        if player.connection != Some(connection) {
            return;
        }
        player.connection = None;
        player.status = PlayerStatus::Reconnecting;
        let summary = PlayerSummary::from(&*player);
        debug!(room = %self.session.code, %player_id, %connection, "socket switched identity");

        self.arm_grace_timer(player_id);
        self.ctx
            .audience
            .send_to_host(ServerMessage::PlayerStatus(summary));
    }

    fn phase_timeout(&mut self, generation: u64, now: Instant) {
        if generation != self.session.machine.generation() {
            debug!(
                room = %self.session.code,
                generation,
                current = self.session.machine.generation(),
                "ignoring stale phase timer"
            );
            return;
        }
        self.phase_timer = None;

        let outcome = match self.session.machine.phase().kind() {
            PhaseKind::Question => self.close_question(now),
            PhaseKind::Explanation | PhaseKind::Leaderboard => self.advance(now),
            _ => Ok(()),
        };
        if let Err(rejection) = outcome {
            warn!(room = %self.session.code, error = %rejection, "phase deadline transition failed");
        }
    }

    fn idle_check(&mut self, now: Instant) {
        let idle = now.saturating_duration_since(self.last_activity);
        if self.session.host_connection.is_none() && idle >= self.ctx.config.idle_room_ttl() {
            info!(
                room = %self.session.code,
                idle_secs = idle.as_secs(),
                "closing idle room without host"
            );
            self.close("game closed after inactivity");
        }
    }

    /// Close the open question: score the missing answers and show explanation or standings.
    fn close_question(&mut self, now: Instant) -> Result<(), RoomRejection> {
        let Phase::Question(open) = self.session.machine.phase() else {
            return Err(RoomRejection::QuestionClosed);
        };
        let index = open.index;
        let question = self
            .session
            .questions
            .get(index)
            .cloned()
            .ok_or(RoomRejection::QuestionClosed)?;

        self.score_unanswered(index);

        let settings = self.session.settings;
        let standings = self.session.standings();
        let answer_stats = self.answer_stats(&question);
        let explanation = question.has_explanation();
        let phase_time = if explanation {
            settings.explanation_time
        } else {
            settings.leaderboard_time
        };
        let deadline = settings.auto_advance.then(|| now + phase_time);
        let explanation_time = settings.auto_advance.then(|| phase_time.as_secs());

        let followup = if explanation {
            Followup::Explanation { deadline }
        } else {
            Followup::Leaderboard {
                deadline,
                standings: standings.clone(),
            }
        };
        self.session
            .machine
            .apply(GameEvent::CloseQuestion(followup))?;
        self.arm_phase_timer(now);

        let message = if explanation {
            ServerMessage::ShowExplanation(ShowExplanationPayload {
                explanation: question.explanation.as_ref().map(ExplanationPayload::from),
                correct_answer: question.correct_answer().to_string(),
                correct_option: question.correct_option(),
                answer_stats,
                explanation_time,
                standings: Some(standing_entries(&standings)),
            })
        } else {
            ServerMessage::ShowLeaderboard(ShowLeaderboardPayload {
                standings: standing_entries(&standings),
                correct_answer: question.correct_answer().to_string(),
                correct_option: question.correct_option(),
                answer_stats,
                explanation_time,
                question_number: index + 1,
                total_questions: self.session.questions.len(),
            })
        };
        info!(room = %self.session.code, question = index + 1, "question closed");
        self.broadcast(message);
        Ok(())
    }

    /// Give every player without an answer to question `index` a zero record.
    fn score_unanswered(&mut self, index: usize) {
        let Some(question) = self.session.questions.get(index).cloned() else {
            return;
        };
        let limit = f64::from(question.time_limit_secs);
        let missing: Vec<Uuid> = self
            .session
            .players
            .values()
            .filter(|player| !player.has_record_for(&question.id))
            .map(|player| player.id)
            .collect();

        for player_id in missing {
            let seq = self.session.next_seq();
            let Some(player) = self.session.players.get_mut(&player_id) else {
                continue;
            };
            let outcome = match scoring::record_answer(
                &question,
                &self.session.settings,
                player,
                limit,
                false,
            ) {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(room = %self.session.code, %player_id, error = %err, "failed to score missed answer");
                    continue;
                }
            };
            player.apply_record(outcome.into_record(question.id.clone()), seq);
            player.last_answer = Some(SubmittedAnswer {
                question_id: question.id.clone(),
                selected: None,
                time_taken: limit,
                correct: false,
                points: 0,
            });
            let result = AnswerResultPayload {
                is_correct: false,
                points: 0,
                new_score: player.score,
                streak: player.streak,
                correct_answer: question.correct_answer().to_string(),
                breakdown: scoring::ScoreBreakdown::default().into(),
            };
            if let Some(connection) = player.connection {
                self.ctx
                    .audience
                    .send_to(connection, ServerMessage::AnswerResult(result));
            }
        }
    }

    fn answer_stats(&self, question: &Question) -> AnswerStats {
        let mut stats = AnswerStats {
            option_counts: vec![0; question.options.len()],
            total_players: self.session.players.len(),
            ..AnswerStats::default()
        };
        for answer in self
            .session
            .players
            .values()
            .filter_map(|player| player.last_answer.as_ref())
            .filter(|answer| answer.question_id == question.id)
        {
            if let Some(count) = answer.selected.and_then(|i| stats.option_counts.get_mut(i)) {
                *count += 1;
                stats.answered_count += 1;
            }
            if answer.correct {
                stats.correct_count += 1;
            }
        }
        stats
    }

    /// Broadcast the question of the phase just entered and arm its deadline.
    fn enter_question(&mut self, now: Instant) {
        self.arm_phase_timer(now);
        let Phase::Question(open) = self.session.machine.phase() else {
            return;
        };
        let index = open.index;
        let remaining = self.session.machine.remaining(now).unwrap_or_default();
        let Some(question) = self.session.questions.get(index) else {
            return;
        };
        let payload =
            QuestionPayload::new(question, index, self.session.questions.len(), remaining);
        info!(room = %self.session.code, question = index + 1, "question opened");
        self.broadcast(ServerMessage::Question(payload));
        self.report_answer_count(&question.id.clone());
    }

    fn on_finished(&mut self) {
        self.disarm_phase_timer();
        let scoreboard = standing_entries(&self.session.standings());
        info!(room = %self.session.code, players = scoreboard.len(), "game finished");
        self.broadcast(ServerMessage::GameOver(GameOverPayload { scoreboard }));

        let ttl = self.ctx.config.finished_room_ttl();
        let commands = self.ctx.commands.clone();
        if let Err(err) = self.ctx.timers.schedule(
            move || {
                if let Some(commands) = commands.upgrade() {
                    let _ = commands.send(RoomCommand::FinishedTtlExpired);
                }
            },
            ttl,
            "finished-room-ttl",
            self.scope(),
        ) {
            warn!(room = %self.session.code, error = %err, "cannot schedule finished room cleanup");
            self.closed = true;
        }
    }

    fn close_if_everyone_answered(&mut self, now: Instant) {
        if !self.session.settings.early_advance {
            return;
        }
        let Some(question_id) = (match self.session.machine.phase() {
            Phase::Question(open) => self.session.questions.get(open.index).map(|q| q.id.clone()),
            _ => None,
        }) else {
            return;
        };
        let connected = self.session.connected_count();
        if connected > 0 && self.session.answered_count(&question_id) >= connected {
            debug!(room = %self.session.code, "every connected player answered");
            if let Err(rejection) = self.close_question(now) {
                warn!(room = %self.session.code, error = %rejection, "early close failed");
            }
        }
    }

    fn report_answer_count(&self, question_id: &str) {
        self.ctx
            .audience
            .send_to_host(ServerMessage::AnswerCount(AnswerCountPayload {
                answered: self.session.answered_count(question_id),
                connected: self.session.connected_count(),
            }));
    }

    fn broadcast_player_count(&self) {
        self.broadcast(ServerMessage::PlayerCount(PlayerCountPayload {
            count: self.session.players.len(),
        }));
    }

    /// Send to every attached socket and to spectators.
    fn broadcast(&self, message: ServerMessage) {
        match ServerEvent::from_message(&message) {
            Ok(event) => self.ctx.spectators.broadcast(event),
            Err(err) => warn!(
                event = message.event_name(),
                error = %err,
                "failed to serialize spectator event"
            ),
        }
        self.ctx.audience.broadcast(&message);
    }

    fn reject(&self, connection: ConnectionId, rejection: RoomRejection) {
        debug!(room = %self.session.code, %connection, code = rejection.code(), "event rejected");
        self.ctx
            .audience
            .send_to(connection, ServerMessage::rejection(&rejection));
    }

    fn close(&mut self, reason: &str) {
        self.disarm_phase_timer();
        if let Ok(event) = ServerEvent::from_message(&ServerMessage::expired(reason)) {
            self.ctx.spectators.broadcast(event);
        }
        self.ctx.audience.expire_all(reason);
        self.closed = true;
    }

    /// Replace the pending phase timer with one for the current deadline, if any.
    fn arm_phase_timer(&mut self, now: Instant) {
        self.disarm_phase_timer();
        let Some(deadline) = self.session.machine.deadline() else {
            return;
        };
        let generation = self.session.machine.generation();
        let commands = self.ctx.commands.clone();
        match self.ctx.timers.schedule(
            move || {
                if let Some(commands) = commands.upgrade() {
                    let _ = commands.send(RoomCommand::PhaseTimeout { generation });
                }
            },
            deadline.saturating_duration_since(now),
            "phase-deadline",
            self.scope(),
        ) {
            Ok(handle) => self.phase_timer = Some(handle),
            Err(err) => {
                error!(room = %self.session.code, error = %err, "cannot schedule phase deadline")
            }
        }
    }

    fn disarm_phase_timer(&mut self) {
        if let Some(handle) = self.phase_timer.take() {
            self.ctx.timers.cancel(handle);
        }
    }

    fn arm_grace_timer(&mut self, player_id: Uuid) {
        if let Some(previous) = self.grace_timers.remove(&player_id) {
            self.ctx.timers.cancel(previous);
        }
        let commands = self.ctx.commands.clone();
        match self.ctx.timers.schedule(
            move || {
                if let Some(commands) = commands.upgrade() {
                    let _ = commands.send(RoomCommand::ReconnectGraceExpired { player_id });
                }
            },
            self.ctx.config.player_reconnect_grace(),
            "player-reconnect-grace",
            self.scope(),
        ) {
            Ok(handle) => {
                self.grace_timers.insert(player_id, handle);
            }
            Err(err) => warn!(room = %self.session.code, error = %err, "cannot schedule reconnect grace"),
        }
    }
}

/// Start the worker for `session` and register a supervisor that removes the room from the
/// registry when the worker stops, whatever the reason.
pub fn spawn_room(
    state: &SharedState,
    session: GameSession,
    host: Option<(ConnectionId, ClientSender)>,
) -> RoomHandle {
    let (commands, receiver) = mpsc::unbounded_channel();
    let audience = Arc::new(Audience::default());
    let spectators = Arc::new(SseHub::new(SPECTATOR_CAPACITY));

    let mut session = session;
    if let Some((connection, sender)) = host {
        session.host_connection = Some(connection);
        audience.attach(connection, Role::Host, sender);
    }

    let handle = RoomHandle {
        code: session.code.clone(),
        game_id: session.id,
        commands: commands.clone(),
        spectators: Arc::clone(&spectators),
    };
    let controller = RoomController::new(
        session,
        RoomContext {
            timers: Arc::clone(state.timers()),
            config: Arc::clone(state.config()),
            commands: commands.downgrade(),
            spectators: Arc::clone(&spectators),
            audience: Arc::clone(&audience),
        },
    );

    let worker = tokio::spawn(controller.run(receiver));
    tokio::spawn(supervise(
        Arc::clone(state),
        handle.code.clone(),
        handle.game_id,
        audience,
        spectators,
        worker,
    ));
    handle
}

/// Wait for a room worker to stop; a crashed worker expires every attached client.
async fn supervise(
    state: SharedState,
    code: String,
    game_id: Uuid,
    audience: Arc<Audience>,
    spectators: Arc<SseHub>,
    worker: JoinHandle<()>,
) {
    match worker.await {
        Ok(()) => debug!(room = %code, "room worker exited"),
        Err(err) if err.is_panic() => {
            error!(room = %code, %game_id, "room worker panicked; closing room");
            if let Ok(event) = ServerEvent::from_message(&ServerMessage::expired("game crashed")) {
                spectators.broadcast(event);
            }
            audience.expire_all("game crashed");
        }
        Err(err) => warn!(room = %code, error = %err, "room worker cancelled"),
    }
    state.remove_room(&code, game_id);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{sync::mpsc::UnboundedReceiver, task::yield_now};

    use super::*;
    use crate::{
        dao::{
            models::{AnswerOptionEntity, ExplanationEntity, QuestionEntity, QuestionSetEntity},
            question_store::FileQuestionStore,
        },
        dto::phase::VisibleGamePhase,
        state::{AppState, game::GameSettings},
    };

    const CODE: &str = "424242";

    struct Client {
        connection: ConnectionId,
        sender: ClientSender,
        inbox: UnboundedReceiver<ServerMessage>,
    }

    impl Client {
        fn new() -> Self {
            let (sender, inbox) = mpsc::unbounded_channel();
            Self {
                connection: Uuid::new_v4(),
                sender,
                inbox,
            }
        }

        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut messages = Vec::new();
            while let Ok(message) = self.inbox.try_recv() {
                messages.push(message);
            }
            messages
        }

        fn events(&mut self) -> Vec<&'static str> {
            self.drain().iter().map(ServerMessage::event_name).collect()
        }
    }

    struct Harness {
        timers: Arc<TimerService>,
        controller: RoomController,
        queue: UnboundedReceiver<RoomCommand>,
        _commands: mpsc::UnboundedSender<RoomCommand>,
        host: Client,
    }

    impl Harness {
        fn new(questions: Vec<QuestionEntity>, settings: GameSettings) -> Self {
            let timers = TimerService::new();
            let (commands, queue) = mpsc::unbounded_channel();
            let audience = Arc::new(Audience::default());
            let host = Client::new();
            audience.attach(host.connection, Role::Host, host.sender.clone());

            let set = QuestionSetEntity {
                id: "set".into(),
                title: "Quiz".into(),
                questions,
            };
            let session = GameSession::new(
                CODE.into(),
                "host-1".into(),
                set,
                settings,
                Some(host.connection),
            );
            let controller = RoomController::new(
                session,
                RoomContext {
                    timers: Arc::clone(&timers),
                    config: Arc::new(AppConfig::default()),
                    commands: commands.downgrade(),
                    spectators: Arc::new(SseHub::new(16)),
                    audience,
                },
            );
            Self {
                timers,
                controller,
                queue,
                _commands: commands,
                host,
            }
        }

        fn host(&mut self, command: HostCommand) {
            let connection = self.host.connection;
            self.controller.handle(RoomCommand::Host {
                connection,
                command,
            });
        }

        fn join(&mut self, name: &str) -> (Client, Uuid) {
            let mut client = Client::new();
            self.controller.handle(RoomCommand::Join {
                connection: client.connection,
                sender: client.sender.clone(),
                request: JoinGameRequest {
                    player_name: name.into(),
                    game_code: CODE.into(),
                    is_authenticated: false,
                    user_id: None,
                },
            });
            let player_id = match client.drain().into_iter().next() {
                Some(ServerMessage::JoinedGame(joined)) => joined.player.id,
                other => panic!("expected joinedGame, got {other:?}"),
            };
            (client, player_id)
        }

        fn answer(&mut self, client: &Client, question_id: &str, option: usize, time_taken: f64) {
            self.controller.handle(RoomCommand::Answer {
                connection: client.connection,
                request: AnswerRequest {
                    game_code: CODE.into(),
                    question_id: question_id.into(),
                    selected_option: Some(option),
                    time_taken,
                },
            });
        }

        /// Let simulated time pass, then feed every timer-posted command to the controller.
        async fn elapse(&mut self, duration: Duration) {
            tokio::time::sleep(duration).await;
            for _ in 0..4 {
                yield_now().await;
            }
            while let Ok(command) = self.queue.try_recv() {
                self.controller.handle(command);
            }
        }

        fn kind(&self) -> PhaseKind {
            self.controller.session().machine.phase().kind()
        }
    }

    fn question(id: &str, time_limit_secs: u32, explanation: bool) -> QuestionEntity {
        QuestionEntity {
            id: id.into(),
            prompt: format!("prompt {id}"),
            options: vec![
                AnswerOptionEntity {
                    text: "right".into(),
                    correct: true,
                },
                AnswerOptionEntity {
                    text: "wrong".into(),
                    correct: false,
                },
            ],
            time_limit_secs,
            points: 100,
            image_url: None,
            explanation: explanation.then(|| ExplanationEntity {
                text: Some("why".into()),
                ..Default::default()
            }),
        }
    }

    fn settings() -> GameSettings {
        GameSettings {
            streak_bonus: true,
            time_bonus: true,
            early_advance: true,
            auto_advance: true,
            explanation_time: Duration::from_secs(5),
            leaderboard_time: Duration::from_secs(3),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_after_skip_is_ignored() {
        let mut room = Harness::new(
            vec![question("q1", 10, false), question("q2", 10, false)],
            settings(),
        );
        let (mut ada, _) = room.join("Ada");
        room.host(HostCommand::Start);
        room.elapse(Duration::from_secs(2)).await;

        // host skips the question; the original deadline timer is cancelled or stale
        room.host(HostCommand::Skip);
        assert_eq!(room.kind(), PhaseKind::Leaderboard);
        let generation = room.controller.session().machine.generation();
        ada.drain();

        // a firing captured before the skip must not advance anything
        room.controller.handle(RoomCommand::PhaseTimeout {
            generation: generation - 1,
        });
        assert_eq!(room.kind(), PhaseKind::Leaderboard);
        assert!(ada.drain().is_empty());

        // the leaderboard deadline (3s) moves on exactly once
        room.elapse(Duration::from_secs(3)).await;
        assert_eq!(room.kind(), PhaseKind::Question);
        assert_eq!(room.controller.session().machine.current_index(), Some(1));
        let events = ada.events();
        assert_eq!(events.iter().filter(|e| **e == "question").count(), 1);
        assert_eq!(room.timers.stats().timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_answers_are_rejected() {
        let mut settings = settings();
        settings.early_advance = false;
        let mut room = Harness::new(vec![question("q1", 10, false)], settings);
        let (mut ada, ada_id) = room.join("Ada");
        room.host(HostCommand::Start);
        ada.drain();

        room.answer(&ada, "q1", 0, 1.0);
        room.answer(&ada, "q1", 1, 1.5);

        let messages = ada.drain();
        assert!(matches!(messages[0], ServerMessage::AnswerResult(_)));
        match &messages[1] {
            ServerMessage::Error(err) => assert_eq!(err.code, "alreadyAnswered"),
            other => panic!("expected error, got {other:?}"),
        }
        let player = &room.controller.session().players[&ada_id];
        assert_eq!(player.ledger.len(), 1);
        assert!(player.ledger[0].correct);
    }

    #[tokio::test(start_paused = true)]
    async fn in_time_answer_claiming_a_slow_time_keeps_the_streak() {
        let mut settings = settings();
        settings.early_advance = false;
        let mut room = Harness::new(vec![question("q1", 10, false)], settings);
        let (mut ada, ada_id) = room.join("Ada");
        if let Some(player) = room.controller.session.players.get_mut(&ada_id) {
            player.streak = 3;
        }
        room.host(HostCommand::Start);
        room.elapse(Duration::from_secs(1)).await;
        ada.drain();

        // arrives after one second but claims fifty
        room.answer(&ada, "q1", 0, 50.0);

        let player = &room.controller.session().players[&ada_id];
        assert_eq!(player.ledger.len(), 1);
        assert!(player.ledger[0].correct);
        assert_eq!(player.ledger[0].time_bonus, 0);
        assert_eq!(player.ledger[0].total, 150);
        assert_eq!(player.streak, 4);
        match ada.drain().first() {
            Some(ServerMessage::AnswerResult(result)) => {
                assert!(result.is_correct);
                assert_eq!(result.points, 150);
            }
            other => panic!("expected answerResult, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn socket_switching_identity_releases_the_previous_player() {
        let mut room = Harness::new(vec![question("q1", 10, false)], settings());
        let (ada, ada_id) = room.join("Ada");
        let (_bob, bob_id) = room.join("Bob");
        let (carol, carol_id) = room.join("Carol");
        room.host(HostCommand::Start);

        // Ada's socket restores as Bob
        room.controller.handle(RoomCommand::Restore {
            connection: ada.connection,
            sender: ada.sender.clone(),
            kind: RestoreKind::Player,
            identity: RestoreIdentity {
                player_id: Some(bob_id),
                ..Default::default()
            },
        });

        let players = &room.controller.session().players;
        assert_eq!(players[&ada_id].connection, None);
        assert_eq!(players[&ada_id].status, PlayerStatus::Reconnecting);
        assert_eq!(players[&bob_id].connection, Some(ada.connection));
        assert_eq!(room.controller.session().connected_count(), 2);

        // Bob (on Ada's socket) and Carol answering is everyone still connected
        room.answer(&ada, "q1", 0, 1.0);
        room.answer(&carol, "q1", 0, 1.0);
        assert_eq!(room.kind(), PhaseKind::Leaderboard);
        let ledger = &room.controller.session().players[&carol_id].ledger;
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn answers_outside_question_phase_are_rejected() {
        let mut room = Harness::new(vec![question("q1", 10, false)], settings());
        let (mut ada, _) = room.join("Ada");
        ada.drain();

        room.answer(&ada, "q1", 0, 1.0);
        match ada.drain().pop() {
            Some(ServerMessage::Error(err)) => assert_eq!(err.code, "questionClosed"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn players_cannot_drive_the_game() {
        let mut room = Harness::new(vec![question("q1", 10, false)], settings());
        let (mut ada, _) = room.join("Ada");
        ada.drain();

        room.controller.handle(RoomCommand::Host {
            connection: ada.connection,
            command: HostCommand::Start,
        });
        match ada.drain().pop() {
            Some(ServerMessage::Error(err)) => assert_eq!(err.code, "notHost"),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(room.kind(), PhaseKind::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn question_closes_early_when_everyone_answered() {
        let mut room = Harness::new(vec![question("q1", 10, true)], settings());
        let (ada, _) = room.join("Ada");
        let (mut bob, _) = room.join("Bob");
        room.host(HostCommand::Start);

        room.answer(&ada, "q1", 0, 1.0);
        assert_eq!(room.kind(), PhaseKind::Question);
        room.answer(&bob, "q1", 1, 1.0);
        assert_eq!(room.kind(), PhaseKind::Explanation);

        let show = bob
            .drain()
            .into_iter()
            .find_map(|message| match message {
                ServerMessage::ShowExplanation(show) => Some(show),
                _ => None,
            })
            .expect("showExplanation broadcast");
        assert_eq!(show.correct_option, Some(0));
        assert_eq!(show.answer_stats.option_counts, [1, 1]);
        assert_eq!(show.answer_stats.correct_count, 1);
        assert_eq!(show.explanation_time, Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_scores_missing_answers_as_zero() {
        let mut room = Harness::new(vec![question("q1", 10, false)], settings());
        let (mut ada, ada_id) = room.join("Ada");
        if let Some(player) = room.controller.session.players.get_mut(&ada_id) {
            player.streak = 2;
        }
        room.host(HostCommand::Start);
        ada.drain();

        room.elapse(Duration::from_secs(10)).await;
        assert_eq!(room.kind(), PhaseKind::Leaderboard);

        let player = &room.controller.session().players[&ada_id];
        assert_eq!(player.ledger.len(), 1);
        assert_eq!(player.ledger[0].total, 0);
        assert_eq!(player.streak, 0);
        assert_eq!(player.score, 0);

        let events = ada.events();
        assert_eq!(events, ["answerResult", "showLeaderboard"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_keep_remaining_time() {
        let mut room = Harness::new(vec![question("q1", 10, false)], settings());
        let (mut ada, _) = room.join("Ada");
        room.host(HostCommand::Start);
        room.elapse(Duration::from_secs(4)).await;

        room.host(HostCommand::Pause);
        assert_eq!(room.kind(), PhaseKind::Paused);
        assert_eq!(room.timers.stats().timeouts, 0);

        // nothing fires while paused
        room.elapse(Duration::from_secs(60)).await;
        assert_eq!(room.kind(), PhaseKind::Paused);

        room.host(HostCommand::Resume);
        let resumed = ada
            .drain()
            .into_iter()
            .filter_map(|message| match message {
                ServerMessage::GamePaused(p) | ServerMessage::GameResumed(p) => {
                    Some(p.time_remaining)
                }
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(resumed, [6_000, 6_000]);

        room.elapse(Duration::from_secs(5)).await;
        assert_eq!(room.kind(), PhaseKind::Question);
        room.elapse(Duration::from_secs(1)).await;
        assert_eq!(room.kind(), PhaseKind::Leaderboard);
    }

    #[tokio::test(start_paused = true)]
    async fn restoring_twice_is_idempotent() {
        let mut room = Harness::new(vec![question("q1", 10, false)], settings());
        let (ada, ada_id) = room.join("Ada");
        room.host(HostCommand::Start);
        room.elapse(Duration::from_secs(3)).await;

        room.controller.handle(RoomCommand::Disconnected {
            connection: ada.connection,
        });
        assert_eq!(
            room.controller.session().players[&ada_id].status,
            PlayerStatus::Reconnecting
        );

        let mut again = Client::new();
        let identity = RestoreIdentity {
            player_id: Some(ada_id),
            ..Default::default()
        };
        for _ in 0..2 {
            room.controller.handle(RoomCommand::Restore {
                connection: again.connection,
                sender: again.sender.clone(),
                kind: RestoreKind::Player,
                identity: identity.clone(),
            });
        }

        let replies: Vec<SessionRestoredPayload> = again
            .drain()
            .into_iter()
            .filter_map(|message| match message {
                ServerMessage::PlayerSessionRestored(payload) => Some(payload),
                _ => None,
            })
            .collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], replies[1]);
        assert_eq!(replies[0].game_state.player_count, 1);
        assert_eq!(replies[0].game_state.phase, VisibleGamePhase::Question);
        assert_eq!(replies[0].game_state.time_remaining, Some(7_000));
        assert_eq!(room.controller.session().players.len(), 1);
        assert_eq!(
            room.controller.session().players[&ada_id].status,
            PlayerStatus::Connected
        );

        // the restored socket can answer; the grace timer was cancelled
        room.answer(&again, "q1", 0, 0.5);
        assert_eq!(room.controller.session().players[&ada_id].ledger.len(), 1);
        assert_eq!(room.timers.count_in(&TimerScope::Room(CODE.into())), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_identity_gets_session_expired() {
        let mut room = Harness::new(vec![question("q1", 10, false)], settings());
        let mut stranger = Client::new();
        room.controller.handle(RoomCommand::Restore {
            connection: stranger.connection,
            sender: stranger.sender.clone(),
            kind: RestoreKind::Host,
            identity: RestoreIdentity {
                host_id: Some("someone-else".into()),
                ..Default::default()
            },
        });
        match stranger.drain().pop() {
            Some(ServerMessage::SessionExpired(expired)) => assert!(expired.should_redirect),
            other => panic!("expected sessionExpired, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn streak_and_time_bonus_end_to_end() {
        let questions = (1..=4).map(|n| question(&format!("q{n}"), 10, false)).collect();
        let mut room = Harness::new(questions, settings());
        let (mut ada, ada_id) = room.join("Ada");
        room.host(HostCommand::Start);

        for n in 1..=3 {
            room.answer(&ada, &format!("q{n}"), 0, 0.0);
            assert_eq!(room.kind(), PhaseKind::Leaderboard);
            room.host(HostCommand::Next);
        }
        assert_eq!(room.controller.session().players[&ada_id].streak, 3);
        ada.drain();

        room.elapse(Duration::from_secs(2)).await;
        room.answer(&ada, "q4", 0, 2.0);

        let result = ada
            .drain()
            .into_iter()
            .find_map(|message| match message {
                ServerMessage::AnswerResult(result) => Some(result),
                _ => None,
            })
            .expect("answerResult");
        assert_eq!(result.breakdown.streak_bonus, 50);
        assert_eq!(result.breakdown.time_bonus, 8);
        assert_eq!(result.points, 158);
        assert_eq!(result.streak, 4);

        room.host(HostCommand::Next);
        assert_eq!(room.kind(), PhaseKind::Finished);
        let over = ada
            .drain()
            .into_iter()
            .filter(|message| matches!(message, ServerMessage::GameOver(_)))
            .count();
        assert_eq!(over, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn client_reported_time_cannot_beat_the_server_clock() {
        let mut room = Harness::new(vec![question("q1", 10, false)], settings());
        let (mut ada, _) = room.join("Ada");
        room.host(HostCommand::Start);
        room.elapse(Duration::from_secs(6)).await;
        ada.drain();

        room.answer(&ada, "q1", 0, 0.0);
        let result = ada
            .drain()
            .into_iter()
            .find_map(|message| match message {
                ServerMessage::AnswerResult(result) => Some(result),
                _ => None,
            })
            .expect("answerResult");
        assert_eq!(result.breakdown.time_bonus, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_room_expires_restoration_and_closes_after_retention() {
        let mut room = Harness::new(vec![question("q1", 10, false)], settings());
        let (_ada, ada_id) = room.join("Ada");
        room.host(HostCommand::EmergencyStop);
        assert_eq!(room.kind(), PhaseKind::Finished);

        let mut late = Client::new();
        room.controller.handle(RoomCommand::Restore {
            connection: late.connection,
            sender: late.sender.clone(),
            kind: RestoreKind::Player,
            identity: RestoreIdentity {
                player_id: Some(ada_id),
                ..Default::default()
            },
        });
        assert_eq!(late.events(), ["sessionExpired"]);

        room.elapse(AppConfig::default().finished_room_ttl()).await;
        assert!(room.controller.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn kicked_player_is_removed_and_notified() {
        let mut room = Harness::new(vec![question("q1", 10, false)], settings());
        let (mut ada, ada_id) = room.join("Ada");
        ada.drain();
        room.host.drain();

        room.host(HostCommand::Kick(ada_id));
        assert_eq!(ada.events(), ["kicked"]);
        assert!(room.controller.session().players.is_empty());
        assert_eq!(room.host.events(), ["playerLeft", "playerCount"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_room_without_host_closes() {
        let mut room = Harness::new(vec![question("q1", 10, false)], settings());
        let host = room.host.connection;
        room.controller
            .handle(RoomCommand::Disconnected { connection: host });

        room.controller.handle(RoomCommand::IdleCheck);
        assert!(!room.controller.is_closed());

        room.elapse(AppConfig::default().idle_room_ttl()).await;
        room.controller.handle(RoomCommand::IdleCheck);
        assert!(room.controller.is_closed());
    }

    #[tokio::test]
    async fn crashed_worker_expires_clients_and_leaves_registry() {
        let state = AppState::new(
            AppConfig::default(),
            TimerService::new(),
            Arc::new(FileQuestionStore::default()),
        );
        let audience = Arc::new(Audience::default());
        let mut client = Client::new();
        audience.attach(client.connection, Role::Host, client.sender.clone());

        let (commands, _receiver) = mpsc::unbounded_channel();
        let game_id = Uuid::new_v4();
        state.rooms().insert(
            CODE.into(),
            RoomHandle {
                code: CODE.into(),
                game_id,
                commands,
                spectators: Arc::new(SseHub::new(4)),
            },
        );

        let worker = tokio::spawn(async { panic!("worker bug") });
        supervise(
            Arc::clone(&state),
            CODE.into(),
            game_id,
            Arc::clone(&audience),
            Arc::new(SseHub::new(4)),
            worker,
        )
        .await;

        assert_eq!(client.events(), ["sessionExpired"]);
        assert!(audience.is_empty());
        assert!(state.room(CODE).is_none());
    }
}
