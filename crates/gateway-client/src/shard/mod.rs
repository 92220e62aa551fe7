//! Shard state machine
//!
//! One shard owns one gateway connection: its session, heartbeat state,
//! rate-limit bucket and unsent queue. The state machine here is free of
//! I/O; the [`runner`] task owns the WebSocket and the timers, feeds
//! decoded payloads in, and executes the [`ShardAction`]s that come back.
//! That keeps every touch of shard state on a single task and makes the
//! protocol rules testable without a socket.

mod bucket;
mod heartbeat;
mod session;
pub(crate) mod runner;

pub use bucket::{QueuedPayload, SendBucket, BUCKET_LIMIT, BUCKET_WINDOW};
pub use heartbeat::Heartbeat;
pub use session::{Session, HELLO_TIMEOUT};

use crate::events::{ShardEvent, ShardSignal};
use crate::protocol::{GatewayPayload, IdentifyPayload, OpCode, ResumePayload};
use gateway_common::IdentifyProperties;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// How long after the last GUILD_CREATE the shard stops waiting for the
/// guilds announced in READY
pub const GUILD_CREATE_TIMEOUT: Duration = Duration::from_secs(15);

/// Close code used when tearing down a zombied connection
pub const ZOMBIE_CLOSE_CODE: u16 = 4009;

/// Close code used for protocol-requested and timeout reconnects
pub const RECONNECT_CLOSE_CODE: u16 = 4000;

/// Shard lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardStatus {
    /// Never connected
    Idle,
    /// First connection attempt in progress
    Connecting,
    /// Subsequent connection attempt in progress
    Reconnecting,
    /// Socket open, Hello not yet received
    Nearly,
    /// Identify sent, READY pending
    Identifying,
    /// Resume sent, RESUMED pending
    Resuming,
    /// READY received, guild stream settling
    WaitingForGuilds,
    /// Fully ready
    Ready,
    /// Post-resume steady state
    Connected,
    /// Socket closed
    Disconnected,
}

impl ShardStatus {
    /// Statuses in which a missed heartbeat ack is not yet a zombie verdict
    ///
    /// While a handshake or the post-READY guild stream is in flight the
    /// server may legitimately defer acks; the heartbeat is still sent.
    #[must_use]
    pub const fn heartbeat_tolerant(self) -> bool {
        matches!(self, Self::WaitingForGuilds | Self::Identifying | Self::Resuming)
    }
}

impl std::fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Reconnecting => "reconnecting",
            Self::Nearly => "nearly",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::WaitingForGuilds => "waiting-for-guilds",
            Self::Ready => "ready",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Options for tearing a shard down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyOptions {
    /// Close code sent on the socket and reported to the supervisor
    pub code: u16,
    /// Also forget the session, forcing a fresh identify
    pub reset: bool,
    /// Report the teardown to the supervisor
    pub emit: bool,
    /// Log the teardown
    pub log: bool,
}

impl DestroyOptions {
    /// Create options with a specific close code
    #[must_use]
    pub fn with_code(code: u16) -> Self {
        Self { code, ..Self::default() }
    }

    /// Also reset the session
    #[must_use]
    pub fn reset(mut self) -> Self {
        self.reset = true;
        self
    }

    /// Tear down silently, without signals or logs
    #[must_use]
    pub fn silent(mut self) -> Self {
        self.emit = false;
        self.log = false;
        self
    }
}

impl Default for DestroyOptions {
    fn default() -> Self {
        Self {
            code: 1000,
            reset: false,
            emit: true,
            log: true,
        }
    }
}

/// Side effects the runner must perform after feeding the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardAction {
    /// Start (or restart) the periodic heartbeat at this cadence
    StartHeartbeat(Duration),
    /// Tear the connection down
    Destroy(DestroyOptions),
}

/// Outcome of a periodic heartbeat attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatOutcome {
    /// Heartbeat queued for sending
    Sent,
    /// Connection declared dead; the runner must destroy with 4009 + reset
    Zombie,
}

/// One gateway connection's state
#[derive(Debug)]
pub struct Shard {
    id: u32,
    shard_count: u32,
    token: String,
    intents: u64,
    properties: IdentifyProperties,

    status: ShardStatus,
    seq: Option<u64>,
    closing_seq: Option<u64>,
    connected_at: Option<Instant>,
    socket_open: bool,

    session: Session,
    heartbeat: Heartbeat,
    bucket: SendBucket,
    /// Payloads accepted while the socket was not open
    pending: VecDeque<QueuedPayload>,

    expecting_guilds: Option<HashSet<String>>,
    guild_deadline: Option<Instant>,

    signals: mpsc::UnboundedSender<ShardSignal>,
}

impl Shard {
    /// Create a shard in the idle state
    #[must_use]
    pub fn new(
        id: u32,
        shard_count: u32,
        token: impl Into<String>,
        intents: u64,
        properties: IdentifyProperties,
        signals: mpsc::UnboundedSender<ShardSignal>,
        now: Instant,
    ) -> Self {
        Self {
            id,
            shard_count,
            token: token.into(),
            intents,
            properties,
            status: ShardStatus::Idle,
            seq: None,
            closing_seq: None,
            connected_at: None,
            socket_open: false,
            session: Session::new(),
            heartbeat: Heartbeat::new(),
            bucket: SendBucket::new(now),
            pending: VecDeque::new(),
            expecting_guilds: None,
            guild_deadline: None,
            signals,
        }
    }

    /// Shard id
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> ShardStatus {
        self.status
    }

    /// Last sequence number observed this session
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    /// Last sequence number observed before the most recent close
    #[must_use]
    pub fn closing_seq(&self) -> Option<u64> {
        self.closing_seq
    }

    /// When the current socket finished opening
    #[must_use]
    pub fn connected_at(&self) -> Option<Instant> {
        self.connected_at
    }

    /// Session state
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Heartbeat state
    #[must_use]
    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    /// Latency of the last acknowledged heartbeat
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.heartbeat.latency()
    }

    /// The rate-limit bucket feeding the socket
    #[must_use]
    pub fn bucket(&self) -> &SendBucket {
        &self.bucket
    }

    /// Take the next sendable payload from the bucket
    pub fn next_send(&mut self, now: Instant) -> Option<GatewayPayload> {
        self.bucket.try_next(now)
    }

    /// Time until the bucket can release another payload
    #[must_use]
    pub fn next_send_in(&self, now: Instant) -> Option<Duration> {
        self.bucket.next_ready_in(now)
    }

    /// Guild ids still awaited after READY
    #[must_use]
    pub fn expecting_guilds(&self) -> Option<&HashSet<String>> {
        self.expecting_guilds.as_ref()
    }

    /// Deadline of the ready-stabilization window
    #[must_use]
    pub fn guild_deadline(&self) -> Option<Instant> {
        self.guild_deadline
    }

    /// Number of payloads parked while the socket was closed
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Begin a connection attempt
    ///
    /// Arms the hello deadline; the runner opens the socket.
    pub fn begin_connect(&mut self, now: Instant) {
        self.status = if self.connected_at.is_some() {
            ShardStatus::Reconnecting
        } else {
            ShardStatus::Connecting
        };
        self.session.wait_for_hello(now);
        tracing::debug!(shard = self.id, status = %self.status, "connection attempt started");
    }

    /// The socket finished its open handshake
    ///
    /// Drains the unsent queue into the bucket in its parked order.
    pub fn handle_open(&mut self, now: Instant) {
        self.status = ShardStatus::Nearly;
        self.connected_at = Some(now);
        self.socket_open = true;
        for q in std::mem::take(&mut self.pending) {
            self.bucket.enqueue(q.payload, q.prioritized);
        }
        tracing::debug!(shard = self.id, "socket open, awaiting hello");
    }

    /// Queue a payload for sending
    ///
    /// While the socket is open the payload enters the rate-limit bucket;
    /// otherwise it parks in the unsent queue and drains on the next open.
    /// Prioritized payloads are admitted ahead of pending ordinary ones.
    pub fn send(&mut self, payload: GatewayPayload, prioritized: bool) {
        if self.socket_open {
            self.bucket.enqueue(payload, prioritized);
        } else if prioritized {
            let pos = self.pending.iter().take_while(|q| q.prioritized).count();
            self.pending.insert(pos, QueuedPayload { payload, prioritized });
        } else {
            self.pending.push_back(QueuedPayload { payload, prioritized });
        }
    }

    /// Feed one decoded inbound payload through the state machine
    pub fn handle_payload(&mut self, pk: &GatewayPayload, now: Instant) -> Vec<ShardAction> {
        if let Some(s) = pk.s {
            if let Some(current) = self.seq {
                if s > current + 1 {
                    tracing::warn!(
                        shard = self.id,
                        expected = current + 1,
                        got = s,
                        "non-consecutive sequence number"
                    );
                }
                self.seq = Some(s.max(current));
            } else {
                self.seq = Some(s);
            }
        }

        match pk.op {
            OpCode::Hello => self.handle_hello(pk, now),
            OpCode::Reconnect => {
                tracing::info!(shard = self.id, "gateway requested reconnect");
                vec![ShardAction::Destroy(DestroyOptions::with_code(RECONNECT_CLOSE_CODE))]
            }
            OpCode::InvalidSession => {
                if pk.as_invalid_session() == Some(true) {
                    tracing::info!(shard = self.id, "invalid session, resumable");
                    self.resume();
                } else {
                    tracing::warn!(shard = self.id, "invalid session, not resumable");
                    self.seq = None;
                    self.session.reset();
                    self.emit(ShardEvent::InvalidSession);
                }
                Vec::new()
            }
            OpCode::Heartbeat => {
                // requested heartbeats bypass the zombie policy
                self.send_heartbeat(now, "requested");
                Vec::new()
            }
            OpCode::HeartbeatAck => {
                self.heartbeat.ack(now);
                Vec::new()
            }
            OpCode::Dispatch => {
                self.handle_dispatch(pk, now);
                Vec::new()
            }
            op => {
                tracing::warn!(shard = self.id, %op, "client-only op received from gateway");
                Vec::new()
            }
        }
    }

    /// Periodic heartbeat attempt, driven by the runner's timer
    ///
    /// A missed ack outside the tolerant statuses is the zombie verdict:
    /// the runner destroys the shard with close 4009 and a session reset.
    pub fn beat(&mut self, now: Instant) -> BeatOutcome {
        if !self.heartbeat.acked() {
            if self.status.heartbeat_tolerant() {
                tracing::debug!(
                    shard = self.id,
                    status = %self.status,
                    "heartbeat not acked but status is tolerant, sending anyway"
                );
            } else {
                tracing::warn!(shard = self.id, "heartbeat not acked, connection is a zombie");
                return BeatOutcome::Zombie;
            }
        }
        self.send_heartbeat(now, "periodic");
        BeatOutcome::Sent
    }

    /// The hello deadline fired without a Hello
    ///
    /// Returns the destroy the runner must perform.
    pub fn hello_timed_out(&mut self) -> DestroyOptions {
        tracing::warn!(shard = self.id, "gateway sent no hello in time");
        DestroyOptions::with_code(RECONNECT_CLOSE_CODE).reset()
    }

    /// The ready-stabilization deadline fired
    pub fn guild_deadline_fired(&mut self) {
        if self.status == ShardStatus::WaitingForGuilds {
            self.finish_full_ready();
        } else {
            self.guild_deadline = None;
        }
    }

    /// The socket closed underneath the shard
    pub fn handle_close(&mut self, code: u16, remote: bool) {
        let resumable = self.session.resumable_after(code);
        if self.seq.is_some() {
            self.closing_seq = self.seq;
        }
        self.seq = None;
        self.socket_open = false;
        self.heartbeat.reset();
        self.session.hello();
        self.expecting_guilds = None;
        self.guild_deadline = None;
        self.status = ShardStatus::Disconnected;
        tracing::info!(shard = self.id, code, remote, resumable, "socket closed");
        self.emit(ShardEvent::Close { code, remote, resumable });
    }

    /// Tear the shard state down
    ///
    /// The runner closes the socket itself; this applies the state
    /// effects: heartbeat reset, persisted closing sequence, disconnected
    /// status, fresh bucket, cleared queues, optional session reset.
    pub fn destroy(&mut self, opts: DestroyOptions, now: Instant) {
        if opts.log {
            tracing::info!(shard = self.id, code = opts.code, reset = opts.reset, "destroying shard");
        }
        let resumable = !opts.reset && self.session.resumable_after(opts.code);
        if self.seq.is_some() {
            self.closing_seq = self.seq;
        }
        self.seq = None;
        self.socket_open = false;
        self.heartbeat.reset();
        self.expecting_guilds = None;
        self.guild_deadline = None;
        if opts.reset {
            self.session.reset();
        } else {
            self.session.hello();
        }
        self.bucket = SendBucket::new(now);
        self.pending.clear();
        self.status = ShardStatus::Disconnected;

        if opts.emit {
            self.emit(ShardEvent::Destroyed);
            self.emit(ShardEvent::Close { code: opts.code, remote: false, resumable });
        }
    }

    fn handle_hello(&mut self, pk: &GatewayPayload, now: Instant) -> Vec<ShardAction> {
        let Some(hello) = pk.as_hello() else {
            self.emit(ShardEvent::Error("hello payload missing heartbeat_interval".to_string()));
            return Vec::new();
        };
        let interval = Duration::from_millis(hello.heartbeat_interval);
        tracing::debug!(shard = self.id, interval_ms = hello.heartbeat_interval, "hello received");

        self.heartbeat.set_interval(interval);
        self.session.hello();
        self.identify_or_resume();
        self.send_heartbeat(now, "hello");

        vec![ShardAction::StartHeartbeat(interval)]
    }

    fn identify_or_resume(&mut self) {
        if self.session.id().is_some() {
            self.resume();
        } else {
            self.identify();
        }
    }

    /// Send op 2, claiming a fresh session on this shard slot
    fn identify(&mut self) {
        self.status = ShardStatus::Identifying;
        let body = IdentifyPayload {
            token: self.token.clone(),
            properties: self.properties.clone(),
            shard: [self.id, self.shard_count],
            intents: self.intents,
        };
        tracing::info!(shard = self.id, total = self.shard_count, "identifying");
        self.send(GatewayPayload::identify(&body), true);
    }

    /// Send op 6, reattaching to the stored session
    fn resume(&mut self) {
        let Some(session_id) = self.session.id().map(str::to_string) else {
            // nothing to resume; fall back to a fresh identify
            self.identify();
            return;
        };
        self.status = ShardStatus::Resuming;
        let body = ResumePayload {
            token: self.token.clone(),
            session_id,
            seq: self.closing_seq.unwrap_or(0),
        };
        tracing::info!(shard = self.id, seq = body.seq, "resuming session");
        self.send(GatewayPayload::resume(&body), true);
    }

    fn send_heartbeat(&mut self, now: Instant, reason: &str) {
        tracing::trace!(shard = self.id, reason, seq = ?self.seq, "sending heartbeat");
        self.send(GatewayPayload::heartbeat(self.seq), true);
        self.heartbeat.mark_sent(now);
    }

    fn handle_dispatch(&mut self, pk: &GatewayPayload, now: Instant) {
        self.emit(ShardEvent::Dispatch(pk.clone()));

        match pk.event_name() {
            Some("READY") => self.handle_ready(pk, now),
            Some("RESUMED") => {
                tracing::info!(shard = self.id, "session resumed");
                self.status = ShardStatus::Connected;
                self.emit(ShardEvent::Resumed);
            }
            Some("GUILD_CREATE") if self.status == ShardStatus::WaitingForGuilds => {
                self.handle_expected_guild(pk, now);
            }
            _ => {}
        }
    }

    fn handle_ready(&mut self, pk: &GatewayPayload, now: Instant) {
        let Some(ready) = pk.as_ready() else {
            self.emit(ShardEvent::Error("READY payload missing session_id".to_string()));
            return;
        };

        self.session.set_id(ready.session_id);
        let expecting: HashSet<String> = ready.guilds.into_iter().map(|g| g.id).collect();
        tracing::info!(shard = self.id, guilds = expecting.len(), "ready, waiting for guild stream");

        self.status = ShardStatus::WaitingForGuilds;
        self.expecting_guilds = Some(expecting);
        self.guild_deadline = Some(now + GUILD_CREATE_TIMEOUT);
        self.emit(ShardEvent::Ready);

        if self.expecting_guilds.as_ref().is_some_and(HashSet::is_empty) {
            self.finish_full_ready();
        }
    }

    fn handle_expected_guild(&mut self, pk: &GatewayPayload, now: Instant) {
        let guild_id = pk
            .d
            .as_ref()
            .and_then(|d| d.get("id"))
            .and_then(serde_json::Value::as_str);
        if let (Some(id), Some(expecting)) = (guild_id, self.expecting_guilds.as_mut()) {
            expecting.remove(id);
            if expecting.is_empty() {
                self.finish_full_ready();
                return;
            }
        }
        // each arrival pushes the stabilization window out again
        self.guild_deadline = Some(now + GUILD_CREATE_TIMEOUT);
    }

    fn finish_full_ready(&mut self) {
        let missing = self.expecting_guilds.take().unwrap_or_default();
        self.guild_deadline = None;
        self.status = ShardStatus::Ready;
        if !missing.is_empty() {
            tracing::warn!(shard = self.id, missing = missing.len(), "guild stream settled with guilds still unavailable");
        }
        self.emit(ShardEvent::FullReady { missing_guilds: missing });
    }

    pub(crate) fn emit(&self, event: ShardEvent) {
        let _ = self.signals.send(ShardSignal {
            shard_id: self.id,
            event,
        });
    }
}
