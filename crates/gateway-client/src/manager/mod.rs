//! Sharding supervisor
//!
//! Fetches the gateway metadata, computes the shard set, spawns shards
//! strictly serially through a connect queue under the identify quota, and
//! reacts to per-shard lifecycle signals with the appropriate recovery:
//! resume immediately, requeue for a fresh identify, or surface a fatal
//! error and stop.

use crate::codec::{Codec, Encoding};
use crate::events::{ManagerEvent, ShardEvent, ShardSignal};
use crate::intents::Intents;
use crate::protocol::{is_unrecoverable, GatewayBot, GatewayPayload, SessionStartLimit};
use crate::rest::RestClient;
use crate::shard::runner::{ShardCommand, ShardRunner};
use crate::shard::{DestroyOptions, Shard};
use dashmap::DashMap;
use gateway_common::{ClientOptions, Compression, GatewayError, GatewayResult};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

/// Pause between serial shard spawns, required by the identify rate limit
const SPAWN_DELAY: Duration = Duration::from_secs(5);

/// Backoff after a failed bootstrap fetch
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// What the supervisor does about a shard's close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReaction {
    /// Surface a fatal shard error; do not reconnect
    Fatal,
    /// The manager is destroyed; do nothing
    Stop,
    /// A session survived: reconnect immediately, bypassing the quota
    ResumeImmediately,
    /// Reset the session and requeue through the identify quota
    QueueIdentify,
}

/// Decide the recovery policy for a shard close
///
/// The unrecoverable code set only judges server-sent close frames;
/// locally initiated destroys (zombie, hello timeout, requested reconnect)
/// carry their own recovery intent and are requeued.
#[must_use]
pub fn close_reaction(code: u16, remote: bool, manager_destroyed: bool, resumable: bool) -> CloseReaction {
    if manager_destroyed {
        if code == 1000 {
            return CloseReaction::Fatal;
        }
        return CloseReaction::Stop;
    }
    if remote && is_unrecoverable(code) {
        return CloseReaction::Fatal;
    }
    if resumable {
        CloseReaction::ResumeImmediately
    } else {
        CloseReaction::QueueIdentify
    }
}

/// Take one identify slot from the cached quota
///
/// `Ok` means a slot was consumed (or no quota is known yet); `Err` holds
/// the time to sleep before the quota refreshes.
fn take_identify_slot(limit: &mut Option<SessionStartLimit>) -> Result<(), Duration> {
    match limit.as_mut() {
        None => Ok(()),
        Some(l) if l.remaining > 0 => {
            l.remaining -= 1;
            Ok(())
        }
        Some(l) => Err(Duration::from_millis(l.reset_after)),
    }
}

/// Build the gateway endpoint URL for a chosen host
fn gateway_endpoint(base: &str, encoding: Encoding, compression: Compression) -> String {
    let mut url = format!("{}/?encoding={}", base.trim_end_matches('/'), encoding.query_value());
    if compression.is_enabled() {
        url.push_str("&compress=zlib-stream");
    }
    url
}

/// Handle to a spawned shard runner
#[derive(Debug)]
struct ShardHandle {
    commands: mpsc::UnboundedSender<ShardCommand>,
}

#[derive(Debug)]
struct ManagerInner {
    token: OnceLock<String>,
    options: ClientOptions,
    encoding: Encoding,
    rest: RestClient,

    shards: DashMap<u32, ShardHandle>,
    queue: Mutex<VecDeque<u32>>,
    limit: Mutex<Option<SessionStartLimit>>,
    gateway_url: Mutex<Option<String>>,
    shard_count: AtomicU32,

    ready: AtomicBool,
    full_ready: Mutex<HashSet<u32>>,
    /// Guards against overlapping connect/reconnect cycles
    reconnecting: Mutex<()>,
    destroyed: AtomicBool,

    events: mpsc::UnboundedSender<ManagerEvent>,
    signals: mpsc::UnboundedSender<ShardSignal>,
    signals_rx: Mutex<Option<mpsc::UnboundedReceiver<ShardSignal>>>,
}

/// The sharding supervisor
///
/// Owns every shard; callers drive it with [`ShardManager::connect`] and
/// drain the [`ManagerEvent`] receiver returned at construction.
#[derive(Debug, Clone)]
pub struct ShardManager {
    inner: Arc<ManagerInner>,
}

impl ShardManager {
    /// Create a manager for a bot token
    ///
    /// The token is stored once and never replaced. Configuration problems
    /// (bad shard plan, unavailable codec) surface here.
    ///
    /// # Errors
    /// Returns a configuration error for an invalid option combination or
    /// an unavailable encoding.
    pub fn new(
        token: impl Into<String>,
        options: ClientOptions,
    ) -> GatewayResult<(Self, mpsc::UnboundedReceiver<ManagerEvent>)> {
        options
            .validate()
            .map_err(|e| GatewayError::configuration(e))?;

        let encoding = if options.use_etf { Encoding::Etf } else { Encoding::Json };
        // fail fast when the configured codec is unavailable
        Codec::new(encoding)?;

        let token = token.into();
        let rest = RestClient::new(&token)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();

        let token_cell = OnceLock::new();
        let _ = token_cell.set(token);

        let inner = Arc::new(ManagerInner {
            token: token_cell,
            options,
            encoding,
            rest,
            shards: DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            limit: Mutex::new(None),
            gateway_url: Mutex::new(None),
            shard_count: AtomicU32::new(0),
            ready: AtomicBool::new(false),
            full_ready: Mutex::new(HashSet::new()),
            reconnecting: Mutex::new(()),
            destroyed: AtomicBool::new(false),
            events: events_tx,
            signals: signals_tx,
            signals_rx: Mutex::new(Some(signals_rx)),
        });

        Ok((Self { inner }, events_rx))
    }

    /// Fetch gateway metadata and spawn every configured shard
    ///
    /// Shards are spawned strictly serially: one identify slot is taken
    /// per shard, with a 5 s pause between spawns. Bootstrap failures
    /// retry every 5 s; a 401 emits `Invalidated` and destroys the
    /// manager.
    ///
    /// # Errors
    /// Returns an error for a rejected token or an invalid shard plan.
    pub async fn connect(&self) -> GatewayResult<()> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            tracing::warn!("connect called on a destroyed manager");
            return Ok(());
        }

        // start the signal loop on first connect
        if let Some(rx) = self.inner.signals_rx.lock().await.take() {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(signal_loop(inner, rx));
        }

        let _guard = self.inner.reconnecting.lock().await;

        let bot = self.fetch_bootstrap().await?;
        tracing::info!(
            recommended = bot.shards,
            remaining = bot.session_start_limit.remaining,
            version = self.inner.options.version,
            "gateway bootstrap fetched"
        );

        let host = self
            .inner
            .options
            .url
            .clone()
            .unwrap_or_else(|| bot.url.clone());
        *self.inner.gateway_url.lock().await = Some(host);

        let (ids, count) = self
            .inner
            .options
            .resolve_shards(bot.shards)
            .map_err(|e| GatewayError::configuration(e))?;
        self.inner.shard_count.store(count, Ordering::SeqCst);
        *self.inner.limit.lock().await = Some(bot.session_start_limit);

        {
            let mut queue = self.inner.queue.lock().await;
            for id in ids {
                if !queue.contains(&id) {
                    queue.push_back(id);
                }
            }
        }

        self.inner.process_queue().await;
        Ok(())
    }

    /// Queue a payload on a shard (presence, voice state, member requests)
    ///
    /// # Errors
    /// Returns an error for an unknown shard or a dead runner.
    pub fn send(&self, shard_id: u32, payload: GatewayPayload, prioritized: bool) -> GatewayResult<()> {
        let handle = self
            .inner
            .shards
            .get(&shard_id)
            .ok_or_else(|| GatewayError::configuration(format!("unknown shard {shard_id}")))?;
        handle
            .commands
            .send(ShardCommand::Send { payload, prioritized })
            .map_err(|_| GatewayError::transport(format!("shard {shard_id} runner is gone")))
    }

    /// Tear down every shard and stop reconnecting
    ///
    /// Idempotent after the first call.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("destroying shard manager");
        self.inner.queue.lock().await.clear();
        for entry in self.inner.shards.iter() {
            let _ = entry.value().commands.send(ShardCommand::Destroy(DestroyOptions {
                code: 1000,
                reset: true,
                emit: false,
                log: false,
            }));
        }
    }

    /// The configured shard count, once known
    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.inner.shard_count.load(Ordering::SeqCst)
    }

    /// Whether every shard has finished its first full ready
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    /// Whether the manager was destroyed
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    async fn fetch_bootstrap(&self) -> GatewayResult<GatewayBot> {
        loop {
            match self.inner.rest.get_gateway_bot().await {
                Ok(bot) => return Ok(bot),
                Err(GatewayError::Invalidated) => {
                    tracing::error!("token rejected by the API");
                    self.inner.emit(ManagerEvent::Invalidated);
                    self.destroy().await;
                    return Err(GatewayError::Invalidated);
                }
                Err(e) => {
                    tracing::warn!(error = %e, delay = ?RECONNECT_DELAY, "bootstrap fetch failed, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

impl ManagerInner {
    fn emit(&self, event: ManagerEvent) {
        let _ = self.events.send(event);
    }

    /// Spawn queued shards serially under the identify quota
    ///
    /// Callers must hold the `reconnecting` guard.
    async fn process_queue(self: &Arc<Self>) {
        loop {
            if self.destroyed.load(Ordering::SeqCst) {
                return;
            }
            let next = self.queue.lock().await.pop_front();
            let Some(id) = next else { return };

            self.wait_for_quota().await;
            self.spawn_shard(id).await;

            if !self.queue.lock().await.is_empty() {
                tokio::time::sleep(SPAWN_DELAY).await;
            }
        }
    }

    /// Block until an identify slot is available, refreshing the cached
    /// quota after each sleep
    async fn wait_for_quota(self: &Arc<Self>) {
        loop {
            let wait = match take_identify_slot(&mut *self.limit.lock().await) {
                Ok(()) => return,
                Err(wait) => wait,
            };

            tracing::warn!(wait_ms = wait.as_millis() as u64, "identify quota exhausted, waiting for reset");
            tokio::time::sleep(wait).await;

            match self.rest.get_gateway_bot().await {
                Ok(bot) => {
                    *self.limit.lock().await = Some(bot.session_start_limit);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "quota refresh failed");
                    *self.limit.lock().await = None;
                }
            }
        }
    }

    /// Create (or reuse) a shard's runner and ask it to connect
    async fn spawn_shard(self: &Arc<Self>, id: u32) {
        if let Some(handle) = self.shards.get(&id) {
            tracing::info!(shard = id, "reconnecting managed shard");
            let _ = handle.commands.send(ShardCommand::Connect);
            return;
        }

        let Some(host) = self.gateway_url.lock().await.clone() else {
            tracing::error!(shard = id, "no gateway url known, cannot spawn");
            return;
        };
        let codec = match Codec::new(self.encoding) {
            Ok(codec) => codec,
            Err(e) => {
                // construction already validated this; surface and give up
                self.emit(ManagerEvent::ShardError {
                    shard_id: id,
                    message: e.to_string(),
                });
                return;
            }
        };

        let endpoint = gateway_endpoint(&host, self.encoding, self.options.compression);
        let token = self.token.get().cloned().unwrap_or_default();
        let intents = self.options.intents.unwrap_or(Intents::DEFAULT.bits());
        let count = self.shard_count.load(Ordering::SeqCst);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let shard = Shard::new(
            id,
            count,
            token,
            intents,
            self.options.properties.clone(),
            self.signals.clone(),
            Instant::now(),
        );
        let runner = ShardRunner::new(shard, codec, self.options.compression, endpoint, commands_rx);
        tokio::spawn(runner.run());

        tracing::info!(shard = id, total = count, "shard spawned");
        let _ = commands_tx.send(ShardCommand::Connect);
        self.shards.insert(id, ShardHandle { commands: commands_tx });
    }

    /// Requeue a shard and run a reconnect cycle when none is running
    async fn requeue(self: &Arc<Self>, id: u32) {
        {
            let mut queue = self.queue.lock().await;
            if !queue.contains(&id) {
                queue.push_back(id);
            }
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = inner.reconnecting.lock().await;
            inner.process_queue().await;
        });
    }

    fn send_to_shard(&self, id: u32, cmd: ShardCommand) {
        if let Some(handle) = self.shards.get(&id) {
            let _ = handle.commands.send(cmd);
        }
    }

    async fn handle_signal(self: &Arc<Self>, signal: ShardSignal) {
        let id = signal.shard_id;
        match signal.event {
            ShardEvent::Dispatch(payload) => {
                self.emit(ManagerEvent::Raw { shard_id: id, payload });
            }
            ShardEvent::Ready => {
                tracing::debug!(shard = id, "shard session established");
            }
            ShardEvent::Resumed => {
                tracing::debug!(shard = id, "shard session resumed");
            }
            ShardEvent::FullReady { missing_guilds } => {
                self.emit(ManagerEvent::ShardReady {
                    shard_id: id,
                    unavailable_guilds: missing_guilds,
                });
                let count = self.shard_count.load(Ordering::SeqCst);
                let all_ready = {
                    let mut full_ready = self.full_ready.lock().await;
                    full_ready.insert(id);
                    count > 0 && full_ready.len() as u32 >= count
                };
                if all_ready && !self.ready.swap(true, Ordering::SeqCst) {
                    tracing::info!(shards = count, "all shards ready");
                    self.emit(ManagerEvent::Ready);
                }
            }
            ShardEvent::InvalidSession => {
                // the shard already dropped its session; identify afresh
                self.emit(ManagerEvent::ShardReconnecting { shard_id: id });
                self.send_to_shard(
                    id,
                    ShardCommand::Destroy(DestroyOptions::default().reset().silent()),
                );
                self.requeue(id).await;
            }
            ShardEvent::Close { code, remote, resumable } => {
                self.emit(ManagerEvent::ShardDisconnected { shard_id: id, code });
                let destroyed = self.destroyed.load(Ordering::SeqCst);
                match close_reaction(code, remote, destroyed, resumable) {
                    CloseReaction::Fatal => {
                        tracing::error!(shard = id, code, "shard failed fatally");
                        self.emit(ManagerEvent::ShardError {
                            shard_id: id,
                            message: GatewayError::FatalClose { code }.to_string(),
                        });
                    }
                    CloseReaction::Stop => {}
                    CloseReaction::ResumeImmediately => {
                        // a resume does not consume the identify quota
                        tracing::info!(shard = id, code, "reconnecting to resume");
                        self.emit(ManagerEvent::ShardReconnecting { shard_id: id });
                        self.send_to_shard(id, ShardCommand::Connect);
                    }
                    CloseReaction::QueueIdentify => {
                        tracing::info!(shard = id, code, "requeueing for a fresh identify");
                        self.emit(ManagerEvent::ShardReconnecting { shard_id: id });
                        self.send_to_shard(
                            id,
                            ShardCommand::Destroy(DestroyOptions::default().reset().silent()),
                        );
                        self.requeue(id).await;
                    }
                }
            }
            ShardEvent::Destroyed => {
                tracing::debug!(shard = id, "shard destroyed");
            }
            ShardEvent::Error(message) => {
                self.emit(ManagerEvent::ShardError { shard_id: id, message });
            }
        }
    }
}

async fn signal_loop(inner: Arc<ManagerInner>, mut signals: mpsc::UnboundedReceiver<ShardSignal>) {
    while let Some(signal) = signals.recv().await {
        inner.handle_signal(signal).await;
    }
    tracing::debug!("signal loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(remaining: u32, reset_after: u64) -> Option<SessionStartLimit> {
        Some(SessionStartLimit {
            total: 1000,
            remaining,
            reset_after,
        })
    }

    #[test]
    fn test_identify_quota_consumed_serially() {
        let mut quota = limit(2, 60_000);

        assert!(take_identify_slot(&mut quota).is_ok());
        assert!(take_identify_slot(&mut quota).is_ok());
        // third identify must wait out the reset window
        assert_eq!(take_identify_slot(&mut quota), Err(Duration::from_millis(60_000)));

        // no known quota: proceed
        let mut unknown = None;
        assert!(take_identify_slot(&mut unknown).is_ok());
    }

    #[test]
    fn test_gateway_endpoint() {
        assert_eq!(
            gateway_endpoint("wss://g", Encoding::Json, Compression::None),
            "wss://g/?encoding=json"
        );
        assert_eq!(
            gateway_endpoint("wss://g/", Encoding::Json, Compression::ZlibStream),
            "wss://g/?encoding=json&compress=zlib-stream"
        );
        assert_eq!(
            gateway_endpoint("wss://g", Encoding::Etf, Compression::None),
            "wss://g/?encoding=etf"
        );
    }

    #[test]
    fn test_close_reaction_policy() {
        // remote unrecoverable codes are fatal (invalid intents, bad auth)
        assert_eq!(close_reaction(4013, true, false, false), CloseReaction::Fatal);
        assert_eq!(close_reaction(4004, true, false, true), CloseReaction::Fatal);

        // remote non-resumable codes force a fresh identify
        assert_eq!(close_reaction(4007, true, false, false), CloseReaction::QueueIdentify);
        assert_eq!(close_reaction(1000, true, false, false), CloseReaction::QueueIdentify);

        // a surviving session resumes immediately
        assert_eq!(close_reaction(4000, true, false, true), CloseReaction::ResumeImmediately);
        assert_eq!(close_reaction(1006, true, false, true), CloseReaction::ResumeImmediately);

        // local destroys carry their own intent, even for codes that would
        // be fatal coming from the server
        assert_eq!(close_reaction(4009, false, false, false), CloseReaction::QueueIdentify);
        assert_eq!(close_reaction(4000, false, false, true), CloseReaction::ResumeImmediately);

        // destroyed manager stops reconnecting
        assert_eq!(close_reaction(1000, true, true, false), CloseReaction::Fatal);
        assert_eq!(close_reaction(4000, true, true, true), CloseReaction::Stop);
    }

    #[tokio::test]
    async fn test_manager_construction_validates_options() {
        let bad = ClientOptions::new().with_shards(gateway_common::ShardPlan::Ids(vec![0, 1]));
        let err = ShardManager::new("token", bad).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));

        let etf = {
            let mut opts = ClientOptions::new();
            opts.use_etf = true;
            opts
        };
        let err = ShardManager::new("token", etf).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (manager, _events) = ShardManager::new("token", ClientOptions::new()).unwrap();
        assert!(!manager.is_destroyed());

        manager.destroy().await;
        assert!(manager.is_destroyed());
        manager.destroy().await;
        assert!(manager.is_destroyed());
    }

    #[tokio::test]
    async fn test_full_ready_signals_drive_manager_ready() {
        let (manager, mut events) = ShardManager::new("token", ClientOptions::new()).unwrap();
        manager.inner.shard_count.store(2, Ordering::SeqCst);

        let signal = |id| ShardSignal {
            shard_id: id,
            event: ShardEvent::FullReady {
                missing_guilds: HashSet::new(),
            },
        };

        manager.inner.handle_signal(signal(0)).await;
        assert!(!manager.is_ready());
        assert!(matches!(
            events.try_recv().unwrap(),
            ManagerEvent::ShardReady { shard_id: 0, .. }
        ));

        // a repeat from the same shard does not complete the set
        manager.inner.handle_signal(signal(0)).await;
        assert!(!manager.is_ready());

        manager.inner.handle_signal(signal(1)).await;
        assert!(manager.is_ready());

        let mut saw_ready = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ManagerEvent::Ready) {
                saw_ready = true;
            }
        }
        assert!(saw_ready);

        // ready fires exactly once per lifetime
        manager.inner.handle_signal(signal(1)).await;
        assert!(events.try_recv().into_iter().all(|e| !matches!(e, ManagerEvent::Ready)));
    }

    #[tokio::test]
    async fn test_fatal_close_surfaces_shard_error() {
        let (manager, mut events) = ShardManager::new("token", ClientOptions::new()).unwrap();

        manager
            .inner
            .handle_signal(ShardSignal {
                shard_id: 3,
                event: ShardEvent::Close {
                    code: 4013,
                    remote: true,
                    resumable: false,
                },
            })
            .await;

        assert!(matches!(
            events.try_recv().unwrap(),
            ManagerEvent::ShardDisconnected { shard_id: 3, code: 4013 }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            ManagerEvent::ShardError { shard_id: 3, .. }
        ));
        // fatal closes are not requeued
        assert!(manager.inner.queue.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_nonresumable_close_requeues_for_identify() {
        let (manager, mut events) = ShardManager::new("token", ClientOptions::new()).unwrap();

        // hold the cycle guard so the spawned reconnect cycle cannot drain
        // the queue before we inspect it
        let guard = manager.inner.reconnecting.lock().await;

        manager
            .inner
            .handle_signal(ShardSignal {
                shard_id: 1,
                event: ShardEvent::Close {
                    code: 4007,
                    remote: true,
                    resumable: false,
                },
            })
            .await;

        assert!(matches!(
            events.try_recv().unwrap(),
            ManagerEvent::ShardDisconnected { shard_id: 1, code: 4007 }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            ManagerEvent::ShardReconnecting { shard_id: 1 }
        ));
        assert!(manager.inner.queue.lock().await.contains(&1));
        drop(guard);
    }

    #[tokio::test]
    async fn test_resumable_close_reconnects_without_requeue() {
        let (manager, mut events) = ShardManager::new("token", ClientOptions::new()).unwrap();

        manager
            .inner
            .handle_signal(ShardSignal {
                shard_id: 0,
                event: ShardEvent::Close {
                    code: 4000,
                    remote: true,
                    resumable: true,
                },
            })
            .await;

        assert!(matches!(
            events.try_recv().unwrap(),
            ManagerEvent::ShardDisconnected { shard_id: 0, code: 4000 }
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            ManagerEvent::ShardReconnecting { shard_id: 0 }
        ));
        // a resume bypasses the identify queue entirely
        assert!(manager.inner.queue.lock().await.is_empty());
    }
}
