//! Shard socket task
//!
//! One task per shard owns the WebSocket, the timers (hello deadline,
//! heartbeat cadence, ready stabilization, bucket pacing) and the command
//! channel from the supervisor. Decoded payloads feed the state machine;
//! the actions that come back are executed here. Dropping out of a
//! connection always leaves the shard in `Disconnected` with a close
//! signal sent, so the supervisor can apply its recovery policy.

use crate::codec::{Codec, EncodedFrame, WireInput};
use crate::compress::Inflater;
use crate::events::ShardEvent;
use crate::protocol::GatewayPayload;
use crate::shard::{
    BeatOutcome, DestroyOptions, Shard, ShardAction, ShardStatus, RECONNECT_CLOSE_CODE,
    ZOMBIE_CLOSE_CODE,
};
use futures_util::{SinkExt, StreamExt};
use gateway_common::{Compression, GatewayError, GatewayResult};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the stream ends without a close frame
const NO_STATUS_CLOSE_CODE: u16 = 1005;

/// Close code reported for abnormal transport failures
const ABNORMAL_CLOSE_CODE: u16 = 1006;

/// Commands the supervisor sends to a shard's runner
#[derive(Debug)]
pub(crate) enum ShardCommand {
    /// Open (or reopen) the gateway connection
    Connect,
    /// Queue an outbound payload
    Send {
        payload: GatewayPayload,
        prioritized: bool,
    },
    /// Tear the connection down
    Destroy(DestroyOptions),
}

/// The per-shard socket task
pub(crate) struct ShardRunner {
    shard: Shard,
    codec: Codec,
    compression: Compression,
    inflater: Option<Inflater>,
    url: String,
    commands: mpsc::UnboundedReceiver<ShardCommand>,
    next_beat: Option<Instant>,
}

impl ShardRunner {
    pub(crate) fn new(
        shard: Shard,
        codec: Codec,
        compression: Compression,
        url: String,
        commands: mpsc::UnboundedReceiver<ShardCommand>,
    ) -> Self {
        Self {
            shard,
            codec,
            compression,
            inflater: None,
            url,
            commands,
            next_beat: None,
        }
    }

    /// Run until the supervisor drops the command channel
    pub(crate) async fn run(mut self) {
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                ShardCommand::Connect => match self.run_connection().await {
                    Ok(()) => {}
                    Err(e) => {
                        tracing::warn!(shard = self.shard.id(), error = %e, "connection attempt failed");
                        self.shard.emit(ShardEvent::Error(e.to_string()));
                        if self.shard.status() != ShardStatus::Disconnected {
                            self.shard.handle_close(ABNORMAL_CLOSE_CODE, false);
                        }
                    }
                },
                ShardCommand::Send { payload, prioritized } => {
                    // not connected: parks in the unsent queue
                    self.shard.send(payload, prioritized);
                }
                ShardCommand::Destroy(opts) => {
                    self.shard.destroy(opts, Instant::now());
                }
            }
        }
        tracing::debug!(shard = self.shard.id(), "runner shutting down");
    }

    /// One full connection: open, drive, and always leave disconnected
    async fn run_connection(&mut self) -> GatewayResult<()> {
        let now = Instant::now();
        self.shard.begin_connect(now);
        self.inflater = self.compression.is_enabled().then(Inflater::new);
        self.next_beat = None;

        let (mut ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| GatewayError::transport(format!("websocket handshake: {e}")))?;
        self.shard.handle_open(Instant::now());

        self.drive(&mut ws).await
    }

    /// Pump frames, commands and timers until the connection ends
    async fn drive(&mut self, ws: &mut WsStream) -> GatewayResult<()> {
        loop {
            self.flush_sends(ws).await?;
            let deadline = self.next_deadline();

            tokio::select! {
                frame = ws.next() => {
                    let now = Instant::now();
                    match frame {
                        Some(Ok(msg)) => {
                            if self.handle_message(ws, msg, now).await? {
                                return Ok(());
                            }
                        }
                        Some(Err(e)) => {
                            self.shard.emit(ShardEvent::Error(format!("websocket error: {e}")));
                            self.shard.handle_close(ABNORMAL_CLOSE_CODE, true);
                            return Ok(());
                        }
                        None => {
                            self.shard.handle_close(ABNORMAL_CLOSE_CODE, true);
                            return Ok(());
                        }
                    }
                }
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(ShardCommand::Send { payload, prioritized }) => {
                            self.shard.send(payload, prioritized);
                        }
                        Some(ShardCommand::Destroy(opts)) => {
                            self.close_socket(ws, opts.code).await;
                            self.shard.destroy(opts, Instant::now());
                            return Ok(());
                        }
                        Some(ShardCommand::Connect) => {
                            tracing::debug!(shard = self.shard.id(), "connect requested while connected");
                        }
                        None => {
                            // supervisor gone: quiet teardown
                            self.close_socket(ws, 1000).await;
                            self.shard.destroy(DestroyOptions::default().silent(), Instant::now());
                            return Ok(());
                        }
                    }
                }
                () = sleep_until_opt(deadline) => {
                    if self.fire_deadlines(ws).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Encode and send everything the bucket releases
    async fn flush_sends(&mut self, ws: &mut WsStream) -> GatewayResult<()> {
        loop {
            let Some(payload) = self.shard.next_send(Instant::now()) else {
                return Ok(());
            };
            match self.codec.encode(&payload) {
                Ok(EncodedFrame::Text(text)) => ws
                    .send(Message::Text(text))
                    .await
                    .map_err(|e| GatewayError::transport(format!("websocket send: {e}")))?,
                Ok(EncodedFrame::Binary(bytes)) => ws
                    .send(Message::Binary(bytes))
                    .await
                    .map_err(|e| GatewayError::transport(format!("websocket send: {e}")))?,
                Err(e) => {
                    // drop the unencodable payload, keep the connection
                    self.shard.emit(ShardEvent::Error(e.to_string()));
                }
            }
        }
    }

    /// Returns `true` when the connection ended
    async fn handle_message(
        &mut self,
        ws: &mut WsStream,
        msg: Message,
        now: Instant,
    ) -> GatewayResult<bool> {
        match msg {
            Message::Text(text) => {
                let decoded = self.codec.decode(WireInput::Text(&text));
                self.dispatch_decoded(ws, decoded, now).await
            }
            Message::Binary(bytes) => {
                if self.inflater.is_some() {
                    self.handle_compressed(ws, &bytes, now).await
                } else {
                    let decoded = self.codec.decode(WireInput::Binary(&bytes));
                    self.dispatch_decoded(ws, decoded, now).await
                }
            }
            Message::Close(frame) => {
                let code = frame.map_or(NO_STATUS_CLOSE_CODE, |f| u16::from(f.code));
                self.shard.handle_close(code, true);
                Ok(true)
            }
            // pings are answered by tungstenite itself
            _ => Ok(false),
        }
    }

    async fn handle_compressed(
        &mut self,
        ws: &mut WsStream,
        bytes: &[u8],
        now: Instant,
    ) -> GatewayResult<bool> {
        let Some(inflater) = self.inflater.as_mut() else {
            return Ok(false);
        };
        let messages = match inflater.push(bytes) {
            Ok(messages) => messages,
            Err(e) => {
                // a corrupt stream cannot recover in place
                tracing::error!(shard = self.shard.id(), error = %e, "decompression failed");
                self.shard.emit(ShardEvent::Error(e.to_string()));
                let opts = DestroyOptions::with_code(RECONNECT_CLOSE_CODE);
                self.close_socket(ws, opts.code).await;
                self.shard.destroy(opts, now);
                return Ok(true);
            }
        };

        for message in messages {
            let decoded = self.codec.decode(WireInput::Binary(&message));
            if self.dispatch_decoded(ws, decoded, now).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn dispatch_decoded(
        &mut self,
        ws: &mut WsStream,
        decoded: GatewayResult<GatewayPayload>,
        now: Instant,
    ) -> GatewayResult<bool> {
        let payload = match decoded {
            Ok(payload) => payload,
            Err(e) => {
                // per-frame failure: drop the frame, keep the connection
                tracing::warn!(shard = self.shard.id(), error = %e, "dropping undecodable frame");
                self.shard.emit(ShardEvent::Error(e.to_string()));
                return Ok(false);
            }
        };

        for action in self.shard.handle_payload(&payload, now) {
            match action {
                ShardAction::StartHeartbeat(interval) => {
                    self.next_beat = Some(now + interval);
                }
                ShardAction::Destroy(opts) => {
                    self.close_socket(ws, opts.code).await;
                    self.shard.destroy(opts, now);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Returns `true` when a deadline ended the connection
    async fn fire_deadlines(&mut self, ws: &mut WsStream) -> GatewayResult<bool> {
        let now = Instant::now();

        if self.shard.session().hello_deadline().is_some_and(|d| d <= now) {
            let opts = self.shard.hello_timed_out();
            self.close_socket(ws, opts.code).await;
            self.shard.destroy(opts, now);
            return Ok(true);
        }

        if self.shard.guild_deadline().is_some_and(|d| d <= now) {
            self.shard.guild_deadline_fired();
        }

        if self.next_beat.is_some_and(|d| d <= now) {
            match self.shard.beat(now) {
                BeatOutcome::Sent => {
                    if let Some(interval) = self.shard.heartbeat().interval() {
                        self.next_beat = Some(now + interval);
                    }
                }
                BeatOutcome::Zombie => {
                    let opts = DestroyOptions::with_code(ZOMBIE_CLOSE_CODE).reset();
                    self.close_socket(ws, opts.code).await;
                    self.shard.destroy(opts, now);
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    /// Earliest pending timer or pacing deadline
    fn next_deadline(&self) -> Option<Instant> {
        let now = Instant::now();
        let bucket = self.shard.next_send_in(now).map(|wait| now + wait);
        [
            self.shard.session().hello_deadline(),
            self.shard.guild_deadline(),
            self.next_beat,
            bucket,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    async fn close_socket(&mut self, ws: &mut WsStream, code: u16) {
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: "".into(),
        };
        if let Err(e) = ws.close(Some(frame)).await {
            tracing::trace!(shard = self.shard.id(), error = %e, "socket close");
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
