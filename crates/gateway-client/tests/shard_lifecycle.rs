//! End-to-end shard lifecycle tests
//!
//! Drives the shard state machine, codec and inflater through the
//! protocol flows a live gateway produces: handshake, ready
//! stabilization, heartbeat loss, session resume and recovery policy.

use gateway_client::manager::{close_reaction, CloseReaction};
use gateway_client::shard::GUILD_CREATE_TIMEOUT;
use gateway_client::{
    Codec, DestroyOptions, EncodedFrame, GatewayPayload, IdentifyProperties, Inflater, Intents,
    OpCode, Shard, ShardEvent, ShardStatus, WireInput,
};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

type SignalRx = mpsc::UnboundedReceiver<gateway_client::events::ShardSignal>;

fn spawn_shard(id: u32, count: u32) -> (Shard, SignalRx) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shard = Shard::new(
        id,
        count,
        "Bot secret",
        Intents::DEFAULT.bits(),
        IdentifyProperties::default(),
        tx,
        Instant::now(),
    );
    (shard, rx)
}

fn payload(value: serde_json::Value) -> GatewayPayload {
    serde_json::from_value(value).expect("test payload")
}

fn hello(interval_ms: u64) -> GatewayPayload {
    payload(json!({"op": 10, "d": {"heartbeat_interval": interval_ms}}))
}

fn ready(session: &str, guilds: &[&str], seq: u64) -> GatewayPayload {
    let guilds: Vec<_> = guilds.iter().map(|id| json!({"id": id, "unavailable": true})).collect();
    payload(json!({
        "op": 0, "t": "READY", "s": seq,
        "d": {"session_id": session, "guilds": guilds}
    }))
}

fn guild_create(id: &str, seq: u64) -> GatewayPayload {
    payload(json!({"op": 0, "t": "GUILD_CREATE", "s": seq, "d": {"id": id}}))
}

fn open(shard: &mut Shard, now: Instant) {
    shard.begin_connect(now);
    shard.handle_open(now);
}

fn drain(shard: &mut Shard, now: Instant) -> Vec<GatewayPayload> {
    std::iter::from_fn(|| shard.next_send(now)).collect()
}

/// Handshake to full ready: hello, identify, READY, guild stream.
#[test]
fn handshake_reaches_full_ready() {
    let (mut shard, mut rx) = spawn_shard(0, 2);
    let now = Instant::now();
    open(&mut shard, now);

    shard.handle_payload(&hello(45_000), now);
    assert_eq!(shard.status(), ShardStatus::Identifying);

    // identify leaves first, carrying the shard tuple and intents
    let sends = drain(&mut shard, now);
    assert_eq!(sends[0].op, OpCode::Identify);
    let d = sends[0].d.as_ref().unwrap();
    assert_eq!(d["shard"], json!([0, 2]));
    assert_eq!(d["intents"], json!(Intents::DEFAULT.bits()));

    shard.handle_payload(&ready("S1", &["A", "B"], 1), now);
    assert_eq!(shard.status(), ShardStatus::WaitingForGuilds);

    shard.handle_payload(&guild_create("A", 2), now);
    shard.handle_payload(&guild_create("B", 3), now);
    assert_eq!(shard.status(), ShardStatus::Ready);

    let mut full_ready_missing = None;
    while let Ok(signal) = rx.try_recv() {
        if let ShardEvent::FullReady { missing_guilds } = signal.event {
            full_ready_missing = Some(missing_guilds);
        }
    }
    assert_eq!(full_ready_missing.expect("full ready emitted").len(), 0);
}

/// Hello then READY with guilds A and B, but only A's GUILD_CREATE
/// arrives: after the stabilization window the shard reports B missing.
#[test]
fn ready_stabilization_times_out_with_missing_guilds() {
    let (mut shard, mut rx) = spawn_shard(0, 1);
    let now = Instant::now();
    open(&mut shard, now);
    shard.handle_payload(&hello(45_000), now);
    shard.handle_payload(&ready("S1", &["A", "B"], 1), now);

    shard.handle_payload(&guild_create("A", 2), now);
    // the arrival pushed the deadline out again
    assert_eq!(shard.guild_deadline(), Some(now + GUILD_CREATE_TIMEOUT));

    shard.guild_deadline_fired();
    assert_eq!(shard.status(), ShardStatus::Ready);

    let missing = std::iter::from_fn(|| rx.try_recv().ok())
        .find_map(|signal| match signal.event {
            ShardEvent::FullReady { missing_guilds } => Some(missing_guilds),
            _ => None,
        })
        .expect("full ready emitted");
    assert_eq!(missing.len(), 1);
    assert!(missing.contains("B"));
}

/// The harness stops acking: within two interval periods the shard
/// reports a zombie and the destroy carries 4009 + reset.
#[test]
fn unacked_heartbeats_zombie_the_connection() {
    let (mut shard, mut rx) = spawn_shard(0, 1);
    let mut now = Instant::now();
    open(&mut shard, now);
    shard.handle_payload(&hello(45_000), now);
    shard.handle_payload(&ready("S1", &[], 1), now);
    assert_eq!(shard.status(), ShardStatus::Ready);

    // the hello-time heartbeat was sent and never acked
    now += Duration::from_secs(45);
    assert_eq!(shard.beat(now), gateway_client::shard::BeatOutcome::Zombie);

    // the runner's reaction to a zombie
    shard.destroy(DestroyOptions::with_code(4009).reset(), now);
    assert_eq!(shard.status(), ShardStatus::Disconnected);
    assert!(shard.session().id().is_none());

    let close = std::iter::from_fn(|| rx.try_recv().ok())
        .find_map(|signal| match signal.event {
            ShardEvent::Close { code, remote, resumable } => Some((code, remote, resumable)),
            _ => None,
        })
        .expect("close signal");
    assert_eq!(close, (4009, false, false));
}

/// While acks keep flowing the heartbeat never zombies and latency stays
/// measured.
#[test]
fn acked_heartbeats_run_indefinitely() {
    let (mut shard, _rx) = spawn_shard(0, 1);
    let mut now = Instant::now();
    open(&mut shard, now);
    shard.handle_payload(&hello(45_000), now);
    shard.handle_payload(&ready("S1", &[], 1), now);

    for _ in 0..100 {
        shard.handle_payload(&payload(json!({"op": 11})), now + Duration::from_millis(25));
        now += Duration::from_secs(45);
        assert_eq!(shard.beat(now), gateway_client::shard::BeatOutcome::Sent);
    }
    assert_eq!(shard.latency(), Some(Duration::from_millis(25)));
}

/// Resume correctness: after a resumable close, the next handshake sends
/// op 6 with the captured session id and closing sequence.
#[test]
fn resume_uses_captured_session_and_sequence() {
    let (mut shard, _rx) = spawn_shard(0, 1);
    let now = Instant::now();
    open(&mut shard, now);
    shard.handle_payload(&hello(45_000), now);
    shard.handle_payload(&ready("S", &[], 1), now);
    shard.handle_payload(&payload(json!({"op": 0, "t": "MESSAGE_CREATE", "s": 42, "d": {}})), now);
    drain(&mut shard, now);

    shard.handle_close(4000, true);
    assert_eq!(shard.closing_seq(), Some(42));

    open(&mut shard, now);
    shard.handle_payload(&hello(45_000), now);
    assert_eq!(shard.status(), ShardStatus::Resuming);

    let sends = drain(&mut shard, now);
    assert_eq!(sends[0].op, OpCode::Resume);
    let d = sends[0].d.as_ref().unwrap();
    assert_eq!(d["session_id"], "S");
    assert_eq!(d["seq"], json!(42));
}

/// Reset correctness: a close in the non-resumable set clears the session
/// and the next handshake is op 2, not op 6.
#[test]
fn nonresumable_close_forces_fresh_identify() {
    let (mut shard, _rx) = spawn_shard(0, 1);
    let now = Instant::now();
    open(&mut shard, now);
    shard.handle_payload(&hello(45_000), now);
    shard.handle_payload(&ready("S", &[], 1), now);
    shard.handle_payload(&payload(json!({"op": 0, "t": "X", "s": 42, "d": {}})), now);

    shard.handle_close(4007, true);
    // the supervisor's reaction: reset before requeueing
    assert_eq!(close_reaction(4007, true, false, false), CloseReaction::QueueIdentify);
    shard.destroy(DestroyOptions::default().reset().silent(), now);
    assert!(shard.session().id().is_none());

    open(&mut shard, now);
    shard.handle_payload(&hello(45_000), now);
    assert_eq!(shard.status(), ShardStatus::Identifying);
    let sends = drain(&mut shard, now);
    assert_eq!(sends[0].op, OpCode::Identify);
}

/// An unrecoverable close (invalid intents) is surfaced, not retried.
#[test]
fn invalid_intents_close_is_fatal() {
    assert_eq!(close_reaction(4013, true, false, false), CloseReaction::Fatal);
    assert_eq!(close_reaction(4013, true, false, true), CloseReaction::Fatal);
}

/// A full frame pipeline: compressed bytes in, decoded payloads out, in
/// order, across arbitrary chunk boundaries.
#[test]
fn compressed_pipeline_preserves_message_order() {
    use flate2_helpers::compress_stream;

    let first = json!({"op": 0, "t": "MESSAGE_CREATE", "s": 1, "d": {"id": "m1"}}).to_string();
    let second = json!({"op": 0, "t": "MESSAGE_CREATE", "s": 2, "d": {"id": "m2"}}).to_string();
    let frames = compress_stream(&[first.as_bytes(), second.as_bytes()]);

    // deliver as [A1 A2] then [A3+suffix B+suffix]
    let a = &frames[0];
    let cut = a.len() / 3;
    let mut tail = a[cut..].to_vec();
    tail.extend_from_slice(&frames[1]);

    let mut inflater = Inflater::new();
    let codec = Codec::new(gateway_client::Encoding::Json).unwrap();

    assert!(inflater.push(&a[..cut]).unwrap().is_empty());
    let messages = inflater.push(&tail).unwrap();
    assert_eq!(messages.len(), 2);

    let decoded: Vec<GatewayPayload> = messages
        .iter()
        .map(|m| codec.decode(WireInput::Binary(m)).unwrap())
        .collect();
    assert_eq!(decoded[0].s, Some(1));
    assert_eq!(decoded[1].s, Some(2));
    assert_eq!(decoded[0].d.as_ref().unwrap()["id"], "m1");
    assert_eq!(decoded[1].d.as_ref().unwrap()["id"], "m2");
}

/// Outbound frames survive a closed socket and respect priority when the
/// connection returns.
#[test]
fn parked_sends_drain_in_priority_order() {
    let (mut shard, _rx) = spawn_shard(0, 1);
    let now = Instant::now();

    shard.send(GatewayPayload::request_guild_members(json!({"guild_id": "g"})), false);
    shard.send(GatewayPayload::presence_update(json!({"status": "idle"})), false);
    shard.send(GatewayPayload::heartbeat(None), true);
    assert_eq!(shard.pending_len(), 3);

    open(&mut shard, now);
    let sends = drain(&mut shard, now);
    let ops: Vec<OpCode> = sends.iter().map(|p| p.op).collect();
    assert_eq!(
        ops,
        vec![OpCode::Heartbeat, OpCode::RequestGuildMembers, OpCode::PresenceUpdate]
    );
}

/// The encode side of the pipeline produces text frames the decode side
/// accepts unchanged.
#[test]
fn codec_roundtrip_through_wire_text() {
    let codec = Codec::new(gateway_client::Encoding::Json).unwrap();
    let payload = GatewayPayload::heartbeat(Some(7));

    let EncodedFrame::Text(text) = codec.encode(&payload).unwrap() else {
        panic!("json encodes to text");
    };
    let back = codec.decode(WireInput::Text(&text)).unwrap();
    assert_eq!(back.op, OpCode::Heartbeat);
}

mod flate2_helpers {
    use flate2::{Compress, Compression, FlushCompress};
    use gateway_client::compress::ZLIB_SUFFIX;

    /// Compress messages onto one deflate stream with a sync flush after
    /// each, the way the gateway frames its zlib stream.
    pub fn compress_stream(messages: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut compressor = Compress::new(Compression::default(), true);
        let mut frames = Vec::new();

        for msg in messages {
            let mut out = Vec::with_capacity(msg.len() + 64);
            let mut consumed = 0usize;
            loop {
                if out.len() == out.capacity() {
                    out.reserve(64);
                }
                let before_in = compressor.total_in();
                compressor
                    .compress_vec(&msg[consumed..], &mut out, FlushCompress::Sync)
                    .expect("compress");
                consumed += (compressor.total_in() - before_in) as usize;
                if consumed >= msg.len() && out.ends_with(&ZLIB_SUFFIX) {
                    break;
                }
            }
            frames.push(out);
        }

        frames
    }
}
