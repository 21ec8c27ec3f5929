//! Per-connection session pipeline.
//!
//! Each accepted connection runs one session: handshake (identity exchange,
//! bounded by a timeout), then a read loop feeding the frame decoder and the
//! bounded inbox, a dispatcher draining the inbox into the router, and a
//! writer task that stamps link sequence numbers on outbound frames. A fatal
//! error in one session's pipeline never affects other sessions.
//!
//! Lifecycle: Connecting -> Handshaking -> Active -> Draining -> Closed.

use crate::inbox::{inbox, Inbound, Inbox, InboxReceiver, SeqCheck, SequenceTracker};
use crate::node::NodeMetrics;
use crate::router::Router;
use crate::routes::{RouteEntry, RouteTable, SessionState};
use agent_messenger_types::{Message, MessageKind, MessengerConfig, PeerId};
use agent_messenger_wire::{frame, BoxedConn, ControlFrame, FrameDecoder, WireError, PROTOCOL_VERSION};
use chrono::Utc;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Everything a session needs from the node that spawned it.
pub(crate) struct SessionContext {
    pub node_id: PeerId,
    pub config: MessengerConfig,
    pub routes: RouteTable,
    pub router: Arc<Router>,
    pub metrics: Arc<NodeMetrics>,
    pub shutdown: watch::Receiver<bool>,
    /// Unique token for this session; guards route-table teardown against
    /// a reconnect under the same peer id.
    pub session: u64,
}

/// Why a session's read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    EndOfStream,
    Malformed,
    CloseRequested,
    Shutdown,
}

/// Read one complete frame, pulling more bytes as needed.
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
) -> Result<Message, WireError> {
    let mut buf = [0u8; 8192];
    loop {
        if let Some(msg) = decoder.next()? {
            return Ok(msg);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(WireError::ConnectionClosed);
        }
        decoder.feed(&buf[..n]);
    }
}

/// Validate the first frame of a connection as a Hello.
fn parse_hello(msg: &Message) -> Result<PeerId, WireError> {
    if msg.kind != MessageKind::Control {
        return Err(WireError::HandshakeFailed(
            "first frame must be a Hello control frame".to_string(),
        ));
    }
    match ControlFrame::from_message(msg)? {
        ControlFrame::Hello {
            peer_id,
            protocol_version,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                return Err(WireError::VersionMismatch {
                    local: PROTOCOL_VERSION,
                    remote: protocol_version,
                });
            }
            Ok(peer_id)
        }
        other => Err(WireError::HandshakeFailed(format!(
            "expected Hello, got {other:?}"
        ))),
    }
}

/// Run one session to completion. Spawned per accepted connection; owns the
/// whole pipeline for that connection.
pub(crate) async fn run_session(ctx: SessionContext, conn: BoxedConn, remote_addr: String) {
    debug!(remote = %remote_addr, "session handshaking");
    let (mut reader, writer) = tokio::io::split(conn);
    let mut decoder = FrameDecoder::new(ctx.config.max_frame_bytes);

    // Handshaking: the peer must identify itself within the bounded window.
    let hello = match timeout(
        ctx.config.handshake_timeout(),
        read_frame(&mut reader, &mut decoder),
    )
    .await
    {
        Ok(Ok(msg)) => msg,
        Ok(Err(e)) => {
            warn!(remote = %remote_addr, error = %e, "handshake failed");
            ctx.metrics.record_handshake_failure();
            return;
        }
        Err(_) => {
            warn!(remote = %remote_addr, "handshake timed out");
            ctx.metrics.record_handshake_failure();
            return;
        }
    };
    let peer_id = match parse_hello(&hello) {
        Ok(id) => id,
        Err(e) => {
            warn!(remote = %remote_addr, error = %e, "handshake rejected");
            ctx.metrics.record_handshake_failure();
            return;
        }
    };

    let mut tracker = SequenceTracker::new();
    // The Hello consumed the first link sequence number.
    tracker.observe(hello.sequence);

    // Outbound path: the writer owns sequence stamping for this link.
    let (out_tx, out_rx) = mpsc::channel::<Message>(ctx.config.queue_capacity);
    let mut writer_handle = tokio::spawn(write_loop(writer, out_rx));

    let ack = ControlFrame::HelloAck {
        peer_id: ctx.node_id.clone(),
        protocol_version: PROTOCOL_VERSION,
        peers: ctx.routes.connected_ids(),
    }
    .into_message(ctx.node_id.clone());
    let ack = match ack {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "failed to build HelloAck");
            ctx.metrics.record_handshake_failure();
            return;
        }
    };
    if out_tx.send(ack).await.is_err() {
        ctx.metrics.record_handshake_failure();
        return;
    }

    // Active: install the route.
    let (close_tx, mut close_rx) = watch::channel(false);
    let dispatcher_close = close_tx.clone();
    ctx.routes.insert(RouteEntry {
        peer_id: peer_id.clone(),
        address: remote_addr.clone(),
        state: SessionState::Active,
        connected_at: Utc::now(),
        last_seen: Utc::now(),
        session: ctx.session,
        outbound: out_tx.clone(),
        close: close_tx,
    });
    ctx.metrics.record_session_opened();
    info!(peer = %peer_id, remote = %remote_addr, "session established");

    // Replay stored messages for this peer, if a store is configured.
    if let Some(store) = ctx.router.store() {
        match store.replay(&peer_id, 0).await {
            Ok(messages) if !messages.is_empty() => {
                info!(peer = %peer_id, count = messages.len(), "replaying stored messages");
                for msg in messages {
                    if out_tx.send(msg).await.is_err() {
                        break;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(peer = %peer_id, error = %e, "replay failed"),
        }
    }

    let (in_tx, in_rx) = inbox(ctx.config.queue_capacity);
    let mut dispatcher_handle = tokio::spawn(dispatch_loop(
        in_rx,
        Arc::clone(&ctx.router),
        ctx.routes.clone(),
        peer_id.clone(),
        dispatcher_close,
    ));

    let reason = read_loop(
        &mut reader,
        decoder,
        &mut tracker,
        in_tx,
        &ctx,
        &peer_id,
        &mut close_rx,
    )
    .await;

    // Draining: stop reading, flush what is queued, bounded by the grace
    // period, then tear down.
    ctx.routes.mark(&peer_id, ctx.session, SessionState::Draining);
    debug!(peer = %peer_id, ?reason, "session draining");

    if timeout(ctx.config.flush_grace(), &mut dispatcher_handle)
        .await
        .is_err()
    {
        warn!(peer = %peer_id, "dispatcher did not drain within grace period; aborting");
        dispatcher_handle.abort();
    }

    ctx.routes.remove_session(&peer_id, ctx.session);
    drop(out_tx);
    // Aborting a stalled writer drops the outbound receiver; a dispatcher in
    // another session blocked on this peer's queue sees the channel close.
    if timeout(ctx.config.flush_grace(), &mut writer_handle)
        .await
        .is_err()
    {
        warn!(peer = %peer_id, "writer did not flush within grace period; aborting");
        writer_handle.abort();
    }

    ctx.metrics.record_session_closed();
    info!(peer = %peer_id, "session closed");
}

/// Read raw bytes, decode frames, sequence-track, and push into the inbox.
/// A full inbox suspends this loop (backpressure); reads resume when the
/// dispatcher frees space.
async fn read_loop(
    reader: &mut ReadHalf<BoxedConn>,
    mut decoder: FrameDecoder,
    tracker: &mut SequenceTracker,
    inbox: Inbox,
    ctx: &SessionContext,
    peer_id: &PeerId,
    close_rx: &mut watch::Receiver<bool>,
) -> CloseReason {
    let mut shutdown = ctx.shutdown.clone();
    let mut buf = [0u8; 8192];
    loop {
        tokio::select! {
            _ = shutdown.changed() => return CloseReason::Shutdown,
            _ = close_rx.changed() => return CloseReason::CloseRequested,
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) => return CloseReason::EndOfStream,
                    Ok(n) => n,
                    Err(e) => {
                        debug!(peer = %peer_id, error = %e, "read error");
                        return CloseReason::EndOfStream;
                    }
                };
                decoder.feed(&buf[..n]);
                loop {
                    match decoder.next() {
                        Ok(Some(msg)) => {
                            ctx.metrics.record_frame();
                            ctx.routes.touch(peer_id);
                            match tracker.observe(msg.sequence) {
                                SeqCheck::Duplicate => {
                                    ctx.metrics.record_duplicate();
                                }
                                SeqCheck::Fresh { gap } => {
                                    if gap {
                                        ctx.metrics.record_gap();
                                        warn!(
                                            peer = %peer_id,
                                            sequence = msg.sequence,
                                            "sequence gap detected"
                                        );
                                    }
                                    // A full inbox suspends here; close and
                                    // shutdown signals must still win.
                                    tokio::select! {
                                        _ = shutdown.changed() => {
                                            return CloseReason::Shutdown;
                                        }
                                        _ = close_rx.changed() => {
                                            return CloseReason::CloseRequested;
                                        }
                                        pushed = inbox.push_wait(Inbound { message: msg, gap }) => {
                                            if pushed.is_err() {
                                                return CloseReason::CloseRequested;
                                            }
                                        }
                                    }
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(peer = %peer_id, error = %e, "malformed frame; draining session");
                            return CloseReason::Malformed;
                        }
                    }
                }
            }
        }
    }
}

/// Drain the inbox: control frames are handled here, data frames go to the
/// router. Never surfaces control frames to local consumers.
async fn dispatch_loop(
    mut rx: InboxReceiver,
    router: Arc<Router>,
    routes: RouteTable,
    peer_id: PeerId,
    close: watch::Sender<bool>,
) {
    while let Some(inbound) = rx.pop().await {
        if inbound.message.kind == MessageKind::Control {
            match ControlFrame::from_message(&inbound.message) {
                Ok(ControlFrame::Heartbeat) => {
                    routes.touch(&peer_id);
                }
                Ok(ControlFrame::Disconnect) => {
                    info!(peer = %peer_id, "peer requested disconnect");
                    let _ = close.send(true);
                }
                Ok(other) => {
                    warn!(peer = %peer_id, frame = ?other, "unexpected control frame mid-session");
                    let _ = close.send(true);
                }
                Err(e) => {
                    warn!(peer = %peer_id, error = %e, "malformed control frame");
                    let _ = close.send(true);
                }
            }
            continue;
        }

        let outcome = router.dispatch(inbound).await;
        debug!(peer = %peer_id, ?outcome, "dispatched");
    }
}

/// Stamp link sequence numbers, encode, and write outbound frames.
async fn write_loop(mut writer: WriteHalf<BoxedConn>, mut rx: mpsc::Receiver<Message>) {
    let mut next_seq: u64 = 0;
    while let Some(mut msg) = rx.recv().await {
        next_seq += 1;
        msg.sequence = next_seq;
        match frame::encode(&msg) {
            Ok(bytes) => {
                if writer.write_all(&bytes).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to encode outbound frame");
            }
        }
    }
    let _ = writer.shutdown().await;
}
