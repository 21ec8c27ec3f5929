//! Client — dials a listener node, handshakes, and exchanges messages.
//!
//! Used by the CLI (`send`, `peers`) and by tests. The client owns its own
//! link sequence counter; heartbeats from the node are absorbed in
//! [`Client::recv`].

use crate::error::NodeError;
use crate::session::read_frame;
use agent_messenger_types::{Destination, Message, MessageKind, MessengerConfig, PeerId};
use agent_messenger_wire::{frame, BoxedConn, ControlFrame, FrameDecoder, WireError, PROTOCOL_VERSION};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::timeout;
use tracing::debug;

/// An established client connection to a listener node.
pub struct Client {
    peer_id: PeerId,
    remote_id: PeerId,
    roster: Vec<PeerId>,
    reader: ReadHalf<BoxedConn>,
    writer: WriteHalf<BoxedConn>,
    decoder: FrameDecoder,
    next_seq: u64,
}

impl Client {
    /// Handshake over an open connection: send Hello, await HelloAck.
    pub async fn handshake(
        conn: BoxedConn,
        peer_id: PeerId,
        config: &MessengerConfig,
    ) -> Result<Self, NodeError> {
        let (mut reader, mut writer) = tokio::io::split(conn);
        let mut decoder = FrameDecoder::new(config.max_frame_bytes);
        let mut next_seq = 0u64;

        let mut hello = ControlFrame::Hello {
            peer_id: peer_id.clone(),
            protocol_version: PROTOCOL_VERSION,
        }
        .into_message(peer_id.clone())?;
        next_seq += 1;
        hello.sequence = next_seq;
        let bytes = frame::encode(&hello)?;
        writer.write_all(&bytes).await.map_err(WireError::from)?;
        writer.flush().await.map_err(WireError::from)?;

        let ack = timeout(
            config.handshake_timeout(),
            read_frame(&mut reader, &mut decoder),
        )
        .await
        .map_err(|_| WireError::HandshakeTimeout)??;

        if ack.kind != MessageKind::Control {
            return Err(NodeError::Wire(WireError::HandshakeFailed(
                "expected HelloAck control frame".to_string(),
            )));
        }
        match ControlFrame::from_message(&ack)? {
            ControlFrame::HelloAck {
                peer_id: remote_id,
                protocol_version,
                peers,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(NodeError::Wire(WireError::VersionMismatch {
                        local: PROTOCOL_VERSION,
                        remote: protocol_version,
                    }));
                }
                debug!(remote = %remote_id, peers = peers.len(), "handshake complete");
                Ok(Self {
                    peer_id,
                    remote_id,
                    roster: peers,
                    reader,
                    writer,
                    decoder,
                    next_seq,
                })
            }
            other => Err(NodeError::Wire(WireError::HandshakeFailed(format!(
                "expected HelloAck, got {other:?}"
            )))),
        }
    }

    /// This client's peer ID.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// The node's peer ID, from the handshake.
    pub fn remote_id(&self) -> &PeerId {
        &self.remote_id
    }

    /// Peers the node advertised as connected at handshake time.
    pub fn roster(&self) -> &[PeerId] {
        &self.roster
    }

    /// Send one data message.
    pub async fn send(
        &mut self,
        destination: Destination,
        payload: Vec<u8>,
    ) -> Result<(), NodeError> {
        let msg = Message::data(self.peer_id.clone(), destination, payload);
        self.write(msg).await
    }

    /// Receive the next data message. Heartbeats are absorbed; a
    /// Disconnect from the node surfaces as `ConnectionClosed`.
    pub async fn recv(&mut self) -> Result<Message, NodeError> {
        loop {
            let msg = read_frame(&mut self.reader, &mut self.decoder).await?;
            if msg.kind != MessageKind::Control {
                return Ok(msg);
            }
            match ControlFrame::from_message(&msg)? {
                ControlFrame::Heartbeat => continue,
                ControlFrame::Disconnect => {
                    return Err(NodeError::Wire(WireError::ConnectionClosed));
                }
                other => {
                    debug!(frame = ?other, "ignoring control frame");
                    continue;
                }
            }
        }
    }

    /// Gracefully disconnect: send a Disconnect control frame and close
    /// the write side.
    pub async fn close(mut self) -> Result<(), NodeError> {
        let msg = ControlFrame::Disconnect.into_message(self.peer_id.clone())?;
        self.write(msg).await?;
        self.writer.shutdown().await.map_err(WireError::from)?;
        Ok(())
    }

    async fn write(&mut self, mut msg: Message) -> Result<(), NodeError> {
        self.next_seq += 1;
        msg.sequence = self.next_seq;
        let bytes = frame::encode(&msg)?;
        self.writer.write_all(&bytes).await.map_err(WireError::from)?;
        self.writer.flush().await.map_err(WireError::from)?;
        Ok(())
    }
}
