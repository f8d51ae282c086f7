// JDWP socket event loop
//
// One task owns the socket and demultiplexes traffic: replies are routed
// back to the waiting command sender, composite event packets are parsed
// and forwarded on the event channel. Socket EOF means the target VM went
// away; the event channel closes and receivers observe end-of-session.

use crate::events::{parse_event_packet, EventSet};
use crate::protocol::{CommandPacket, JdwpError, JdwpResult, ReplyPacket, HEADER_SIZE, REPLY_FLAG};
use bytes::BytesMut;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Upper bound on a single JDWP packet (10MB); anything larger is treated
/// as a corrupt stream rather than allocated.
const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

/// A command awaiting its reply
pub struct CommandRequest {
    pub packet: CommandPacket,
    pub reply_tx: oneshot::Sender<JdwpResult<ReplyPacket>>,
}

/// Handle to the event loop for sending commands and receiving events
#[derive(Clone, Debug)]
pub struct EventLoopHandle {
    command_tx: mpsc::Sender<CommandRequest>,
    event_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<EventSet>>>,
}

impl EventLoopHandle {
    /// Send a command and wait for its reply
    pub async fn send_command(&self, packet: CommandPacket) -> JdwpResult<ReplyPacket> {
        let (reply_tx, reply_rx) = oneshot::channel();

        let request = CommandRequest { packet, reply_tx };

        self.command_tx
            .send(request)
            .await
            .map_err(|_| JdwpError::ConnectionClosed)?;

        reply_rx.await.map_err(|_| JdwpError::ConnectionClosed)?
    }

    /// Wait for the next event set. `None` once the target has disconnected.
    pub async fn recv_event(&self) -> Option<EventSet> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await
    }
}

/// Start the event loop task
pub fn spawn_event_loop(reader: OwnedReadHalf, writer: OwnedWriteHalf) -> EventLoopHandle {
    let (command_tx, command_rx) = mpsc::channel(32);
    // Events carry breakpoint and step hits; a larger buffer keeps them from
    // being dropped while the consumer is busy snapshotting.
    let (event_tx, event_rx) = mpsc::channel(256);

    tokio::spawn(event_loop_task(reader, writer, command_rx, event_tx));

    EventLoopHandle {
        command_tx,
        event_rx: Arc::new(tokio::sync::Mutex::new(event_rx)),
    }
}

async fn event_loop_task(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut command_rx: mpsc::Receiver<CommandRequest>,
    event_tx: mpsc::Sender<EventSet>,
) {
    debug!("Event loop started");

    let mut pending_replies: HashMap<u32, oneshot::Sender<JdwpResult<ReplyPacket>>> =
        HashMap::new();

    loop {
        tokio::select! {
            // Outgoing commands
            Some(cmd) = command_rx.recv() => {
                let packet_id = cmd.packet.id;
                debug!("Sending command id={}", packet_id);

                let encoded = cmd.packet.encode();
                if let Err(e) = writer.write_all(&encoded).await {
                    error!("Failed to write command: {}", e);
                    cmd.reply_tx.send(Err(JdwpError::Io(e))).ok();
                    continue;
                }

                if let Err(e) = writer.flush().await {
                    error!("Failed to flush command: {}", e);
                    cmd.reply_tx.send(Err(JdwpError::Io(e))).ok();
                    continue;
                }

                pending_replies.insert(packet_id, cmd.reply_tx);
            }

            // Incoming packets
            result = read_packet(&mut reader) => {
                match result {
                    Ok((is_reply, packet_id, data)) => {
                        if is_reply {
                            debug!("Received reply id={}", packet_id);

                            if let Some(tx) = pending_replies.remove(&packet_id) {
                                match ReplyPacket::decode(&data) {
                                    Ok(reply) => {
                                        tx.send(Ok(reply)).ok();
                                    }
                                    Err(e) => {
                                        warn!("Failed to decode reply: {}", e);
                                        tx.send(Err(e)).ok();
                                    }
                                }
                            } else {
                                warn!("Received reply for unknown command id={}", packet_id);
                            }
                        } else {
                            // Composite event packet; body starts after the header
                            let event_data = &data[HEADER_SIZE..];

                            match parse_event_packet(event_data) {
                                Ok(event_set) => {
                                    debug!("Parsed event set: {} events, suspend_policy={}",
                                          event_set.events.len(), event_set.suspend_policy);

                                    match event_tx.try_send(event_set) {
                                        Ok(_) => {}
                                        Err(mpsc::error::TrySendError::Full(dropped)) => {
                                            error!("Event channel full, dropping a set of {} events",
                                                  dropped.events.len());
                                        }
                                        Err(mpsc::error::TrySendError::Closed(_)) => {
                                            debug!("Event receiver gone, discarding event");
                                        }
                                    }
                                }
                                Err(e) => {
                                    warn!("Failed to parse event packet: {}", e);
                                }
                            }
                        }
                    }
                    Err(JdwpError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        // Normal end of session: the target exited or detached
                        info!("Target closed the JDWP connection");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read packet: {}", e);
                        break;
                    }
                }
            }
        }
    }

    // Dropping event_tx here closes the event channel; pending commands get
    // a ConnectionClosed when their oneshot senders drop.
    debug!("Event loop shutting down");
}

/// Read one packet; returns (is_reply, packet id, full packet bytes)
async fn read_packet(reader: &mut OwnedReadHalf) -> JdwpResult<(bool, u32, Vec<u8>)> {
    let mut header = BytesMut::with_capacity(HEADER_SIZE);
    header.resize(HEADER_SIZE, 0);

    reader.read_exact(&mut header).await.map_err(JdwpError::Io)?;

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let packet_id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let flags = header[8];

    if length < HEADER_SIZE {
        return Err(JdwpError::Protocol(format!(
            "Invalid packet length: {}",
            length
        )));
    }

    if length > MAX_PACKET_SIZE {
        return Err(JdwpError::Protocol(format!(
            "Packet too large: {} bytes (max: {} bytes)",
            length, MAX_PACKET_SIZE
        )));
    }

    let data_len = length - HEADER_SIZE;
    let mut full_packet = header.to_vec();

    if data_len > 0 {
        let mut data = vec![0u8; data_len];
        reader.read_exact(&mut data).await.map_err(JdwpError::Io)?;
        full_packet.extend_from_slice(&data);
    }

    let is_reply = flags == REPLY_FLAG;

    Ok((is_reply, packet_id, full_packet))
}
