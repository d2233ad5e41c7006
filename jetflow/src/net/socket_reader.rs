use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use bytes::BytesMut;

use crate::channel::{ElementSender, TrySendError};
use crate::core::element::Element;
use crate::core::runtime::{Member, TaskId};
use crate::net::{next_frame, ConnectionSlot, Packet, WriterControl};
use crate::runtime::executor::{Progress, TickTask};

const READ_CHUNK: usize = 16 * 1024;

/// non-blocking network task accumulating incoming bytes until full packets
/// are framed, then delivering them to the local task graph by target task.
/// acks for delivered packets are routed back through the cross-wired writer
/// of the packet's source member.
pub struct SocketReader {
    source_member: Member,
    slot: ConnectionSlot,
    stream: Option<std::net::TcpStream>,
    read_buf: BytesMut,
    routing: Arc<HashMap<TaskId, ElementSender>>,
    /// cluster-address -> writer, assigned during discovery cross-wiring
    writers: HashMap<String, Arc<WriterControl>>,
    pending: Option<(TaskId, Element)>,
    delivered_since_ack: u32,
    closed: bool,
}

impl SocketReader {
    pub fn new(
        source_member: Member,
        slot: ConnectionSlot,
        routing: Arc<HashMap<TaskId, ElementSender>>,
    ) -> Self {
        info!("socket reader for {} created", source_member);
        SocketReader {
            source_member,
            slot,
            stream: None,
            read_buf: BytesMut::new(),
            routing,
            writers: HashMap::new(),
            pending: None,
            delivered_since_ack: 0,
            closed: false,
        }
    }

    pub fn assign_writer(&mut self, cluster_address: String, writer: Arc<WriterControl>) {
        self.writers.insert(cluster_address, writer);
    }

    fn source_writer(&self) -> anyhow::Result<&Arc<WriterControl>> {
        self.writers
            .get(self.source_member.address.as_str())
            .ok_or_else(|| {
                anyhow!(
                    "no writer cross-wired for source member {}",
                    self.source_member
                )
            })
    }

    /// true when delivered, false when the target channel is full
    fn try_deliver(&mut self, target_task_id: TaskId, element: Element) -> anyhow::Result<bool> {
        let sender = self.routing.get(&target_task_id).ok_or_else(|| {
            anyhow!(
                "packet for unknown task {} from {}, element: {:?}",
                target_task_id,
                self.source_member,
                element
            )
        })?;
        match sender.try_send(element) {
            Ok(()) => {
                self.delivered_since_ack += 1;
                Ok(true)
            }
            Err(TrySendError::Full(element)) => {
                self.pending = Some((target_task_id, element));
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(anyhow!(
                "input channel of task {} disconnected",
                target_task_id
            )),
        }
    }

    fn handle_packet(&mut self, packet: Packet) -> anyhow::Result<bool> {
        match packet {
            Packet::Element {
                target_task_id,
                element,
            } => self.try_deliver(target_task_id, element),
            Packet::Ack { count } => {
                self.source_writer()?.on_ack(count);
                Ok(true)
            }
            Packet::Handshake { source_member } => Err(anyhow!(
                "unexpected handshake from {} (member index {}) on established connection",
                self.source_member,
                source_member.0
            )),
        }
    }

    fn flush_acks(&mut self) -> anyhow::Result<()> {
        if self.delivered_since_ack > 0 {
            let count = self.delivered_since_ack;
            self.delivered_since_ack = 0;
            self.source_writer()?.push_acks(count);
        }
        Ok(())
    }
}

impl TickTask for SocketReader {
    fn name(&self) -> String {
        format!("socket-reader[{}]", self.source_member)
    }

    fn tick(&mut self) -> anyhow::Result<Progress> {
        if self.stream.is_none() {
            match self.slot.lock().unwrap().take() {
                Some((stream, leftover)) => {
                    info!(
                        "socket reader for {} attached to connection",
                        self.source_member
                    );
                    self.read_buf.extend_from_slice(leftover.as_ref());
                    self.stream = Some(stream);
                }
                None => return Ok(Progress::Idle),
            }
        }

        let mut progressed = false;

        // backpressured delivery from the previous tick comes first
        if let Some((target_task_id, element)) = self.pending.take() {
            if !self.try_deliver(target_task_id, element)? {
                self.flush_acks()?;
                return Ok(Progress::Idle);
            }
            progressed = true;
        }

        let mut tmp = [0u8; READ_CHUNK];
        'io: loop {
            while let Some(body) = next_frame(&mut self.read_buf) {
                let packet = Packet::decode_body(body).map_err(|e| {
                    anyhow!("malformed packet from {}. {}", self.source_member, e)
                })?;
                progressed = true;
                if !self.handle_packet(packet)? {
                    // target channel full, resume next tick
                    break 'io;
                }
            }

            if self.closed {
                break;
            }

            let stream = self.stream.as_mut().expect("attached above");
            match stream.read(&mut tmp) {
                Ok(0) => {
                    info!("connection from {} closed", self.source_member);
                    self.closed = true;
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&tmp[..n]);
                    progressed = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(anyhow!("read from {} failed. {}", self.source_member, e));
                }
            }
        }

        self.flush_acks()?;

        if self.closed && self.pending.is_none() && self.read_buf.is_empty() {
            return Ok(Progress::Done);
        }
        if progressed {
            Ok(Progress::DidWork)
        } else {
            Ok(Progress::Idle)
        }
    }
}
