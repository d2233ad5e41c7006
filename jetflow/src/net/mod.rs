//! shuffle wire: length-prefixed packets moved by tick-driven socket tasks.
//!
//! every connection starts with a handshake naming the sending member; data
//! packets address a target task; acks flow back through the cross-wired
//! writer of the receiving side and bound the sender's in-flight window.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use bytes::{Buf, BufMut, BytesMut};

use crate::channel::{ChannelSender, TrySendError};
use crate::core::element::{Element, Serde};
use crate::core::runtime::{Member, MemberIndex, TaskId};

pub mod acceptor;
pub mod socket_reader;
pub mod socket_writer;

pub(crate) const HEADER_LEN: usize = 4;

/// hand-off of an accepted, handshaked connection (plus any bytes read past
/// the handshake frame) from the acceptor to the matching reader
pub(crate) type ConnectionSlot =
    std::sync::Arc<std::sync::Mutex<Option<(std::net::TcpStream, BytesMut)>>>;

/// element packets allowed on the wire before an ack is required
pub(crate) const IN_FLIGHT_WINDOW: i64 = 4096;

const TAG_HANDSHAKE: u8 = 1;
const TAG_ELEMENT: u8 = 2;
const TAG_ACK: u8 = 3;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Packet {
    Handshake {
        source_member: MemberIndex,
    },
    Element {
        target_task_id: TaskId,
        element: Element,
    },
    Ack {
        count: u32,
    },
}

impl Packet {
    pub fn is_element(&self) -> bool {
        match self {
            Packet::Element { .. } => true,
            _ => false,
        }
    }

    fn body_capacity(&self) -> usize {
        match self {
            Packet::Handshake { .. } => 1 + 4,
            Packet::Element {
                target_task_id,
                element,
            } => 1 + target_task_id.capacity() + element.capacity(),
            Packet::Ack { .. } => 1 + 4,
        }
    }

    /// length-prefixed wire form
    pub fn encode(&self) -> BytesMut {
        let body_len = self.body_capacity();
        let mut buffer = BytesMut::with_capacity(HEADER_LEN + body_len);
        buffer.put_u32(body_len as u32);
        match self {
            Packet::Handshake { source_member } => {
                buffer.put_u8(TAG_HANDSHAKE);
                buffer.put_u32(source_member.0);
            }
            Packet::Element {
                target_task_id,
                element,
            } => {
                buffer.put_u8(TAG_ELEMENT);
                target_task_id.serialize(&mut buffer);
                element.serialize(&mut buffer);
            }
            Packet::Ack { count } => {
                buffer.put_u8(TAG_ACK);
                buffer.put_u32(*count);
            }
        }
        buffer
    }

    /// decode a packet body, the length prefix already stripped
    pub fn decode_body(mut body: BytesMut) -> anyhow::Result<Packet> {
        if body.is_empty() {
            return Err(anyhow!("empty packet body"));
        }
        let tag = body.get_u8();
        match tag {
            TAG_HANDSHAKE => {
                if body.remaining() != 4 {
                    return Err(anyhow!("malformed handshake packet"));
                }
                Ok(Packet::Handshake {
                    source_member: MemberIndex(body.get_u32()),
                })
            }
            TAG_ELEMENT => {
                let target_task_id = TaskId::deserialize(&mut body);
                let element = Element::deserialize(&mut body);
                Ok(Packet::Element {
                    target_task_id,
                    element,
                })
            }
            TAG_ACK => {
                if body.remaining() != 4 {
                    return Err(anyhow!("malformed ack packet"));
                }
                Ok(Packet::Ack {
                    count: body.get_u32(),
                })
            }
            _ => Err(anyhow!("unrecognized packet tag {}", tag)),
        }
    }
}

/// split complete length-prefixed frames off the front of `buffer`
pub(crate) fn next_frame(buffer: &mut BytesMut) -> Option<BytesMut> {
    if buffer.len() < HEADER_LEN {
        return None;
    }
    let body_len = u32::from_be_bytes(buffer[0..HEADER_LEN].try_into().expect("peeked header"))
        as usize;
    if buffer.len() < HEADER_LEN + body_len {
        return None;
    }
    buffer.advance(HEADER_LEN);
    Some(buffer.split_to(body_len))
}

/// shared handle to one remote member's socket writer: the outgoing element
/// queue plus the flow-control state the cross-wired readers feed.
pub struct WriterControl {
    target_member: Member,
    element_sender: ChannelSender<Packet>,
    pending_acks: AtomicU32,
    in_flight: AtomicI64,
}

impl WriterControl {
    pub(crate) fn new(target_member: Member, element_sender: ChannelSender<Packet>) -> Self {
        WriterControl {
            target_member,
            element_sender,
            pending_acks: AtomicU32::new(0),
            in_flight: AtomicI64::new(0),
        }
    }

    pub(crate) fn target_member(&self) -> &Member {
        &self.target_member
    }

    /// enqueue an outgoing element packet. `Full` signals backpressure
    pub(crate) fn try_send_element(&self, packet: Packet) -> Result<(), TrySendError<Packet>> {
        self.element_sender.try_send(packet)
    }

    /// queue acks to be flushed ahead of element packets
    pub(crate) fn push_acks(&self, count: u32) {
        self.pending_acks.fetch_add(count, Ordering::AcqRel);
    }

    pub(crate) fn take_acks(&self) -> u32 {
        self.pending_acks.swap(0, Ordering::AcqRel)
    }

    /// credits returned by the remote reader
    pub(crate) fn on_ack(&self, count: u32) {
        self.in_flight.fetch_sub(count as i64, Ordering::AcqRel);
    }

    pub(crate) fn add_in_flight(&self, count: i64) {
        self.in_flight.fetch_add(count, Ordering::AcqRel);
    }

    pub(crate) fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use crate::core::element::{Element, Record};
    use crate::core::runtime::{MemberIndex, TaskId, VertexId};
    use crate::net::{next_frame, Packet};

    #[test]
    pub fn packet_round_trip_test() {
        let packets = vec![
            Packet::Handshake {
                source_member: MemberIndex(1),
            },
            Packet::Element {
                target_task_id: TaskId::new(VertexId(2), 5, 8),
                element: Element::new_record(Record::from_i64(77)),
            },
            Packet::Ack { count: 12 },
        ];

        for packet in packets {
            let mut wire = packet.encode();
            let body = next_frame(&mut wire).expect("complete frame");
            assert!(wire.is_empty());
            assert_eq!(Packet::decode_body(body).unwrap(), packet);
        }
    }

    /// frames are reassembled from arbitrary partial reads
    #[test]
    pub fn partial_frame_reassembly_test() {
        let packet = Packet::Element {
            target_task_id: TaskId::new(VertexId(0), 0, 1),
            element: Element::new_record(Record::from_i64(5)),
        };
        let wire = packet.encode();

        let mut buffer = BytesMut::new();
        for (i, byte) in wire.iter().enumerate() {
            if i + 1 < wire.len() {
                assert!(next_frame(&mut buffer).is_none());
            }
            buffer.extend_from_slice(&[*byte]);
        }
        let body = next_frame(&mut buffer).expect("complete after last byte");
        assert_eq!(Packet::decode_body(body).unwrap(), packet);
    }

    #[test]
    pub fn malformed_packet_test() {
        let body = BytesMut::from(&[9u8, 0, 0][..]);
        assert!(Packet::decode_body(body).is_err());
    }
}
