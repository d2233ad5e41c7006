use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use bytes::{Buf, BytesMut};

use crate::channel::ChannelReceiver;
use crate::core::runtime::MemberIndex;
use crate::net::{Packet, WriterControl, IN_FLIGHT_WINDOW};
use crate::runtime::executor::{Progress, TickTask};

/// stop encoding further packets once this many bytes wait on the socket
const WRITE_BUF_HIGH_WATER: usize = 64 * 1024;

/// non-blocking network task draining locally-buffered outgoing packets onto
/// its socket in FIFO order. acks jump the queue; element packets respect
/// the in-flight window.
pub struct SocketWriter {
    control: Arc<WriterControl>,
    receiver: ChannelReceiver<Packet>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    write_buf: BytesMut,
}

impl SocketWriter {
    pub fn new(
        control: Arc<WriterControl>,
        receiver: ChannelReceiver<Packet>,
        stream: TcpStream,
        local_member: MemberIndex,
    ) -> anyhow::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;

        // the handshake identifies this member to the remote acceptor and
        // goes out before anything else
        let mut write_buf = BytesMut::new();
        write_buf.extend_from_slice(
            &Packet::Handshake {
                source_member: local_member,
            }
            .encode(),
        );

        info!(
            "socket writer to {} ({}) created",
            control.target_member(),
            peer_addr
        );

        Ok(SocketWriter {
            control,
            receiver,
            stream,
            peer_addr,
            write_buf,
        })
    }

    /// push buffered bytes onto the socket until it would block
    fn flush(&mut self) -> anyhow::Result<bool> {
        let mut wrote = false;
        while !self.write_buf.is_empty() {
            match self.stream.write(self.write_buf.as_ref()) {
                Ok(0) => {
                    return Err(anyhow!(
                        "connection to {} closed during write",
                        self.peer_addr
                    ));
                }
                Ok(n) => {
                    self.write_buf.advance(n);
                    wrote = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(anyhow!("write to {} failed. {}", self.peer_addr, e));
                }
            }
        }
        Ok(wrote)
    }
}

impl TickTask for SocketWriter {
    fn name(&self) -> String {
        format!("socket-writer[{}]", self.control.target_member())
    }

    fn tick(&mut self) -> anyhow::Result<Progress> {
        let mut progressed = self.flush()?;

        let acks = self.control.take_acks();
        if acks > 0 {
            self.write_buf
                .extend_from_slice(&Packet::Ack { count: acks }.encode());
            progressed = true;
        }

        while self.write_buf.len() < WRITE_BUF_HIGH_WATER
            && self.control.in_flight() < IN_FLIGHT_WINDOW
        {
            match self.receiver.try_recv() {
                Ok(packet) => {
                    if packet.is_element() {
                        self.control.add_in_flight(1);
                    }
                    self.write_buf.extend_from_slice(&packet.encode());
                    progressed = true;
                }
                Err(_) => break,
            }
        }

        progressed |= self.flush()?;

        if progressed {
            Ok(Progress::DidWork)
        } else {
            Ok(Progress::Idle)
        }
    }
}
