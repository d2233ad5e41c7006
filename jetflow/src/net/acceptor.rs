use std::collections::HashMap;
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};

use bytes::BytesMut;

use crate::core::runtime::MemberIndex;
use crate::net::{next_frame, ConnectionSlot, Packet};
use crate::runtime::executor::{Progress, TickTask};

/// accepts connections on the job-local listener, reads each connection's
/// handshake and hands the socket to the reader of the member it names.
/// a handshake naming an unknown member invalidates the job.
pub struct Acceptor {
    job_name: String,
    listener: TcpListener,
    slots: HashMap<MemberIndex, ConnectionSlot>,
    pending: Vec<(TcpStream, BytesMut, SocketAddr)>,
}

impl Acceptor {
    pub fn new(
        job_name: &str,
        listener: TcpListener,
        slots: HashMap<MemberIndex, ConnectionSlot>,
    ) -> anyhow::Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Acceptor {
            job_name: job_name.to_string(),
            listener,
            slots,
            pending: Vec::new(),
        })
    }

    fn accept_new(&mut self) -> anyhow::Result<bool> {
        let mut accepted = false;
        loop {
            match self.listener.accept() {
                Ok((stream, remote_addr)) => {
                    info!(
                        "job {} accepted shuffle connection from {}",
                        self.job_name, remote_addr
                    );
                    stream.set_nonblocking(true)?;
                    stream.set_nodelay(true)?;
                    self.pending.push((stream, BytesMut::new(), remote_addr));
                    accepted = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(anyhow!("accept failed. {}", e)),
            }
        }
        Ok(accepted)
    }

    fn drive_handshakes(&mut self) -> anyhow::Result<bool> {
        let mut progressed = false;
        let mut still_pending = Vec::new();
        let mut tmp = [0u8; 1024];

        for (mut stream, mut buf, remote_addr) in self.pending.drain(..) {
            match stream.read(&mut tmp) {
                Ok(0) => {
                    warn!("connection from {} closed before handshake", remote_addr);
                    continue;
                }
                Ok(n) => {
                    buf.extend_from_slice(&tmp[..n]);
                    progressed = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(anyhow!("handshake read from {} failed. {}", remote_addr, e))
                }
            }

            match next_frame(&mut buf) {
                Some(body) => {
                    let packet = Packet::decode_body(body).map_err(|e| {
                        anyhow!("malformed handshake from {}. {}", remote_addr, e)
                    })?;
                    match packet {
                        Packet::Handshake { source_member } => {
                            let slot = self.slots.get(&source_member).ok_or_else(|| {
                                anyhow!(
                                    "handshake from unknown member index {} at {}",
                                    source_member.0,
                                    remote_addr
                                )
                            })?;
                            info!(
                                "job {} connection from {} identified as member {}",
                                self.job_name, remote_addr, source_member.0
                            );
                            *slot.lock().unwrap() = Some((stream, buf));
                            progressed = true;
                        }
                        other => {
                            return Err(anyhow!(
                                "expected handshake from {}, got {:?}",
                                remote_addr,
                                other
                            ));
                        }
                    }
                }
                None => still_pending.push((stream, buf, remote_addr)),
            }
        }

        self.pending = still_pending;
        Ok(progressed)
    }
}

impl TickTask for Acceptor {
    fn name(&self) -> String {
        format!("acceptor[{}]", self.job_name)
    }

    fn tick(&mut self) -> anyhow::Result<Progress> {
        let mut progressed = self.accept_new()?;
        progressed |= self.drive_handshakes()?;

        if progressed {
            Ok(Progress::DidWork)
        } else {
            Ok(Progress::Idle)
        }
    }
}
