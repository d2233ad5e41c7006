//! discovery: resolve every remote member's job-local address, then wire up
//! the socket reader/writer pair per remote member and cross-wire readers
//! with the writers for ack routing. all-or-nothing per job: the first
//! failing member aborts discovery.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::channel::{named_channel, ElementSender};
use crate::core::runtime::{Member, MemberIndex, TaskId};
use crate::net::acceptor::Acceptor;
use crate::net::socket_reader::SocketReader;
use crate::net::socket_writer::SocketWriter;
use crate::net::{ConnectionSlot, Packet, WriterControl};
use crate::runtime::cluster::{ClusterService, MemberRequest, MemberResponse};
use crate::runtime::executor::TaskScheduler;
use crate::runtime::job::context::JobContext;
use crate::utils::thread::async_sleep;

const CONNECT_ATTEMPTS: usize = 40;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

pub struct DiscoveryService {
    cluster: Arc<dyn ClusterService>,
    job_name: String,
    context: Arc<JobContext>,
}

impl DiscoveryService {
    pub fn new(
        cluster: Arc<dyn ClusterService>,
        job_name: &str,
        context: Arc<JobContext>,
    ) -> Self {
        DiscoveryService {
            cluster,
            job_name: job_name.to_string(),
            context,
        }
    }

    /// executes the discovery process and registers all constructed I/O
    /// tasks with the job's network task scheduler. returns the writer
    /// handle per remote member
    pub async fn execute_discovery(
        &self,
        listener: std::net::TcpListener,
        listen_addr: SocketAddr,
        routing: Arc<HashMap<TaskId, ElementSender>>,
        scheduler: &TaskScheduler,
    ) -> anyhow::Result<HashMap<MemberIndex, Arc<WriterControl>>> {
        let local = self.cluster.local_member();
        self.context
            .record_job_address(local.address.clone(), listen_addr);

        let remote_members: Vec<Member> = self
            .cluster
            .members()
            .into_iter()
            .filter(|member| member.index != local.index)
            .collect();
        if remote_members.is_empty() {
            return Ok(HashMap::new());
        }

        let discovered = self.find_members(&remote_members).await?;
        for (member, job_address) in &discovered {
            info!(
                "job {}: discovered {} at {}",
                self.job_name, member, job_address
            );
            self.context
                .record_job_address(member.address.clone(), *job_address);
        }

        self.register_io_tasks(discovered, listener, routing, scheduler, &local)
            .await
    }

    /// resolve every remote member's job-local address concurrently
    async fn find_members(
        &self,
        remote_members: &[Member],
    ) -> anyhow::Result<Vec<(Member, SocketAddr)>> {
        let invocations = remote_members.iter().map(|member| {
            let cluster = self.cluster.clone();
            let request = MemberRequest::Discovery {
                job_name: self.job_name.clone(),
            };
            async move {
                match cluster.invoke(member, request).await {
                    Ok(MemberResponse::Address(address)) => Ok((member.clone(), address)),
                    Ok(other) => Err(anyhow!(
                        "unexpected discovery response from {}: {:?}",
                        member,
                        other
                    )),
                    Err(e) => Err(anyhow!("discovery of {} failed. {}", member, e)),
                }
            }
        });

        futures::future::try_join_all(invocations).await
    }

    async fn register_io_tasks(
        &self,
        discovered: Vec<(Member, SocketAddr)>,
        listener: std::net::TcpListener,
        routing: Arc<HashMap<TaskId, ElementSender>>,
        scheduler: &TaskScheduler,
        local: &Member,
    ) -> anyhow::Result<HashMap<MemberIndex, Arc<WriterControl>>> {
        let channel_size = self.context.properties().channel_size();

        let mut controls_by_address: HashMap<String, Arc<WriterControl>> = HashMap::new();
        let mut controls_by_index: HashMap<MemberIndex, Arc<WriterControl>> = HashMap::new();
        let mut slots: HashMap<MemberIndex, ConnectionSlot> = HashMap::new();
        let mut readers: Vec<SocketReader> = Vec::new();
        let mut writers: Vec<SocketWriter> = Vec::new();

        for (member, job_address) in discovered {
            let stream = connect_with_retry(job_address).await?;

            let (packet_sender, packet_receiver) = named_channel::<Packet>(
                format!("writer-{}", member).as_str(),
                channel_size,
            );
            let control = Arc::new(WriterControl::new(member.clone(), packet_sender));
            let writer =
                SocketWriter::new(control.clone(), packet_receiver, stream, local.index)?;

            let slot: ConnectionSlot = Arc::new(Mutex::new(None));
            let reader = SocketReader::new(member.clone(), slot.clone(), routing.clone());

            controls_by_address.insert(member.address.clone(), control.clone());
            controls_by_index.insert(member.index, control);
            slots.insert(member.index, slot);
            readers.push(reader);
            writers.push(writer);
        }

        // cross-wire every reader with every writer's address so a reader
        // can route ack traffic back through the matching writer
        for reader in readers.iter_mut() {
            for (address, control) in &controls_by_address {
                reader.assign_writer(address.clone(), control.clone());
            }
        }

        for reader in readers {
            scheduler.register(Box::new(reader));
        }
        for writer in writers {
            scheduler.register(Box::new(writer));
        }
        scheduler.register(Box::new(Acceptor::new(
            self.job_name.as_str(),
            listener,
            slots,
        )?));

        Ok(controls_by_index)
    }
}

async fn connect_with_retry(address: SocketAddr) -> anyhow::Result<std::net::TcpStream> {
    for attempt in 0..CONNECT_ATTEMPTS {
        match std::net::TcpStream::connect(address) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                if attempt + 1 == CONNECT_ATTEMPTS {
                    return Err(anyhow!("connect to {} failed. {}", address, e));
                }
                warn!("connect to {} failed, retrying. {}", address, e);
                async_sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
    unreachable!("connect loop returns")
}
