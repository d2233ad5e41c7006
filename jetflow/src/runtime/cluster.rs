//! the narrow contract to the excluded cluster/membership layer, plus the
//! in-process local cluster used for single-process deployments and tests.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::core::runtime::{Member, MemberIndex};
use crate::dag::Dag;
use crate::runtime::job::JobService;

/// structural requests exchanged between members. the wire codec for these
/// lives in the excluded client/codec layer; this core only defines the
/// contract.
#[derive(Clone, Debug)]
pub enum MemberRequest {
    /// resolve the target member's job-local network address
    Discovery { job_name: String },
    BuildExecutionPlan {
        job_name: String,
        dag: Arc<Dag>,
        origin: Member,
    },
    ExecutionPlanReady { job_name: String },
    Execute { job_name: String },
    Teardown { job_name: String },
    MemberFinished {
        job_name: String,
        member: MemberIndex,
    },
    MemberFailed {
        job_name: String,
        member: MemberIndex,
        cause: String,
    },
}

impl MemberRequest {
    pub fn job_name(&self) -> &str {
        match self {
            MemberRequest::Discovery { job_name }
            | MemberRequest::BuildExecutionPlan { job_name, .. }
            | MemberRequest::ExecutionPlanReady { job_name }
            | MemberRequest::Execute { job_name }
            | MemberRequest::Teardown { job_name }
            | MemberRequest::MemberFinished { job_name, .. }
            | MemberRequest::MemberFailed { job_name, .. } => job_name.as_str(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum MemberResponse {
    Ack,
    Address(SocketAddr),
}

#[async_trait]
pub trait ClusterService: Send + Sync {
    fn local_member(&self) -> Member;

    /// every member of the cluster, ordered by member index
    fn members(&self) -> Vec<Member>;

    async fn invoke(
        &self,
        target: &Member,
        request: MemberRequest,
    ) -> anyhow::Result<MemberResponse>;
}

/// all members in one process, requests dispatched by direct call
pub struct LocalCluster {
    members: Vec<Member>,
    services: RwLock<Vec<Option<Arc<JobService>>>>,
}

impl LocalCluster {
    pub fn new(member_count: u32) -> Arc<Self> {
        let members = (0..member_count)
            .map(|index| Member::new(index, format!("local-{}", index)))
            .collect();
        Arc::new(LocalCluster {
            members,
            services: RwLock::new(vec![None; member_count as usize]),
        })
    }

    /// member view from a loaded cluster config. the position in the
    /// address list is the member index
    pub fn from_config(config: &crate::core::cluster::ClusterConfig) -> Arc<Self> {
        let members: Vec<Member> = config
            .member_addresses
            .iter()
            .enumerate()
            .map(|(index, address)| Member::new(index as u32, address.clone()))
            .collect();
        let member_count = members.len();
        Arc::new(LocalCluster {
            members,
            services: RwLock::new(vec![None; member_count]),
        })
    }

    pub fn register(&self, index: MemberIndex, service: Arc<JobService>) {
        self.services.write().unwrap()[index.0 as usize] = Some(service);
    }

    pub fn view(self: &Arc<Self>, index: u32) -> Arc<LocalClusterView> {
        Arc::new(LocalClusterView {
            cluster: self.clone(),
            local_index: MemberIndex(index),
        })
    }

    fn service_of(&self, member: &Member) -> anyhow::Result<Arc<JobService>> {
        self.services
            .read()
            .unwrap()
            .get(member.index.0 as usize)
            .and_then(|s| s.clone())
            .ok_or_else(|| anyhow!("no service registered for {}", member))
    }
}

/// one member's view of the local cluster
pub struct LocalClusterView {
    cluster: Arc<LocalCluster>,
    local_index: MemberIndex,
}

#[async_trait]
impl ClusterService for LocalClusterView {
    fn local_member(&self) -> Member {
        self.cluster.members[self.local_index.0 as usize].clone()
    }

    fn members(&self) -> Vec<Member> {
        self.cluster.members.clone()
    }

    async fn invoke(
        &self,
        target: &Member,
        request: MemberRequest,
    ) -> anyhow::Result<MemberResponse> {
        let service = self.cluster.service_of(target)?;
        service.handle_member_request(request).await
    }
}

#[cfg(test)]
mod tests {
    use crate::core::cluster::ClusterConfig;
    use crate::core::runtime::MemberIndex;
    use crate::runtime::cluster::{ClusterService, LocalCluster};

    #[test]
    pub fn from_config_test() {
        let mut config = ClusterConfig::new_local();
        config.member_addresses = vec!["10.1.0.1:5701".to_string(), "10.1.0.2:5701".to_string()];

        let cluster = LocalCluster::from_config(&config);
        let view = cluster.view(1);

        assert_eq!(view.local_member().index, MemberIndex(1));
        assert_eq!(view.local_member().address, "10.1.0.2:5701");
        assert_eq!(view.members().len(), 2);
    }
}
