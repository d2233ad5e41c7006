//! per-member job surface: the submission protocol entry points, the
//! per-job execution state and the wiring from execution plan to scheduled
//! tasks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;

use crate::channel::{named_channel, ElementReceiver, ElementSender};
use crate::core::error::{Error, Result};
use crate::core::properties::Properties;
use crate::core::runtime::{JobState, Member, MemberIndex, TaskId};
use crate::dag::execution_graph::{ExecutionEdge, ExecutionGraph};
use crate::dag::Dag;
use crate::net::WriterControl;
use crate::runtime::cluster::{ClusterService, MemberRequest, MemberResponse};
use crate::runtime::discovery::DiscoveryService;
use crate::runtime::executor::TaskScheduler;
use crate::runtime::job::context::JobContext;
use crate::runtime::job::deployment::Chunk;
use crate::runtime::job::manager::{JobManager, JobRequest};
use crate::runtime::task::shuffle::{ForwardConsumer, ShuffleConsumer, TargetRoute};
use crate::runtime::task::vertex_task::VertexTask;
use crate::runtime::task::{new_task_processor, Consumer, TaskContext};
use crate::strategy::{
    CalculationStrategy, DefaultPartitioningStrategy, SerializedHashingStrategy,
};

pub mod context;
pub mod deployment;
pub mod manager;

/// client-side handle of a submitted job
pub struct Job {
    job_name: String,
    manager: Arc<JobManager>,
}

impl Job {
    pub fn name(&self) -> &str {
        self.job_name.as_str()
    }

    pub fn state(&self) -> JobState {
        self.manager.state()
    }

    /// drive the job through its lifecycle: plan building, readiness,
    /// execution, then wait for the terminal state. the chain
    /// short-circuits on the first failed transition
    pub async fn execute(&self) -> Result<()> {
        self.manager.request(JobRequest::BuildExecutionPlan).await?;
        self.manager.request(JobRequest::ExecutionPlanReady).await?;
        self.manager.request(JobRequest::Execute).await?;
        self.manager.await_terminal().await
    }
}

/// per-member runtime state of one executing job
pub(crate) struct JobExecution {
    graph: Arc<ExecutionGraph>,
    origin: Member,
    scheduler: Arc<TaskScheduler>,
    input_senders: Arc<HashMap<TaskId, ElementSender>>,
    input_receivers: Mutex<HashMap<TaskId, ElementReceiver>>,
    writer_controls: RwLock<HashMap<MemberIndex, Arc<WriterControl>>>,
    remaining_tasks: Arc<AtomicUsize>,
}

struct JobEntry {
    context: Arc<JobContext>,
    listener: Mutex<Option<std::net::TcpListener>>,
    listen_addr: SocketAddr,
    dag: RwLock<Option<Arc<Dag>>>,
    manager: RwLock<Option<Arc<JobManager>>>,
    execution: RwLock<Option<Arc<JobExecution>>>,
}

/// one member's job service: owns the job registry and handles both the
/// client submission protocol and the structural requests of other members
pub struct JobService {
    cluster: Arc<dyn ClusterService>,
    handle: tokio::runtime::Handle,
    bind_ip: String,
    jobs: DashMap<String, Arc<JobEntry>>,
}

impl JobService {
    pub fn new(
        cluster: Arc<dyn ClusterService>,
        handle: tokio::runtime::Handle,
    ) -> Arc<JobService> {
        Self::with_bind_ip(cluster, handle, "127.0.0.1")
    }

    /// bind shuffle listeners on a specific interface, see
    /// `ClusterConfig::bind_ip`
    pub fn with_bind_ip(
        cluster: Arc<dyn ClusterService>,
        handle: tokio::runtime::Handle,
        bind_ip: &str,
    ) -> Arc<JobService> {
        Arc::new(JobService {
            cluster,
            handle,
            bind_ip: bind_ip.to_string(),
            jobs: DashMap::new(),
        })
    }

    fn entry(&self, job_name: &str) -> anyhow::Result<Arc<JobEntry>> {
        self.jobs
            .get(job_name)
            .map(|e| e.value().clone())
            .ok_or_else(|| anyhow!("job `{}` is not initialized on this member", job_name))
    }

    /// create the job context and bind the job-local shuffle listener
    pub fn init(&self, job_name: &str, properties: Properties) -> Result<bool> {
        if self.jobs.contains_key(job_name) {
            return Err(Error::msg(format!("job `{}` already initialized", job_name)));
        }

        let listener = std::net::TcpListener::bind(format!("{}:0", self.bind_ip))
            .map_err(|e| Error::msg(format!("bind job listener failed. {}", e)))?;
        let listen_addr = listener
            .local_addr()
            .map_err(|e| Error::msg(format!("resolve listener address failed. {}", e)))?;

        info!(
            "member {} init job `{}`, shuffle address {}",
            self.cluster.local_member(),
            job_name,
            listen_addr
        );

        let entry = Arc::new(JobEntry {
            context: Arc::new(JobContext::new(job_name, properties)),
            listener: Mutex::new(Some(listener)),
            listen_addr,
            dag: RwLock::new(None),
            manager: RwLock::new(None),
            execution: RwLock::new(None),
        });
        self.jobs.insert(job_name.to_string(), entry);
        Ok(true)
    }

    /// validate and accept a DAG. validation errors are rejected here,
    /// synchronously, and the job never starts executing
    pub fn submit(&self, job_name: &str, dag: Dag) -> Result<Job> {
        let entry = self.entry(job_name).map_err(Error::from)?;
        dag.validate().map_err(Error::wrap)?;

        let dag = Arc::new(dag);
        *entry.dag.write().unwrap() = Some(dag.clone());

        let manager = JobManager::start(job_name, dag, self.cluster.clone(), &self.handle);
        *entry.manager.write().unwrap() = Some(manager.clone());

        info!("job `{}` submitted on {}", job_name, self.cluster.local_member());
        Ok(Job {
            job_name: job_name.to_string(),
            manager,
        })
    }

    pub fn deploy_resource(&self, job_name: &str, chunk: Chunk) -> Result<bool> {
        let entry = self.entry(job_name).map_err(Error::from)?;
        entry
            .context
            .deployment_store()
            .apply_chunk(chunk)
            .map_err(Error::from)?;
        Ok(true)
    }

    pub fn finish_deployment(&self, job_name: &str) -> Result<bool> {
        let entry = self.entry(job_name).map_err(Error::from)?;
        entry
            .context
            .deployment_store()
            .finish()
            .map_err(Error::from)?;
        Ok(true)
    }

    /// local read-back of a job-scoped counter
    pub fn accumulator_value(&self, job_name: &str, key: &str) -> Option<i64> {
        self.jobs
            .get(job_name)
            .and_then(|entry| entry.context.accumulator_value(key))
    }

    pub fn job_context(&self, job_name: &str) -> Option<Arc<JobContext>> {
        self.jobs.get(job_name).map(|entry| entry.context.clone())
    }

    /// tear the job down and drop its context
    pub fn destroy(&self, job_name: &str) {
        self.teardown_local(job_name);
        self.jobs.remove(job_name);
    }

    /// entry point for structural requests arriving from any member
    pub async fn handle_member_request(
        &self,
        request: MemberRequest,
    ) -> anyhow::Result<MemberResponse> {
        match request {
            MemberRequest::Discovery { job_name } => {
                let entry = self.entry(job_name.as_str())?;
                Ok(MemberResponse::Address(entry.listen_addr))
            }
            MemberRequest::BuildExecutionPlan {
                job_name,
                dag,
                origin,
            } => {
                self.build_execution_plan(job_name.as_str(), dag, origin)?;
                Ok(MemberResponse::Ack)
            }
            MemberRequest::ExecutionPlanReady { job_name } => {
                self.plan_ready(job_name.as_str()).await?;
                Ok(MemberResponse::Ack)
            }
            MemberRequest::Execute { job_name } => {
                self.execute_local(job_name.as_str())?;
                Ok(MemberResponse::Ack)
            }
            MemberRequest::Teardown { job_name } => {
                self.teardown_local(job_name.as_str());
                Ok(MemberResponse::Ack)
            }
            MemberRequest::MemberFinished { job_name, member } => {
                let manager = self.manager_of(job_name.as_str())?;
                manager.notify(JobRequest::MemberFinished { member });
                Ok(MemberResponse::Ack)
            }
            MemberRequest::MemberFailed {
                job_name,
                member,
                cause,
            } => {
                let manager = self.manager_of(job_name.as_str())?;
                manager.notify(JobRequest::MemberFailed { member, cause });
                Ok(MemberResponse::Ack)
            }
        }
    }

    fn manager_of(&self, job_name: &str) -> anyhow::Result<Arc<JobManager>> {
        let entry = self.entry(job_name)?;
        let manager = entry.manager.read().unwrap().clone();
        manager.ok_or_else(|| anyhow!("job `{}` has no manager on this member", job_name))
    }

    /// expand the DAG into the execution plan and create the local task
    /// channels
    fn build_execution_plan(
        &self,
        job_name: &str,
        dag: Arc<Dag>,
        origin: Member,
    ) -> anyhow::Result<()> {
        let entry = self.entry(job_name)?;
        let member_count = self.cluster.members().len() as u32;
        let graph = Arc::new(ExecutionGraph::build(&dag, member_count)?);
        *entry.dag.write().unwrap() = Some(dag);

        let local = self.cluster.local_member();
        let channel_size = entry.context.properties().channel_size();

        let mut input_senders = HashMap::new();
        let mut input_receivers = HashMap::new();
        for task_id in graph.tasks_on_member(local.index) {
            let (sender, receiver) = named_channel(
                format!("task-input-{}", task_id).as_str(),
                channel_size,
            );
            input_senders.insert(task_id, sender);
            input_receivers.insert(task_id, receiver);
        }

        let scheduler = Arc::new(TaskScheduler::new(
            format!("{}@member-{}", job_name, local.index.0).as_str(),
        ));
        self.install_failure_hook(&scheduler, job_name, &origin, local.index);

        info!(
            "job `{}` execution plan built on {}: {} local tasks",
            job_name,
            local,
            input_senders.len()
        );

        *entry.execution.write().unwrap() = Some(Arc::new(JobExecution {
            graph,
            origin,
            scheduler,
            input_senders: Arc::new(input_senders),
            input_receivers: Mutex::new(input_receivers),
            writer_controls: RwLock::new(HashMap::new()),
            remaining_tasks: Arc::new(AtomicUsize::new(0)),
        }));
        Ok(())
    }

    /// any processing or transport error escalates to job-level failure on
    /// the originating member, with the cause forwarded to the job manager
    fn install_failure_hook(
        &self,
        scheduler: &TaskScheduler,
        job_name: &str,
        origin: &Member,
        local_index: MemberIndex,
    ) {
        let cluster = self.cluster.clone();
        let handle = self.handle.clone();
        let origin = origin.clone();
        let job_name = job_name.to_string();
        scheduler.set_failure_hook(Arc::new(move |e| {
            let request = MemberRequest::MemberFailed {
                job_name: job_name.clone(),
                member: local_index,
                cause: format!("{}", e),
            };
            let cluster = cluster.clone();
            let origin = origin.clone();
            handle.spawn(async move {
                if let Err(e) = cluster.invoke(&origin, request).await {
                    error!("failure report to {} failed. {}", origin, e);
                }
            });
        }));
    }

    fn execution_of(&self, job_name: &str) -> anyhow::Result<Arc<JobExecution>> {
        let entry = self.entry(job_name)?;
        let execution = entry.execution.read().unwrap().clone();
        execution.ok_or_else(|| anyhow!("job `{}` has no execution plan yet", job_name))
    }

    /// run discovery and wire up the shuffle I/O tasks
    async fn plan_ready(&self, job_name: &str) -> anyhow::Result<()> {
        let entry = self.entry(job_name)?;
        let execution = self.execution_of(job_name)?;

        let listener = entry
            .listener
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow!("job `{}` listener already consumed", job_name))?;

        let discovery =
            DiscoveryService::new(self.cluster.clone(), job_name, entry.context.clone());
        let controls = discovery
            .execute_discovery(
                listener,
                entry.listen_addr,
                execution.input_senders.clone(),
                &execution.scheduler,
            )
            .await?;

        *execution.writer_controls.write().unwrap() = controls;
        Ok(())
    }

    /// instantiate the local tasks with their consumers and start ticking
    fn execute_local(&self, job_name: &str) -> anyhow::Result<()> {
        let entry = self.entry(job_name)?;
        let execution = self.execution_of(job_name)?;
        let dag = entry
            .dag
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("job `{}` has no dag", job_name))?;

        let local = self.cluster.local_member();
        let graph = &execution.graph;
        let local_tasks = graph.tasks_on_member(local.index);
        execution
            .remaining_tasks
            .store(local_tasks.len(), Ordering::SeqCst);

        let strategy = CalculationStrategy::new(
            Arc::new(SerializedHashingStrategy),
            Arc::new(DefaultPartitioningStrategy),
            entry.context.clone(),
        );

        for task_id in &local_tasks {
            let vertex = dag.vertex(task_id.vertex_id());
            let consumers = self.build_consumers(task_id, &execution, &strategy)?;

            let task_context = TaskContext::new(*task_id, entry.context.clone());
            let processor = (vertex.factory())(&task_context);
            let mut task_processor = new_task_processor(
                processor,
                consumers,
                entry.context.properties().chunk_size(),
            );
            task_processor.on_open(&task_context)?;

            let receiver = execution
                .input_receivers
                .lock()
                .unwrap()
                .remove(task_id)
                .ok_or_else(|| anyhow!("task {} input channel missing", task_id))?;

            let vertex_task = VertexTask::new(
                *task_id,
                vertex.name(),
                task_processor,
                receiver,
                graph.upstream_of(task_id).len(),
                self.task_finished_hook(job_name, &execution),
            );
            execution.scheduler.register(Box::new(vertex_task));
        }

        execution.scheduler.start();
        info!(
            "job `{}` executing on {}: {} tasks",
            job_name,
            local,
            local_tasks.len()
        );

        if local_tasks.is_empty() {
            self.notify_member_finished(job_name, &execution.origin);
        }
        Ok(())
    }

    fn build_consumers(
        &self,
        task_id: &TaskId,
        execution: &JobExecution,
        strategy: &CalculationStrategy,
    ) -> anyhow::Result<Vec<Box<dyn Consumer>>> {
        let local = self.cluster.local_member();
        let graph = &execution.graph;
        let writer_controls = execution.writer_controls.read().unwrap();

        let mut consumers: Vec<Box<dyn Consumer>> = Vec::new();
        for (edge, targets) in graph.downstream_of(task_id) {
            match edge {
                ExecutionEdge::Forward => {
                    let target = targets[0];
                    let sender = execution
                        .input_senders
                        .get(&target)
                        .ok_or_else(|| anyhow!("forward target {} not local", target))?
                        .clone();
                    consumers.push(Box::new(ForwardConsumer::new(target, sender)));
                }
                ExecutionEdge::Hash => {
                    let mut routes = Vec::with_capacity(targets.len());
                    for target in targets {
                        let target_member = graph.member_of(&target);
                        if target_member == local.index {
                            let sender = execution
                                .input_senders
                                .get(&target)
                                .ok_or_else(|| anyhow!("task {} channel missing", target))?
                                .clone();
                            routes.push(TargetRoute::Local {
                                task_id: target,
                                sender,
                            });
                        } else {
                            let writer = writer_controls
                                .get(&target_member)
                                .ok_or_else(|| {
                                    anyhow!(
                                        "no writer for member-{} (task {})",
                                        target_member.0,
                                        target
                                    )
                                })?
                                .clone();
                            routes.push(TargetRoute::Remote {
                                task_id: target,
                                writer,
                            });
                        }
                    }
                    consumers.push(Box::new(ShuffleConsumer::new(routes, strategy.clone())));
                }
            }
        }
        Ok(consumers)
    }

    fn task_finished_hook(
        &self,
        job_name: &str,
        execution: &Arc<JobExecution>,
    ) -> Arc<dyn Fn(TaskId) + Send + Sync> {
        let remaining = execution.remaining_tasks.clone();
        let origin = execution.origin.clone();
        let cluster = self.cluster.clone();
        let handle = self.handle.clone();
        let local_index = self.cluster.local_member().index;
        let job_name = job_name.to_string();

        Arc::new(move |_task_id| {
            if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                let request = MemberRequest::MemberFinished {
                    job_name: job_name.clone(),
                    member: local_index,
                };
                let cluster = cluster.clone();
                let origin = origin.clone();
                handle.spawn(async move {
                    if let Err(e) = cluster.invoke(&origin, request).await {
                        error!("report member finished to {} failed. {}", origin, e);
                    }
                });
            }
        })
    }

    fn notify_member_finished(&self, job_name: &str, origin: &Member) {
        let request = MemberRequest::MemberFinished {
            job_name: job_name.to_string(),
            member: self.cluster.local_member().index,
        };
        let cluster = self.cluster.clone();
        let origin = origin.clone();
        self.handle.spawn(async move {
            if let Err(e) = cluster.invoke(&origin, request).await {
                error!("report member finished to {} failed. {}", origin, e);
            }
        });
    }

    fn teardown_local(&self, job_name: &str) {
        if let Ok(execution) = self.execution_of(job_name) {
            execution.scheduler.shutdown();
        }
        if let Some(entry) = self.jobs.get(job_name) {
            // a job torn down before plan-ready still holds its listener
            entry.listener.lock().unwrap().take();
        }
        info!(
            "job `{}` torn down on {}",
            job_name,
            self.cluster.local_member()
        );
    }
}
