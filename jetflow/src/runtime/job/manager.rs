//! job lifecycle state machine. one command loop per job serializes every
//! transition; cross-member propagation is the one place genuine
//! asynchronous completion is used. continuations are ordered `.await`
//! stages, never nested callbacks.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, oneshot, watch};

use crate::core::error::{Error, Result};
use crate::core::runtime::{JobState, Member, MemberIndex};
use crate::dag::Dag;
use crate::runtime::cluster::{ClusterService, MemberRequest};
use crate::utils::date_time::{current_timestamp_millis, timestamp_str};

/// binary outcome of one state-machine transition. a failure carries the
/// described cause, never a bare boolean
#[derive(Debug)]
pub enum JobManagerResponse {
    Success,
    Failure(anyhow::Error),
}

impl JobManagerResponse {
    pub fn is_success(&self) -> bool {
        match self {
            JobManagerResponse::Success => true,
            JobManagerResponse::Failure(_) => false,
        }
    }
}

#[derive(Debug)]
pub enum JobRequest {
    /// Created -> BuildingExecutionPlan, plan built on every member
    BuildExecutionPlan,
    /// BuildingExecutionPlan -> ExecutionPlanReady, discovery wired up
    ExecutionPlanReady,
    /// ExecutionPlanReady -> Executing
    Execute,
    /// a member reports all of its tasks finalized
    MemberFinished { member: MemberIndex },
    /// a member reports job-invalidating failure
    MemberFailed { member: MemberIndex, cause: String },
}

type Command = (JobRequest, Option<oneshot::Sender<JobManagerResponse>>);

pub struct JobManager {
    job_name: String,
    sender: mpsc::Sender<Command>,
    state_receiver: watch::Receiver<JobState>,
    failure_cause: Arc<RwLock<Option<String>>>,
}

impl JobManager {
    pub fn start(
        job_name: &str,
        dag: Arc<Dag>,
        cluster: Arc<dyn ClusterService>,
        handle: &tokio::runtime::Handle,
    ) -> Arc<JobManager> {
        let (sender, receiver) = mpsc::channel(64);
        let (state_sender, state_receiver) = watch::channel(JobState::Created);
        let failure_cause = Arc::new(RwLock::new(None));

        let driver = Driver {
            job_name: job_name.to_string(),
            dag,
            cluster,
            state_sender,
            failure_cause: failure_cause.clone(),
            finished_members: HashSet::new(),
        };
        handle.spawn(driver.run(receiver));

        Arc::new(JobManager {
            job_name: job_name.to_string(),
            sender,
            state_receiver,
            failure_cause,
        })
    }

    /// submit one transition request and resolve its response
    /// asynchronously. concurrent submissions queue behind the in-flight
    /// transition, they never interleave
    pub async fn request(&self, request: JobRequest) -> Result<()> {
        let (responder, response) = oneshot::channel();
        self.sender
            .send((request, Some(responder)))
            .await
            .map_err(|_| Error::msg(format!("job {} manager stopped", self.job_name)))?;

        match response.await {
            Ok(JobManagerResponse::Success) => Ok(()),
            Ok(JobManagerResponse::Failure(e)) => Err(Error::from(e)),
            Err(_) => Err(Error::msg(format!(
                "job {} manager dropped the request",
                self.job_name
            ))),
        }
    }

    /// fire-and-forget notification, usable from any thread
    pub fn notify(&self, request: JobRequest) {
        if let Err(e) = self.sender.try_send((request, None)) {
            warn!("job {} notification dropped. {}", self.job_name, e);
        }
    }

    pub fn state(&self) -> JobState {
        *self.state_receiver.borrow()
    }

    pub fn failure_cause(&self) -> Option<String> {
        self.failure_cause.read().unwrap().clone()
    }

    /// resolve once the job reaches a terminal state
    pub async fn await_terminal(&self) -> Result<()> {
        let mut receiver = self.state_receiver.clone();
        loop {
            let state = *receiver.borrow_and_update();
            if state.is_terminal() {
                break;
            }
            receiver
                .changed()
                .await
                .map_err(|_| Error::msg(format!("job {} manager stopped", self.job_name)))?;
        }

        let final_state = *receiver.borrow();
        match final_state {
            JobState::Completed => Ok(()),
            _ => Err(Error::msg(
                self.failure_cause()
                    .unwrap_or_else(|| format!("job {} failed", self.job_name)),
            )),
        }
    }
}

struct Driver {
    job_name: String,
    dag: Arc<Dag>,
    cluster: Arc<dyn ClusterService>,
    state_sender: watch::Sender<JobState>,
    failure_cause: Arc<RwLock<Option<String>>>,
    finished_members: HashSet<MemberIndex>,
}

impl Driver {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        while let Some((request, responder)) = receiver.recv().await {
            let response = self.handle(request).await;
            if let Some(responder) = responder {
                let _ = responder.send(response);
            }
        }
        debug!("job {} manager loop stopped", self.job_name);
    }

    fn state(&self) -> JobState {
        *self.state_sender.borrow()
    }

    fn set_state(&self, next: JobState) {
        let current = self.state();
        info!(
            "job {} state {} -> {} at {}",
            self.job_name,
            current,
            next,
            timestamp_str(current_timestamp_millis())
        );
        let _ = self.state_sender.send(next);
    }

    async fn handle(&mut self, request: JobRequest) -> JobManagerResponse {
        let state = self.state();
        if state.is_terminal() {
            return JobManagerResponse::Failure(anyhow!(
                "job {} already reached terminal state {}",
                self.job_name,
                state
            ));
        }

        match request {
            JobRequest::BuildExecutionPlan => {
                if state != JobState::Created {
                    return self.illegal_transition("ExecutionPlanBuilderRequest", state);
                }
                self.set_state(JobState::BuildingExecutionPlan);
                let dag = self.dag.clone();
                let origin = self.cluster.local_member();
                self.fan_out(move |job_name, _member| MemberRequest::BuildExecutionPlan {
                    job_name,
                    dag: dag.clone(),
                    origin: origin.clone(),
                })
                .await
            }
            JobRequest::ExecutionPlanReady => {
                if state != JobState::BuildingExecutionPlan {
                    return self.illegal_transition("ExecutionPlanReadyRequest", state);
                }
                let response = self
                    .fan_out(|job_name, _member| MemberRequest::ExecutionPlanReady { job_name })
                    .await;
                if response.is_success() {
                    self.set_state(JobState::ExecutionPlanReady);
                }
                response
            }
            JobRequest::Execute => {
                if state != JobState::ExecutionPlanReady {
                    return self.illegal_transition("ExecuteRequest", state);
                }
                let response = self
                    .fan_out(|job_name, _member| MemberRequest::Execute { job_name })
                    .await;
                if response.is_success() {
                    self.set_state(JobState::Executing);
                }
                response
            }
            JobRequest::MemberFinished { member } => {
                self.finished_members.insert(member);
                debug!(
                    "job {}: {}/{} members finished",
                    self.job_name,
                    self.finished_members.len(),
                    self.cluster.members().len()
                );
                if state == JobState::Executing
                    && self.finished_members.len() == self.cluster.members().len()
                {
                    // release every member's resources before the terminal
                    // state becomes observable
                    self.teardown().await;
                    self.set_state(JobState::Completed);
                }
                JobManagerResponse::Success
            }
            JobRequest::MemberFailed { member, cause } => {
                self.fail(anyhow!("member-{} reported: {}", member.0, cause))
                    .await;
                JobManagerResponse::Success
            }
        }
    }

    fn illegal_transition(&self, request_name: &str, state: JobState) -> JobManagerResponse {
        JobManagerResponse::Failure(anyhow!(
            "job {}: {} rejected in state {}",
            self.job_name,
            request_name,
            state
        ))
    }

    /// propagate one structural request to every member. any member failing
    /// short-circuits the chain and fails the job with the originating
    /// member's cause
    async fn fan_out<F>(&mut self, request_of: F) -> JobManagerResponse
    where
        F: Fn(String, &Member) -> MemberRequest,
    {
        let members = self.cluster.members();
        let invocations = members.iter().map(|member| {
            let request = request_of(self.job_name.clone(), member);
            let cluster = self.cluster.clone();
            async move {
                cluster
                    .invoke(member, request)
                    .await
                    .map_err(|e| anyhow!("{} reported: {}", member, e))
            }
        });

        match futures::future::try_join_all(invocations).await {
            Ok(_) => JobManagerResponse::Success,
            Err(e) => {
                let cause = format!("{}", e);
                self.fail(e).await;
                JobManagerResponse::Failure(anyhow!(cause))
            }
        }
    }

    async fn fail(&mut self, cause: anyhow::Error) {
        if self.state().is_terminal() {
            return;
        }
        error!("job {} failed. {}", self.job_name, cause);
        *self.failure_cause.write().unwrap() = Some(format!("{}", cause));
        self.teardown().await;
        self.set_state(JobState::Failed);
    }

    /// job-granular cancellation: every member stops scheduling and releases
    /// the job's resources
    async fn teardown(&self) {
        for member in self.cluster.members() {
            let request = MemberRequest::Teardown {
                job_name: self.job_name.clone(),
            };
            if let Err(e) = self.cluster.invoke(&member, request).await {
                warn!(
                    "job {} teardown on {} failed. {}",
                    self.job_name, member, e
                );
            }
        }
    }
}
