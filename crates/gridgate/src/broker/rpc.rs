use crate::JobId;
use crate::admission::{RequestError, SubmitRequest};
use crate::broker::{Broker, Scheduler};
use crate::common::error::GridgateError;
use crate::common::rpc::{ResponseToken, RpcReceiver, RpcSender, initiate_request, make_rpc_queue};
use crate::gridengine::ControlAction;
use crate::gridengine::parse::BackendInfo;
use crate::monitor::JobDescriptor;
use crate::session::Readiness;

#[derive(Debug)]
pub enum BrokerRequest {
    Submit(
        SubmitRequest,
        ResponseToken<Result<JobDescriptor, RequestError>>,
    ),
    /// Looks up a tracked or recently finished job.
    GetJob(JobId, ResponseToken<Option<JobDescriptor>>),
    TrackedJobs(ResponseToken<Vec<JobDescriptor>>),
    Control {
        job_id: JobId,
        action: ControlAction,
        response: ResponseToken<crate::Result<()>>,
    },
    BackendInfo(ResponseToken<crate::Result<BackendInfo>>),
    Stop,
}

fn broker_stopped() -> GridgateError {
    GridgateError::GenericError("Broker is not running".to_string())
}

/// Handle through which external callers talk to the broker.
#[derive(Clone)]
pub struct BrokerService {
    sender: RpcSender<BrokerRequest>,
}

impl BrokerService {
    pub async fn submit(&self, request: SubmitRequest) -> Result<JobDescriptor, RequestError> {
        let fut =
            initiate_request(|token| self.sender.send(BrokerRequest::Submit(request, token)));
        fut.await
            .unwrap_or_else(|_| Err(RequestError::Failed(broker_stopped())))
    }

    pub async fn get_job(&self, job_id: JobId) -> crate::Result<Option<JobDescriptor>> {
        let fut = initiate_request(|token| self.sender.send(BrokerRequest::GetJob(job_id, token)));
        fut.await.map_err(|_| broker_stopped())
    }

    pub async fn tracked_jobs(&self) -> crate::Result<Vec<JobDescriptor>> {
        let fut = initiate_request(|token| self.sender.send(BrokerRequest::TrackedJobs(token)));
        fut.await.map_err(|_| broker_stopped())
    }

    pub async fn control(&self, job_id: JobId, action: ControlAction) -> crate::Result<()> {
        let fut = initiate_request(|token| {
            self.sender.send(BrokerRequest::Control {
                job_id,
                action,
                response: token,
            })
        });
        fut.await.map_err(|_| broker_stopped())?
    }

    /// Waits until the grid engine has been probed.
    pub async fn backend_info(&self) -> crate::Result<BackendInfo> {
        let fut = initiate_request(|token| self.sender.send(BrokerRequest::BackendInfo(token)));
        fut.await.map_err(|_| broker_stopped())?
    }

    pub fn stop(&self) {
        if self.sender.send(BrokerRequest::Stop).is_err() {
            log::debug!("Broker has already stopped");
        }
    }
}

pub fn create_broker_service() -> (BrokerService, RpcReceiver<BrokerRequest>) {
    let (sender, receiver) = make_rpc_queue();
    (BrokerService { sender }, receiver)
}

/// Runs the broker until it is stopped or all service handles are dropped.
///
/// Must be called inside a `LocalSet`.
pub async fn run_broker(broker: Broker, receiver: RpcReceiver<BrokerRequest>) {
    if let Readiness::Failed(error) = broker.sessions.initialize().await {
        log::error!("Submissions will be refused: {error}");
    }
    let scheduler = Scheduler::start(&broker);
    log::info!("Broker is running");

    process_requests(&broker, receiver).await;

    scheduler.stop().await;
    broker.sessions.get_mut().close_all();
    log::info!("Broker has stopped");
}

async fn process_requests(broker: &Broker, mut receiver: RpcReceiver<BrokerRequest>) {
    while let Some(request) = receiver.recv().await {
        match request {
            BrokerRequest::Submit(request, response) => {
                let admission = broker.admission.clone();
                tokio::task::spawn_local(async move {
                    response.respond(admission.handle_request(request).await);
                });
            }
            BrokerRequest::GetJob(job_id, response) => {
                let job = broker.monitor.get().find_job(&job_id).cloned();
                response.respond(job);
            }
            BrokerRequest::TrackedJobs(response) => {
                let jobs = broker.monitor.get().tracked_jobs();
                response.respond(jobs);
            }
            BrokerRequest::Control {
                job_id,
                action,
                response,
            } => {
                let broker = broker.clone();
                tokio::task::spawn_local(async move {
                    response.respond(broker.control_job(&job_id, action).await);
                });
            }
            BrokerRequest::BackendInfo(response) => {
                let sessions = broker.sessions.clone();
                tokio::task::spawn_local(async move {
                    response.respond(sessions.wait_ready().await);
                });
            }
            BrokerRequest::Stop => break,
        }
    }
}
