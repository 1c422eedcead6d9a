//! Commands accepted by the controller actor.

use tokio::sync::oneshot;

use autopost_core::result::AppResult;
use autopost_core::types::id::JobId;
use autopost_entity::job::{Job, JobFilter};
use autopost_entity::request::BulkOperationRequest;

use super::state::QueueSnapshot;

pub(crate) type Reply<T> = oneshot::Sender<AppResult<T>>;

#[derive(Debug)]
pub(crate) enum Command {
    Submit(Box<BulkOperationRequest>, Reply<Vec<JobId>>),
    Start(Reply<()>),
    Pause(Reply<()>),
    Resume(Reply<()>),
    Stop(Reply<()>),
    CancelJob(JobId, Reply<Job>),
    PauseJob(JobId, Reply<()>),
    ResumeJob(JobId, Reply<()>),
    RetryJob(JobId, Reply<()>),
    RetryFailed(Reply<usize>),
    List(JobFilter, Reply<Vec<Job>>),
    Get(JobId, Reply<Job>),
    Snapshot(Reply<QueueSnapshot>),
    ClearFinished(Reply<usize>),
    Shutdown(Reply<()>),
}
