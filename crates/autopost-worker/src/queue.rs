//! In-memory job queue: priority-then-FIFO ready heap plus a delayed set
//! for backoff and scheduled start times.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing;

use autopost_core::error::AppError;
use autopost_core::types::id::JobId;
use autopost_entity::job::{Job, JobFilter, JobPriority, JobStatus};

/// Result of pausing a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    /// The job was queued and is now paused.
    Paused,
    /// The job is running; it parks at its next step boundary.
    AtNextStep,
    /// The job was already paused.
    AlreadyPaused,
}

/// Counts of job records by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    /// Queued jobs waiting on a backoff or schedule time.
    pub delayed: usize,
    pub running: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyEntry {
    priority: JobPriority,
    seq: u64,
    id: JobId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence (older) first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Stale heap entries tolerated beyond twice the live ready set before the
/// heap is rebuilt.
const READY_SLACK: usize = 64;

/// Holds every job record the controller knows about.
///
/// Ready jobs are ordered by priority, then by admission order. Heap entries
/// are removed lazily: an entry only counts if its id is still in the
/// `queued` set when popped. The heap is compacted once stale entries
/// outnumber live ones by more than [`READY_SLACK`].
#[derive(Debug)]
pub struct JobQueue {
    jobs: HashMap<JobId, Job>,
    /// Admission sequence per job, stable across requeues.
    order: HashMap<JobId, u64>,
    ready: BinaryHeap<ReadyEntry>,
    queued: HashSet<JobId>,
    delayed: BTreeMap<(Instant, u64), JobId>,
    delayed_at: HashMap<JobId, Instant>,
    next_seq: u64,
    max_jobs: usize,
}

impl JobQueue {
    /// Create a queue holding at most `max_jobs` records.
    pub fn new(max_jobs: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            order: HashMap::new(),
            ready: BinaryHeap::new(),
            queued: HashSet::new(),
            delayed: BTreeMap::new(),
            delayed_at: HashMap::new(),
            next_seq: 0,
            max_jobs,
        }
    }

    /// Records that can still be admitted.
    pub fn remaining_capacity(&self) -> usize {
        self.max_jobs.saturating_sub(self.jobs.len())
    }

    /// Admit a new queued job.
    pub fn enqueue(&mut self, job: Job) -> Result<(), AppError> {
        if self.jobs.len() >= self.max_jobs {
            return Err(AppError::queue_full(format!(
                "Queue is full ({} jobs)",
                self.max_jobs
            )));
        }
        if self.jobs.contains_key(&job.id) {
            return Err(AppError::conflict(format!("Job {} already queued", job.id)));
        }
        if job.status != JobStatus::Queued {
            return Err(AppError::validation(format!(
                "Job {} must be queued to be admitted, found {}",
                job.id, job.status
            )));
        }

        let id = job.id;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(id, seq);

        tracing::debug!(
            "Enqueued job: id={}, kind='{}', priority={}",
            id,
            job.kind,
            job.priority.as_str()
        );

        let scheduled_at = job.scheduled_at;
        self.jobs.insert(id, job);
        self.make_eligible(id, scheduled_at);
        Ok(())
    }

    /// Put a queued job back in line, honouring its schedule time.
    pub fn requeue(&mut self, id: JobId) -> Result<(), AppError> {
        let job = self.queued_job(id)?;
        let scheduled_at = job.scheduled_at;
        self.make_eligible(id, scheduled_at);
        Ok(())
    }

    /// Hold a queued job back until `until`.
    pub fn defer(&mut self, id: JobId, until: Instant) -> Result<(), AppError> {
        self.queued_job(id)?;
        self.unschedule(id);
        let seq = self.seq_of(id);
        self.delayed.insert((until, seq), id);
        self.delayed_at.insert(id, until);
        Ok(())
    }

    /// Move delayed jobs whose time has come into the ready heap.
    pub fn promote_due(&mut self, now: Instant) -> usize {
        let mut promoted = 0;
        while let Some((&(at, _), _)) = self.delayed.first_key_value() {
            if at > now {
                break;
            }
            let Some((_, id)) = self.delayed.pop_first() else {
                break;
            };
            if self.delayed_at.get(&id) != Some(&at) {
                continue;
            }
            self.delayed_at.remove(&id);
            if self.status_of(id) == Some(JobStatus::Queued) {
                self.push_ready(id);
                promoted += 1;
            }
        }
        promoted
    }

    /// Earliest pending delayed admission.
    pub fn next_due(&self) -> Option<Instant> {
        self.delayed.first_key_value().map(|(&(at, _), _)| at)
    }

    /// Check if any job is ready to dispatch.
    pub fn has_ready(&self) -> bool {
        !self.queued.is_empty()
    }

    /// Take the highest-priority, oldest ready job.
    ///
    /// The job stays in the queue with status `Queued`; the caller starts it.
    pub fn dequeue_next(&mut self) -> Option<JobId> {
        while let Some(entry) = self.ready.pop() {
            if self.queued.remove(&entry.id)
                && self.status_of(entry.id) == Some(JobStatus::Queued)
            {
                return Some(entry.id);
            }
        }
        None
    }

    /// Pause a single job.
    pub fn pause(&mut self, id: JobId, now: DateTime<Utc>) -> Result<PauseOutcome, AppError> {
        let status = self.status_of(id).ok_or_else(|| not_found(id))?;
        match status {
            JobStatus::Queued => {
                self.unschedule(id);
                self.job_mut(id)?.transition(JobStatus::Paused, now)?;
                Ok(PauseOutcome::Paused)
            }
            JobStatus::Running => Ok(PauseOutcome::AtNextStep),
            JobStatus::Paused => Ok(PauseOutcome::AlreadyPaused),
            other => Err(AppError::conflict(format!(
                "Job {id} is {other} and cannot be paused"
            ))),
        }
    }

    /// Return a paused job to the queue.
    pub fn resume(&mut self, id: JobId, now: DateTime<Utc>) -> Result<(), AppError> {
        let job = self.job_mut(id)?;
        if job.status != JobStatus::Paused {
            return Err(AppError::conflict(format!(
                "Job {} is {} and cannot be resumed",
                id, job.status
            )));
        }
        job.transition(JobStatus::Queued, now)?;
        let scheduled_at = job.scheduled_at;
        self.make_eligible(id, scheduled_at);
        Ok(())
    }

    /// Cancel a job and drop its record, returning the final state.
    pub fn cancel(&mut self, id: JobId, now: DateTime<Utc>) -> Result<Job, AppError> {
        let job = self.job_mut(id)?;
        if !job.status.can_transition_to(JobStatus::Cancelled) {
            return Err(AppError::conflict(format!(
                "Job {} is {} and cannot be cancelled",
                id, job.status
            )));
        }
        job.transition(JobStatus::Cancelled, now)?;
        job.completed_at = Some(now);
        self.unschedule(id);
        self.order.remove(&id);
        self.jobs.remove(&id).ok_or_else(|| not_found(id))
    }

    /// Drop completed and failed records. Returns the removed ids.
    pub fn clear_finished(&mut self) -> Vec<JobId> {
        let finished: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| matches!(j.status, JobStatus::Completed | JobStatus::Failed))
            .map(|j| j.id)
            .collect();

        for id in &finished {
            self.jobs.remove(id);
            self.order.remove(id);
        }
        finished
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    /// Jobs matching `filter`, in admission order.
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().filter(|j| filter.matches(j)).collect();
        jobs.sort_by_key(|j| self.seq_of(j.id));
        jobs.into_iter().cloned().collect()
    }

    /// Ids of jobs in `status`, in admission order.
    pub fn ids_with_status(&self, status: JobStatus) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.status == status)
            .map(|j| j.id)
            .collect();
        ids.sort_by_key(|id| self.seq_of(*id));
        ids
    }

    /// Number of jobs in `status`.
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.values().filter(|j| j.status == status).count()
    }

    /// Check that nothing is waiting or running.
    pub fn is_drained(&self) -> bool {
        !self
            .jobs
            .values()
            .any(|j| matches!(j.status, JobStatus::Queued | JobStatus::Running))
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.jobs.len(),
            delayed: self.delayed_at.len(),
            ..QueueStats::default()
        };
        for job in self.jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Paused => stats.paused += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => {}
            }
        }
        stats
    }

    fn make_eligible(&mut self, id: JobId, scheduled_at: Option<DateTime<Utc>>) {
        let wait = scheduled_at
            .map(|at| at - Utc::now())
            .and_then(|delta| delta.to_std().ok())
            .filter(|wait| !wait.is_zero());

        match wait {
            Some(wait) => {
                let seq = self.seq_of(id);
                let until = Instant::now() + wait;
                self.queued.remove(&id);
                self.delayed.insert((until, seq), id);
                self.delayed_at.insert(id, until);
            }
            None => {
                self.delayed_at.remove(&id);
                self.push_ready(id);
            }
        }
    }

    fn push_ready(&mut self, id: JobId) {
        let Some(job) = self.jobs.get(&id) else {
            return;
        };
        if self.queued.insert(id) {
            self.ready.push(ReadyEntry {
                priority: job.priority,
                seq: self.seq_of(id),
                id,
            });
            if self.ready.len() > 2 * self.queued.len() + READY_SLACK {
                self.compact_ready();
            }
        }
    }

    /// Drop heap entries for ids no longer ready, keeping one per live id.
    fn compact_ready(&mut self) {
        let before = self.ready.len();
        let queued = &self.queued;
        let mut kept = HashSet::with_capacity(queued.len());
        self.ready
            .retain(|entry| queued.contains(&entry.id) && kept.insert(entry.id));
        tracing::trace!("Compacted ready heap from {} to {} entries", before, self.ready.len());
    }

    /// Take a job out of the ready set and the delayed set.
    fn unschedule(&mut self, id: JobId) {
        self.queued.remove(&id);
        if let Some(at) = self.delayed_at.remove(&id) {
            self.delayed.remove(&(at, self.seq_of(id)));
        }
    }

    fn seq_of(&self, id: JobId) -> u64 {
        self.order.get(&id).copied().unwrap_or(u64::MAX)
    }

    fn status_of(&self, id: JobId) -> Option<JobStatus> {
        self.jobs.get(&id).map(|j| j.status)
    }

    fn job_mut(&mut self, id: JobId) -> Result<&mut Job, AppError> {
        self.jobs.get_mut(&id).ok_or_else(|| not_found(id))
    }

    fn queued_job(&self, id: JobId) -> Result<&Job, AppError> {
        let job = self.jobs.get(&id).ok_or_else(|| not_found(id))?;
        if job.status != JobStatus::Queued {
            return Err(AppError::invalid_state(format!(
                "Job {} is {} but was scheduled as queued",
                id, job.status
            )));
        }
        Ok(job)
    }
}

fn not_found(id: JobId) -> AppError {
    AppError::not_found(format!("Job {id} not found"))
}
