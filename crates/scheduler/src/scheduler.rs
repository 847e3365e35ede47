//! Job scheduler: submission, ordering, cancellation and bookkeeping.

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::priority::{Job, JobId, JobPriority, JobType, PriorityQueue};
use std::sync::{Arc, Mutex};

/// Job scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Total jobs submitted
    pub jobs_submitted: u64,

    /// Total jobs completed
    pub jobs_completed: u64,

    /// Total jobs cancelled before they ran
    pub jobs_cancelled: u64,

    /// Current queue size
    pub queue_size: usize,
}

impl SchedulerStats {
    pub fn pending_jobs(&self) -> u64 {
        self.jobs_submitted - self.jobs_completed - self.jobs_cancelled
    }
}

/// Job scheduler with priority queue
///
/// # Example
///
/// ```
/// use folio_scheduler::{JobPriority, JobScheduler, JobType};
///
/// let scheduler = JobScheduler::new();
/// let (job_id, token) = scheduler.submit(
///     JobPriority::Visible,
///     JobType::RenderPage { page_id: 3, zoom_permille: 1000, rotation: 0 },
/// );
///
/// if let Some(job) = scheduler.next_job() {
///     assert_eq!(job.id, job_id);
///     assert!(!token.is_cancelled());
///     scheduler.complete_job(job.id);
/// }
/// ```
pub struct JobScheduler {
    queue: PriorityQueue,
    state: Arc<Mutex<SchedulerState>>,
    cancellation: CancellationRegistry,
}

struct SchedulerState {
    stats: SchedulerStats,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            state: Arc::new(Mutex::new(SchedulerState { stats: SchedulerStats::default() })),
            cancellation: CancellationRegistry::new(),
        }
    }

    /// Queue a job and register its cancellation token.
    pub fn submit(&self, priority: JobPriority, job_type: JobType) -> (JobId, CancellationToken) {
        let job_id = self.queue.push(priority, job_type);
        let token = self.cancellation.register(job_id);
        self.state.lock().unwrap().stats.jobs_submitted += 1;
        (job_id, token)
    }

    /// Pop the highest priority job. Its token stays registered until
    /// [`complete_job`](Self::complete_job) is called.
    pub fn next_job(&self) -> Option<Job> {
        self.queue.pop()
    }

    pub fn complete_job(&self, job_id: JobId) {
        self.state.lock().unwrap().stats.jobs_completed += 1;
        self.cancellation.unregister(job_id);
    }

    /// Cancel and dequeue every queued job matching `predicate`.
    ///
    /// Returns the IDs of the removed jobs.
    pub fn cancel_jobs_if<F>(&self, predicate: F) -> Vec<JobId>
    where
        F: Fn(&Job) -> bool,
    {
        let removed = self.queue.remove_if(predicate);
        if removed.is_empty() {
            return removed;
        }

        self.cancellation.cancel_many(&removed);
        self.state.lock().unwrap().stats.jobs_cancelled += removed.len() as u64;
        for job_id in &removed {
            self.cancellation.unregister(*job_id);
        }
        removed
    }

    /// Cancel all queued jobs for one page.
    pub fn cancel_page_jobs(&self, page_id: u64) -> Vec<JobId> {
        self.cancel_jobs_if(|job| job.job_type.page_id() == page_id)
    }

    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Cancel everything, queued or running.
    pub fn clear(&self) {
        self.cancellation.cancel_all();
        let removed = self.queue.remove_if(|_| true);
        for job_id in &removed {
            self.cancellation.unregister(*job_id);
        }
        self.state.lock().unwrap().stats.jobs_cancelled += removed.len() as u64;
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.state.lock().unwrap().stats.clone();
        stats.queue_size = self.queue.len();
        stats
    }

    pub fn get_cancellation_token(&self, job_id: JobId) -> Option<CancellationToken> {
        self.cancellation.get(job_id)
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}
