//! Worker pool executing scheduled jobs on background threads.
//!
//! Workers pull jobs from a shared [`JobScheduler`], skip jobs whose token
//! was cancelled before they started, and hand everything else to the
//! executor callback.

use crate::{CancellationToken, Job, JobScheduler};
use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Callback run for each job. Long-running executors should poll
/// `token.is_cancelled()` and return early.
pub type JobExecutor = Arc<dyn Fn(&Job, &CancellationToken) + Send + Sync>;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    /// Default: number of logical CPU cores.
    pub num_workers: usize,

    /// How long an idle worker sleeps before polling the queue again.
    /// Default: 10ms.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(default_worker_count())
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self { num_workers, poll_interval: Duration::from_millis(10) }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Pool of worker threads draining one scheduler.
///
/// Dropping the pool signals shutdown and joins every worker; jobs still in
/// the queue are left there.
///
/// # Example
///
/// ```
/// use folio_scheduler::{
///     CancellationToken, Job, JobPriority, JobScheduler, JobType, WorkerPool, WorkerPoolConfig,
/// };
/// use std::sync::Arc;
///
/// let scheduler = Arc::new(JobScheduler::new());
/// let executor = Arc::new(|job: &Job, token: &CancellationToken| {
///     if token.is_cancelled() {
///         return;
///     }
///     let JobType::RenderPage { page_id, .. } = &job.job_type;
///     println!("rendering page {page_id}");
/// });
///
/// let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(2))
///     .expect("spawn workers");
/// scheduler.submit(
///     JobPriority::Visible,
///     JobType::RenderPage { page_id: 0, zoom_permille: 1000, rotation: 0 },
/// );
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn `config.num_workers` threads pulling from `scheduler`.
    pub fn new(
        scheduler: Arc<JobScheduler>,
        executor: JobExecutor,
        config: WorkerPoolConfig,
    ) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = Self { workers: Vec::with_capacity(config.num_workers), shutdown };

        for id in 0..config.num_workers {
            let scheduler = Arc::clone(&scheduler);
            let executor = Arc::clone(&executor);
            let shutdown = Arc::clone(&pool.shutdown);
            let poll_interval = config.poll_interval;
            let handle = thread::Builder::new()
                .name(format!("folio-render-{id}"))
                .spawn(move || run(&scheduler, &executor, &shutdown, poll_interval))?;
            pool.workers.push(handle);
        }

        log::debug!("started {} render workers", pool.workers.len());
        Ok(pool)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Signal shutdown and wait for workers to finish their current job.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("render worker panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    scheduler: &JobScheduler,
    executor: &JobExecutor,
    shutdown: &AtomicBool,
    poll_interval: Duration,
) {
    while !shutdown.load(Ordering::Acquire) {
        let Some(job) = scheduler.next_job() else {
            thread::sleep(poll_interval);
            continue;
        };

        let token = scheduler.get_cancellation_token(job.id).unwrap_or_default();
        if !token.is_cancelled() {
            (**executor)(&job, &token);
        }
        scheduler.complete_job(job.id);
    }
}

/// Number of logical CPU cores, used as the default worker count.
pub fn default_worker_count() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobPriority, JobType};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Instant;

    fn render(page_id: u64) -> JobType {
        JobType::RenderPage { page_id, zoom_permille: 1000, rotation: 0 }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_worker_pool_config() {
        assert!(WorkerPoolConfig::default().num_workers > 0);
        let config = WorkerPoolConfig::new(4).with_poll_interval(Duration::from_millis(50));
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_worker_pool_executes_jobs() {
        let scheduler = Arc::new(JobScheduler::new());
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&executed);
        let executor: JobExecutor = Arc::new(move |_job: &Job, _token: &CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(2)).unwrap();
        assert_eq!(pool.num_workers(), 2);
        for page in 0..5 {
            scheduler.submit(JobPriority::Visible, render(page));
        }

        assert!(wait_until(|| executed.load(Ordering::SeqCst) == 5));
        pool.shutdown();
    }

    #[test]
    fn test_cancelled_jobs_are_skipped() {
        let scheduler = Arc::new(JobScheduler::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let executor: JobExecutor = Arc::new(move |job: &Job, _token: &CancellationToken| {
            log.lock().unwrap().push(job.job_type.page_id());
        });

        // queue first, start workers afterwards so cancellation wins the race
        scheduler.submit(JobPriority::Visible, render(1));
        let (doomed, _) = scheduler.submit(JobPriority::Visible, render(2));
        scheduler.submit(JobPriority::Visible, render(3));
        assert_eq!(scheduler.cancel_page_jobs(2), vec![doomed]);

        let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(1)).unwrap();
        assert!(wait_until(|| seen.lock().unwrap().len() == 2));
        pool.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_single_worker_respects_priority() {
        let scheduler = Arc::new(JobScheduler::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&order);
        let executor: JobExecutor = Arc::new(move |job: &Job, _token: &CancellationToken| {
            log.lock().unwrap().push(job.job_type.page_id());
        });

        scheduler.submit(JobPriority::Background, render(3));
        scheduler.submit(JobPriority::Visible, render(1));
        scheduler.submit(JobPriority::Prefetch, render(2));

        let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(1)).unwrap();
        assert!(wait_until(|| order.lock().unwrap().len() == 3));
        drop(pool);

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_drop_joins_workers() {
        let scheduler = Arc::new(JobScheduler::new());
        let executor: JobExecutor = Arc::new(|_job: &Job, _token: &CancellationToken| {});
        let pool = WorkerPool::new(scheduler, executor, WorkerPoolConfig::new(3)).unwrap();
        assert_eq!(pool.num_workers(), 3);
        drop(pool);
    }
}
