//! Background job scheduling for folio.
//!
//! Render requests are queued by priority and drained by a pool of worker
//! threads. Jobs name pages by stable id so structural edits made while a
//! job is queued do not redirect it to a different page; jobs for deleted
//! pages are cancelled through [`JobScheduler::cancel_page_jobs`].

mod cancel;
mod priority;
mod scheduler;
mod worker;

pub use cancel::{CancellationRegistry, CancellationToken};
pub use priority::{Job, JobId, JobPriority, JobType, PriorityQueue};
pub use scheduler::{JobScheduler, SchedulerStats};
pub use worker::{default_worker_count, JobExecutor, WorkerPool, WorkerPoolConfig};
