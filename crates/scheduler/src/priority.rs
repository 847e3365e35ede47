//! Priority-based job queue
//!
//! Jobs are dequeued in priority order, FIFO within one priority level.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

/// Job priority levels
///
/// Higher numeric values have higher priority and are executed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// Work nobody is waiting for yet
    Background = 0,

    /// Pages next to the visible ones
    Prefetch = 1,

    /// Pages on screen (highest priority)
    Visible = 2,
}

/// Unique job identifier
pub type JobId = u64;

/// What a job does.
///
/// Pages are identified by their stable page id, not their index, so a
/// queued job keeps pointing at the same page while the document is edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobType {
    /// Rasterize one page at a zoom (thousandths) and extra rotation (degrees)
    RenderPage { page_id: u64, zoom_permille: u32, rotation: u16 },
}

impl JobType {
    pub fn page_id(&self) -> u64 {
        match self {
            Self::RenderPage { page_id, .. } => *page_id,
        }
    }
}

/// A scheduled job with priority
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    /// Job priority level
    pub priority: JobPriority,

    /// Job type and parameters
    pub job_type: JobType,

    /// Insertion order (used for FIFO within same priority)
    insertion_order: u64,
}

impl Job {
    pub fn new(id: JobId, priority: JobPriority, job_type: JobType, insertion_order: u64) -> Self {
        Self { id, priority, job_type, insertion_order }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap, so earlier insertions must compare greater
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

/// Thread-safe priority queue for jobs
pub struct PriorityQueue {
    state: Arc<Mutex<QueueState>>,
}

struct QueueState {
    heap: BinaryHeap<Job>,
    next_job_id: JobId,
    insertion_counter: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_job_id: 1,
                insertion_counter: 0,
            })),
        }
    }

    /// Push a job and return its assigned ID.
    pub fn push(&self, priority: JobPriority, job_type: JobType) -> JobId {
        let mut state = self.state.lock().unwrap();
        let job_id = state.next_job_id;
        state.next_job_id += 1;

        let insertion_order = state.insertion_counter;
        state.insertion_counter += 1;

        state.heap.push(Job::new(job_id, priority, job_type, insertion_order));
        job_id
    }

    pub fn pop(&self) -> Option<Job> {
        self.state.lock().unwrap().heap.pop()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().heap.is_empty()
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().heap.clear();
    }

    /// Remove all jobs matching a predicate, returning their IDs.
    pub fn remove_if<F>(&self, predicate: F) -> Vec<JobId>
    where
        F: Fn(&Job) -> bool,
    {
        let mut state = self.state.lock().unwrap();
        let (removed, remaining): (Vec<Job>, Vec<Job>) =
            state.heap.drain().partition(|job| predicate(job));
        state.heap = remaining.into_iter().collect();
        removed.into_iter().map(|job| job.id).collect()
    }

    /// All queued jobs in arbitrary order.
    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().unwrap().heap.iter().cloned().collect()
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(page_id: u64) -> JobType {
        JobType::RenderPage { page_id, zoom_permille: 1000, rotation: 0 }
    }

    #[test]
    fn test_job_priority_ordering() {
        assert!(JobPriority::Visible > JobPriority::Prefetch);
        assert!(JobPriority::Prefetch > JobPriority::Background);
    }

    #[test]
    fn test_priority_queue_ordering() {
        let queue = PriorityQueue::new();
        queue.push(JobPriority::Background, render(0));
        queue.push(JobPriority::Visible, render(1));
        queue.push(JobPriority::Prefetch, render(2));

        assert_eq!(queue.pop().unwrap().priority, JobPriority::Visible);
        assert_eq!(queue.pop().unwrap().priority, JobPriority::Prefetch);
        assert_eq!(queue.pop().unwrap().priority, JobPriority::Background);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_fifo_within_same_priority() {
        let queue = PriorityQueue::new();
        let id1 = queue.push(JobPriority::Visible, render(0));
        let id2 = queue.push(JobPriority::Visible, render(1));
        let id3 = queue.push(JobPriority::Visible, render(2));

        assert_eq!(queue.pop().unwrap().id, id1);
        assert_eq!(queue.pop().unwrap().id, id2);
        assert_eq!(queue.pop().unwrap().id, id3);
    }

    #[test]
    fn test_remove_if() {
        let queue = PriorityQueue::new();
        let a = queue.push(JobPriority::Visible, render(7));
        queue.push(JobPriority::Visible, render(8));
        let c = queue.push(JobPriority::Prefetch, render(7));

        let mut removed = queue.remove_if(|job| job.job_type.page_id() == 7);
        removed.sort_unstable();
        assert_eq!(removed, vec![a, c]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().job_type.page_id(), 8);
    }

    #[test]
    fn test_clear() {
        let queue = PriorityQueue::default();
        queue.push(JobPriority::Visible, render(0));
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.jobs().is_empty());
    }
}
