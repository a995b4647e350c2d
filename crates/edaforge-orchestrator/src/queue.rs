//! Pending job queue.
//!
//! Jobs are ordered by priority (higher first) and then by submission order.

use crate::lifecycle::Priority;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::debug;

/// Heap entry for a queued job.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingJob {
    priority: Priority,
    sequence: u64,
    job_id: String,
}

impl PartialOrd for PendingJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority wins, then the older submission
        self.priority.cmp(&other.priority).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Priority queue of job ids waiting for a worker.
#[derive(Debug, Default)]
pub struct PendingQueue {
    heap: BinaryHeap<PendingJob>,
    next_sequence: u64,
}

impl PendingQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a job id.
    pub fn push(&mut self, job_id: String, priority: Priority) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        debug!(job_id = %job_id, ?priority, sequence, "Enqueueing job");
        self.heap.push(PendingJob { priority, sequence, job_id });
    }

    /// Dequeues the next job id.
    pub fn pop(&mut self) -> Option<String> {
        self.heap.pop().map(|pending| pending.job_id)
    }

    /// Removes a job id wherever it sits in the queue.
    ///
    /// # Returns
    /// Returns `true` if the job was queued.
    pub fn remove(&mut self, job_id: &str) -> bool {
        let before = self.heap.len();
        self.heap.retain(|pending| pending.job_id != job_id);
        before != self.heap.len()
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = PendingQueue::new();
        queue.push("batch-1".to_string(), Priority::Batch);
        queue.push("normal-1".to_string(), Priority::Normal);
        queue.push("normal-2".to_string(), Priority::Normal);
        queue.push("interactive".to_string(), Priority::Interactive);
        queue.push("normal-3".to_string(), Priority::Normal);

        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(order, vec!["interactive", "normal-1", "normal-2", "normal-3", "batch-1"]);
    }

    #[test]
    fn test_remove() {
        let mut queue = PendingQueue::new();
        queue.push("a".to_string(), Priority::Normal);
        queue.push("b".to_string(), Priority::Normal);

        assert!(queue.remove("a"));
        assert!(!queue.remove("a"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().as_deref(), Some("b"));
        assert!(queue.is_empty());
    }
}
