//! Blocking FIFO feeding a job's worker thread.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct QueueState<M> {
    items: VecDeque<M>,
    closed: bool,
}

/// Thread-safe FIFO with blocking and non-blocking pops.
///
/// Each queue carries its own lock, independent of every other queue and of
/// the job registry. A popped message is moved out of the queue, so no other
/// consumer can observe it.
pub struct JobReadQueue<M> {
    state: Mutex<QueueState<M>>,
    push_event: Condvar,
}

impl<M> JobReadQueue<M> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            push_event: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<M>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append to the tail and wake one waiter.
    pub fn push(&self, message: M) {
        let mut state = self.lock();
        state.items.push_back(message);
        drop(state);
        self.push_event.notify_one();
    }

    /// Remove and return the head without blocking.
    pub fn try_pop(&self) -> Option<M> {
        self.lock().items.pop_front()
    }

    /// Block until a message is available and take it.
    ///
    /// Returns `None` once the queue has been closed.
    pub fn wait_pop(&self) -> Option<M> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(message) = state.items.pop_front() {
                return Some(message);
            }
            state = self
                .push_event
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait_pop`](Self::wait_pop), giving up after `timeout`.
    pub fn wait_pop_timeout(&self, timeout: Duration) -> Option<M> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(message) = state.items.pop_front() {
                return Some(message);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .push_event
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Mark the queue closed and wake every waiter.
    ///
    /// Waiters return `None` from then on. Messages still queued are left in
    /// place and dropped with the queue.
    pub fn close(&self) {
        self.lock().closed = true;
        self.push_event.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

impl<M: Clone> JobReadQueue<M> {
    /// Return the head without blocking.
    ///
    /// With `remove == false` the head is copied and the queue is left
    /// untouched.
    pub fn pop(&self, remove: bool) -> Option<M> {
        let mut state = self.lock();
        if remove {
            state.items.pop_front()
        } else {
            state.items.front().cloned()
        }
    }
}

impl<M> Default for JobReadQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> std::fmt::Debug for JobReadQueue<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("JobReadQueue")
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn fifo_order() {
        let queue = JobReadQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.pop(true), Some(1));
        assert_eq!(queue.wait_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.pop(true), None);
    }

    #[test]
    fn peek_leaves_queue_untouched() {
        let queue = JobReadQueue::new();
        queue.push("a".to_string());
        queue.push("b".to_string());

        assert_eq!(queue.pop(false), Some("a".to_string()));
        assert_eq!(queue.pop(false), Some("a".to_string()));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(true), Some("a".to_string()));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn pop_on_empty_does_not_block() {
        let queue: JobReadQueue<u32> = JobReadQueue::new();
        assert_eq!(queue.pop(true), None);
        assert_eq!(queue.pop(false), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn wait_pop_wakes_on_push() {
        let queue = Arc::new(JobReadQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_pop())
        };

        thread::sleep(Duration::from_millis(20));
        queue.push(99u32);
        assert_eq!(waiter.join().unwrap(), Some(99));
    }

    #[test]
    fn close_releases_waiters() {
        let queue: Arc<JobReadQueue<u32>> = Arc::new(JobReadQueue::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.wait_pop())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        queue.close();

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), None);
        }
        assert!(queue.is_closed());
    }

    #[test]
    fn wait_pop_timeout_expires() {
        let queue: JobReadQueue<u32> = JobReadQueue::new();
        let start = Instant::now();
        assert_eq!(queue.wait_pop_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));

        queue.push(5);
        assert_eq!(queue.wait_pop_timeout(Duration::from_millis(30)), Some(5));
    }

    #[test]
    fn every_push_reaches_exactly_one_waiter() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 250;
        const CONSUMERS: usize = 4;

        let queue = Arc::new(JobReadQueue::new());
        let total = (PRODUCERS * PER_PRODUCER) as usize;

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(value) = queue.wait_pop() {
                        seen.push(value);
                    }
                    seen
                })
            })
            .collect();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.push(p * PER_PRODUCER + i);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        // Let the consumers drain before closing.
        let deadline = Instant::now() + Duration::from_secs(5);
        while !queue.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        queue.close();

        let mut all = HashSet::new();
        let mut count = 0;
        for consumer in consumers {
            let seen = consumer.join().unwrap();
            // Values from one producer arrive in push order at each consumer.
            for p in 0..PRODUCERS {
                let from_p: Vec<u64> = seen
                    .iter()
                    .copied()
                    .filter(|v| v / PER_PRODUCER == p)
                    .collect();
                assert!(from_p.windows(2).all(|w| w[0] < w[1]));
            }
            count += seen.len();
            all.extend(seen);
        }

        assert_eq!(count, total);
        assert_eq!(all.len(), total);
    }
}
