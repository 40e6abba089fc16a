//! Thread-safe FIFO work queue for passing commands between threads

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crossbeam::utils::CachePadded;

/// Unbounded multi-producer FIFO queue with blocking and non-blocking consumers.
///
/// The queue length doubles as the availability counter: a blocking consumer
/// sleeps on the condition variable until the queue is non-empty or the queue
/// has been closed.
pub struct WorkQueue<T> {
    queue: Mutex<VecDeque<T>>,
    available: Condvar,
    closed: AtomicBool,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    produced: AtomicUsize,
    consumed: AtomicUsize,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            closed: AtomicBool::new(false),
            stats: CachePadded::new(Stats::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer: append an element to the tail and wake one waiting consumer.
    pub fn produce(&self, elem: T) {
        let mut queue = self.lock();
        queue.push_back(elem);
        self.stats.produced.fetch_add(1, Ordering::Relaxed);
        drop(queue);
        self.available.notify_one();
    }

    /// Consumer: pop the head of the queue.
    ///
    /// With `blocking` set the caller is suspended until an element is
    /// available; `None` is then only returned once the queue has been closed
    /// and drained. Without `blocking` an empty queue returns `None` at once.
    pub fn consume(&self, blocking: bool) -> Option<T> {
        let mut queue = self.lock();
        loop {
            if let Some(elem) = queue.pop_front() {
                self.stats.consumed.fetch_add(1, Ordering::Relaxed);
                return Some(elem);
            }

            if !blocking || self.closed.load(Ordering::Acquire) {
                return None;
            }

            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Consumer: move every queued element to the end of `dest`, in FIFO order.
    ///
    /// Meant for a single consumer. Atomic with respect to `produce`, but a
    /// concurrent `consume` from another thread may observe an empty queue.
    pub fn consume_all(&self, dest: &mut VecDeque<T>) {
        let mut queue = self.lock();
        let drained = queue.len();
        dest.extend(queue.drain(..));
        self.stats.consumed.fetch_add(drained, Ordering::Relaxed);
    }

    /// Instantaneous element count. Diagnostics only: it may already be stale
    /// when the caller looks at it.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tears down the availability counter: blocked consumers wake up and
    /// receive `None` once the remaining elements are gone.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.lock();
        self.available.notify_all();
    }

    /// (produced, consumed)
    pub fn stats(&self) -> (usize, usize) {
        (
            self.stats.produced.load(Ordering::Relaxed),
            self.stats.consumed.load(Ordering::Relaxed),
        )
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_produce_then_blocking_consume() {
        let queue = WorkQueue::new();
        queue.produce(7);
        assert_eq!(queue.consume(true), Some(7));
    }

    #[test]
    fn test_non_blocking_consume_on_empty_queue() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        assert_eq!(queue.consume(false), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_blocking_consume_waits_for_producer() {
        let queue = Arc::new(WorkQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.consume(true))
        };

        thread::sleep(Duration::from_millis(20));
        queue.produce("frame");
        assert_eq!(consumer.join().unwrap(), Some("frame"));
    }

    #[test]
    fn test_fifo_order_preserved() {
        let queue = WorkQueue::new();
        for i in 0..5 {
            queue.produce(i);
        }
        let received: Vec<_> = std::iter::from_fn(|| queue.consume(false)).collect();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_consume_all_appends_and_empties() {
        let queue = WorkQueue::new();
        queue.produce('b');
        queue.produce('c');

        let mut dest = VecDeque::from(vec!['a']);
        queue.consume_all(&mut dest);

        assert_eq!(dest, VecDeque::from(vec!['a', 'b', 'c']));
        assert_eq!(queue.len(), 0);
        // Counter was reset along with the elements
        assert_eq!(queue.consume(false), None);
        assert_eq!(queue.stats(), (2, 2));
    }

    #[test]
    fn test_close_releases_blocked_consumer() {
        let queue: Arc<WorkQueue<u8>> = Arc::new(WorkQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.consume(true))
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_close_still_drains_remaining_elements() {
        let queue = WorkQueue::new();
        queue.produce(1);
        queue.close();
        assert_eq!(queue.consume(true), Some(1));
        assert_eq!(queue.consume(true), None);
    }
}
