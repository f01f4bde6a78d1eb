//! Bounded frame queue with drop-on-full backpressure

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};

use crate::capture::frame::RecordItem;

/// Poll period of control pushes waiting for room
const PUSH_RETRY: Duration = Duration::from_millis(10);

/// Fixed-capacity channel. Producers never block on the frame path;
/// the consumer blocks until data arrives.
pub struct BoundedQueue<T> {
    name: &'static str,
    tx: Sender<T>,
    rx: Receiver<T>,

    /// Statistics
    stats: Arc<CachePadded<Stats>>,
}

#[derive(Default)]
struct Stats {
    pushed: AtomicUsize,
    popped: AtomicUsize,
    dropped: AtomicUsize,
}

/// Snapshot of a queue's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: usize,
    pub popped: usize,
    pub dropped: usize,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> BoundedQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = flume::bounded(capacity);
        Self {
            name,
            tx,
            rx,
            stats: Arc::new(CachePadded::new(Stats::default())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Producer: enqueue unless full. A full queue drops `item` and returns false.
    pub fn try_push(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.stats.pushed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("queue_dropped_total", "queue" => self.name).increment(1);
                false
            }
            // Unreachable while `self` holds a receiver
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Enqueue a control message, waiting for room while `keep_waiting` holds.
    /// Returns false once the item is given up.
    pub fn push_while(&self, item: T, mut keep_waiting: impl FnMut() -> bool) -> bool {
        let mut item = item;
        loop {
            match self.tx.send_timeout(item, PUSH_RETRY) {
                Ok(()) => {
                    self.stats.pushed.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(SendTimeoutError::Timeout(back)) if keep_waiting() => item = back,
                Err(_) => return false,
            }
        }
    }

    /// Consumer: block until an item is available
    pub fn pop(&self) -> Option<T> {
        let item = self.rx.recv().ok()?;
        self.stats.popped.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => {
                self.stats.popped.fetch_add(1, Ordering::Relaxed);
                Some(item)
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Discard the backlog, returning how many items were dropped
    pub fn drain(&self) -> usize {
        let count = self.rx.drain().count();
        self.stats.popped.fetch_add(count, Ordering::Relaxed);
        count
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.stats.pushed.load(Ordering::Relaxed),
            popped: self.stats.popped.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}

impl BoundedQueue<RecordItem> {
    /// End the recording session. Waits for room while `keep_waiting` holds,
    /// so a recorder that already left its session cannot wedge the caller.
    pub fn push_sentinel(&self, keep_waiting: impl Fn() -> bool) -> bool {
        self.push_while(RecordItem::Sentinel, keep_waiting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn full_queue_drops_newest() {
        let queue = BoundedQueue::new("test", 5);
        let accepted: Vec<bool> = (0..8).map(|i| queue.try_push(i)).collect();
        assert_eq!(accepted, [true, true, true, true, true, false, false, false]);
        assert_eq!(queue.len(), 5);

        let kept: Vec<i32> = (0..5).filter_map(|_| queue.pop()).collect();
        assert_eq!(kept, [0, 1, 2, 3, 4]);
        assert_eq!(
            queue.stats(),
            QueueStats {
                pushed: 5,
                popped: 5,
                dropped: 3
            }
        );
    }

    #[test]
    fn pop_blocks_until_push() {
        let queue = BoundedQueue::new("test", 2);
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.try_push(42)
        });
        assert_eq!(queue.pop(), Some(42));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn sentinel_waits_for_room() {
        let queue: BoundedQueue<RecordItem> = BoundedQueue::new("record", 1);
        assert!(queue.push_sentinel(|| true));
        let producer = queue.clone();
        let handle = thread::spawn(move || producer.push_sentinel(|| true));
        thread::sleep(Duration::from_millis(20));
        assert!(matches!(queue.pop(), Some(RecordItem::Sentinel)));
        assert!(handle.join().unwrap());
        assert!(matches!(queue.pop(), Some(RecordItem::Sentinel)));
    }

    #[test]
    fn sentinel_gives_up_when_told() {
        let queue: BoundedQueue<RecordItem> = BoundedQueue::new("record", 1);
        assert!(queue.try_push(RecordItem::Sentinel));
        assert!(!queue.push_sentinel(|| false));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn control_push_gives_up_when_the_consumer_is_gone() {
        let queue = BoundedQueue::new("display", 2);
        queue.try_push(1);
        queue.try_push(2);
        let started = std::time::Instant::now();
        let mut polls = 0;
        let accepted = queue.push_while(3, || {
            polls += 1;
            polls < 3
        });
        assert!(!accepted);
        assert!(started.elapsed() >= PUSH_RETRY * 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drain_empties_backlog() {
        let queue = BoundedQueue::new("test", 4);
        for i in 0..3 {
            queue.try_push(i);
        }
        assert_eq!(queue.drain(), 3);
        assert!(queue.is_empty());
        assert_eq!(queue.pop_timeout(Duration::from_millis(5)), None);
    }
}
