//! Bounded in-memory event buffer.
//!
//! Producers (file workers, the syslog listener, the internal reporter) push
//! serialized messages without ever blocking; when the buffer is full the
//! oldest entry is discarded to make room. A single delivery worker pops
//! entries in FIFO order, waiting asynchronously while the buffer is empty.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Default logical capacity of the buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Extra slots allocated beyond the logical capacity.
const BUFFER_HEADROOM: usize = 10;

/// Minimum time between two overflow warnings.
pub const OVERFLOW_WARNING_INTERVAL: Duration = Duration::from_secs(60);

/// Statistics about buffer operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Total number of payloads accepted
    pub enqueued: u64,

    /// Total number of payloads handed to the consumer
    pub dequeued: u64,

    /// Total number of payloads discarded due to overflow
    pub dropped: u64,
}

/// Result of [`EventBuffer::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Stored without displacing anything
    Stored,

    /// Stored after discarding the oldest entry. `report` is set at most once
    /// per [`OVERFLOW_WARNING_INTERVAL`].
    Overflowed { report: bool },
}

#[derive(Debug)]
struct BufferState {
    queue: VecDeque<Bytes>,
    last_overflow_report: Option<Instant>,
    stats: BufferStats,
}

/// FIFO of serialized messages with a drop-oldest overflow policy.
#[derive(Debug)]
pub struct EventBuffer {
    state: Mutex<BufferState>,
    available: Notify,
    capacity: usize,
}

impl EventBuffer {
    /// Create a buffer holding at most `capacity` payloads (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(BufferState {
                queue: VecDeque::with_capacity(capacity + BUFFER_HEADROOM),
                last_overflow_report: None,
                stats: BufferStats::default(),
            }),
            available: Notify::new(),
            capacity,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }

    /// Append a payload, discarding the oldest entry first if the buffer is full.
    pub fn enqueue(&self, payload: Bytes) -> EnqueueOutcome {
        let outcome = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

            let outcome = if state.queue.len() >= self.capacity {
                state.queue.pop_front();
                state.stats.dropped += 1;

                let now = Instant::now();
                let report = match state.last_overflow_report {
                    Some(last) if now.duration_since(last) < OVERFLOW_WARNING_INTERVAL => false,
                    _ => {
                        state.last_overflow_report = Some(now);
                        true
                    }
                };
                debug!(
                    capacity = self.capacity,
                    dropped_total = state.stats.dropped,
                    "Buffer full, discarded oldest event"
                );
                EnqueueOutcome::Overflowed { report }
            } else {
                EnqueueOutcome::Stored
            };

            state.queue.push_back(payload);
            state.stats.enqueued += 1;
            outcome
        };

        self.available.notify_one();
        outcome
    }

    /// Wait for and remove the oldest payload.
    pub async fn dequeue(&self) -> Bytes {
        loop {
            let notified = self.available.notified();
            if let Some(payload) = self.try_dequeue() {
                return payload;
            }
            notified.await;
        }
    }

    /// Remove the oldest payload if there is one.
    pub fn try_dequeue(&self) -> Option<Bytes> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let payload = state.queue.pop_front();
        if payload.is_some() {
            state.stats.dequeued += 1;
        }
        payload
    }

    /// Current number of buffered payloads.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .queue
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupancy as a fraction of the logical capacity.
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    pub fn stats(&self) -> BufferStats {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .stats
            .clone()
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::timeout;

    fn payload(n: usize) -> Bytes {
        Bytes::from(format!("event-{}", n))
    }

    #[test]
    fn test_buffer_defaults() {
        let buffer = EventBuffer::with_defaults();
        assert_eq!(buffer.capacity(), DEFAULT_BUFFER_CAPACITY);
        assert!(buffer.is_empty());
        assert_eq!(EventBuffer::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let buffer = EventBuffer::new(10);
        for i in 0..3 {
            assert_eq!(buffer.enqueue(payload(i)), EnqueueOutcome::Stored);
        }
        for i in 0..3 {
            assert_eq!(buffer.dequeue().await, payload(i));
        }
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let capacity = 5;
        let buffer = EventBuffer::new(capacity);
        for i in 0..=capacity {
            buffer.enqueue(payload(i));
        }

        assert_eq!(buffer.len(), capacity);
        let mut retained = Vec::new();
        while let Some(p) = buffer.try_dequeue() {
            retained.push(p);
        }
        assert!(!retained.contains(&payload(0)));
        assert_eq!(retained.first(), Some(&payload(1)));
        assert_eq!(retained.last(), Some(&payload(capacity)));

        let stats = buffer.stats();
        assert_eq!(stats.enqueued, capacity as u64 + 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.dequeued, capacity as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_report_rate_limited() {
        let buffer = EventBuffer::new(2);
        buffer.enqueue(payload(0));
        buffer.enqueue(payload(1));

        let reports = (2..100)
            .filter(|i| buffer.enqueue(payload(*i)) == EnqueueOutcome::Overflowed { report: true })
            .count();
        assert_eq!(reports, 1);
        assert_eq!(buffer.len(), 2);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(
            buffer.enqueue(payload(100)),
            EnqueueOutcome::Overflowed { report: false }
        );

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(
            buffer.enqueue(payload(101)),
            EnqueueOutcome::Overflowed { report: true }
        );
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let buffer = Arc::new(EventBuffer::new(4));

        let pending = timeout(Duration::from_millis(20), buffer.dequeue()).await;
        assert!(pending.is_err(), "dequeue should block on an empty buffer");

        let consumer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        buffer.enqueue(payload(7));

        let received = timeout(Duration::from_millis(200), consumer)
            .await
            .expect("consumer should wake")
            .unwrap();
        assert_eq!(received, payload(7));
    }

    #[test]
    fn test_fill_ratio() {
        let buffer = EventBuffer::new(10);
        for i in 0..8 {
            buffer.enqueue(payload(i));
        }
        assert!((buffer.fill_ratio() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_producers_never_exceed_capacity() {
        let buffer = Arc::new(EventBuffer::new(50));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        buffer.enqueue(payload(t * 1000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(buffer.len(), 50);
        assert_eq!(buffer.stats().dropped, 350);
    }
}
