// Producer side of the ingestion pipeline - bounded frame handoff
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

/// Default number of raw frames the inbox retains under back-pressure.
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

/// Ingest health counters surfaced to presentation.
#[derive(Debug, Default)]
pub struct IngestCounters {
    pub dropped_frames: AtomicU64,
    pub malformed_frames: AtomicU64,
}

impl IngestCounters {
    pub fn dropped(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed_frames.load(Ordering::Relaxed)
    }
}

/// Bounded FIFO handoff between the transport delivery task and the
/// consumer tick.
///
/// `push` never blocks and never allocates past the configured capacity:
/// when full, the oldest frame is dropped and counted, so a stalled
/// consumer costs old history rather than unbounded memory.
pub struct FrameInbox {
    frames: Mutex<VecDeque<Bytes>>,
    capacity: usize,
    counters: Arc<IngestCounters>,
}

impl FrameInbox {
    pub fn new(capacity: usize, counters: Arc<IngestCounters>) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            counters,
        }
    }

    /// Enqueue one raw payload. Called from the transport's delivery task;
    /// must stay enqueue-only.
    pub fn push(&self, payload: Bytes) {
        let mut frames = self.lock();
        if frames.len() == self.capacity {
            frames.pop_front();
            self.counters.dropped_frames.fetch_add(1, Ordering::Relaxed);
        }
        frames.push_back(payload);
    }

    /// Remove and return everything queued, in arrival order.
    pub fn drain(&self) -> Vec<Bytes> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Bytes>> {
        // A poisoned lock means a holder panicked mid-operation; the deque
        // itself is still structurally valid.
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbox(capacity: usize) -> FrameInbox {
        FrameInbox::new(capacity, Arc::new(IngestCounters::default()))
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let inbox = inbox(16);
        for n in 0..10 {
            inbox.push(Bytes::from(format!("P{n}")));
        }
        let drained = inbox.drain();
        assert_eq!(drained.len(), 10);
        for (n, frame) in drained.iter().enumerate() {
            assert_eq!(frame, &Bytes::from(format!("P{n}")));
        }
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest_and_counts() {
        let counters = Arc::new(IngestCounters::default());
        let inbox = FrameInbox::new(3, Arc::clone(&counters));
        for n in 0..5 {
            inbox.push(Bytes::from(format!("P{n}")));
        }
        assert_eq!(inbox.len(), 3);
        assert_eq!(counters.dropped(), 2);
        let drained = inbox.drain();
        assert_eq!(drained[0], Bytes::from("P2"));
        assert_eq!(drained[2], Bytes::from("P4"));
    }

    #[test]
    fn test_producer_burst_from_another_thread() {
        let inbox = Arc::new(inbox(256));
        let producer = {
            let inbox = Arc::clone(&inbox);
            std::thread::spawn(move || {
                for n in 0..100 {
                    inbox.push(Bytes::from(format!("frame-{n}")));
                }
            })
        };
        producer.join().unwrap();

        let drained = inbox.drain();
        assert_eq!(drained.len(), 100);
        for (n, frame) in drained.iter().enumerate() {
            assert_eq!(frame, &Bytes::from(format!("frame-{n}")));
        }
    }
}
