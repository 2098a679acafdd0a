//! The process-wide response queue.
//!
//! Many producers (worker tasks), one consumer (the outbound dispatcher in
//! `dawn-web`). The queue is bounded; overflow drops the *oldest* entry to
//! favor liveness over completeness. Dropping an envelope releases its owned
//! payload immediately. Every enqueue pokes the dispatcher via a `Notify`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::domain::envelope::Envelope;
use crate::services::sessions::Session;

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 128;

/// An envelope paired with its target session.
pub struct QueuedEnvelope {
    pub session: Arc<Session>,
    pub envelope: Envelope,
}

/// Bounded MPSC queue of tagged response envelopes.
pub struct ResponseQueue {
    inner: Mutex<VecDeque<QueuedEnvelope>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    overflow_logged: AtomicBool,
}

impl ResponseQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            overflow_logged: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Enqueue an envelope for `session` and poke the dispatcher.
    ///
    /// O(1); on overflow the oldest queued entry is dropped (and freed).
    pub fn push(&self, session: &Arc<Session>, envelope: Envelope) {
        {
            let mut queue = self.inner.lock().unwrap();
            if queue.len() >= self.capacity {
                queue.pop_front();
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if !self.overflow_logged.swap(true, Ordering::Relaxed) {
                    warn!(capacity = self.capacity, "response queue full, dropping oldest");
                } else {
                    debug!(total_dropped = total, "response queue dropped oldest");
                }
            }
            queue.push_back(QueuedEnvelope {
                session: Arc::clone(session),
                envelope,
            });
        }
        self.notify.notify_one();
    }

    /// Dequeue the oldest envelope, if any. Dispatcher-only.
    #[must_use]
    pub fn pop(&self) -> Option<QueuedEnvelope> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Wait until at least one envelope is queued, then dequeue it.
    pub async fn recv(&self) -> QueuedEnvelope {
        loop {
            if let Some(entry) = self.pop() {
                return entry;
            }
            self.notify.notified().await;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Envelopes dropped to overflow since startup.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::LlmConfig;
    use crate::domain::session::SessionKind;
    use crate::services::sessions::SessionManager;

    fn session() -> Arc<Session> {
        SessionManager::new(8, LlmConfig::default())
            .create(SessionKind::Websocket, LlmConfig::default())
            .unwrap()
    }

    fn delta(i: u64) -> Envelope {
        Envelope::StreamDelta {
            stream_id: 1,
            text: format!("d{i}"),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = ResponseQueue::new(8);
        let s = session();
        for i in 0..3 {
            queue.push(&s, delta(i));
        }
        for i in 0..3 {
            let entry = queue.pop().unwrap();
            assert_eq!(entry.envelope, delta(i));
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_overflow_drops_oldest_in_order() {
        let capacity = 4usize;
        let queue = ResponseQueue::new(capacity);
        let s = session();
        let n = 10u64;
        for i in 0..n {
            queue.push(&s, delta(i));
        }
        assert_eq!(queue.len(), capacity);
        assert_eq!(queue.dropped(), n - capacity as u64);
        // survivors are exactly the last `capacity` enqueued, in order
        for i in (n - capacity as u64)..n {
            assert_eq!(queue.pop().unwrap().envelope, delta(i));
        }
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let queue = Arc::new(ResponseQueue::new(8));
        let s = session();
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await.envelope })
        };
        // give the waiter a chance to park
        tokio::task::yield_now().await;
        queue.push(&s, delta(7));
        assert_eq!(waiter.await.unwrap(), delta(7));
    }
}
