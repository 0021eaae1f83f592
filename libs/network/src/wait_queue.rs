//! Outstanding request bookkeeping
//!
//! Requests sent with a timeout are recorded here until either their reply
//! arrives (matched through the reply's `last_uoid`) or a periodic sweep
//! finds them overdue and completes them with a timeout error.

use cell_types::{CacheError, CellMessage, Uoid};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

/// What a waiting requester eventually receives
pub type ReplyResult = std::result::Result<CellMessage, CacheError>;

/// One request awaiting its reply
#[derive(Debug)]
struct PendingRequest {
    sent_at: Instant,
    timeout: Duration,
    callback: oneshot::Sender<ReplyResult>,
}

impl PendingRequest {
    fn is_overdue(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.sent_at) >= self.timeout
    }
}

/// Wait queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitQueueStats {
    pub registered: u64,
    pub answered: u64,
    pub expired: u64,
}

/// Requests of one cell awaiting replies
#[derive(Debug, Default)]
pub struct WaitQueue {
    pending: Mutex<HashMap<Uoid, PendingRequest>>,
    registered: AtomicU64,
    answered: AtomicU64,
    expired: AtomicU64,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request and return the receiver its reply is delivered to
    pub fn register(&self, uoid: Uoid, timeout: Duration) -> oneshot::Receiver<ReplyResult> {
        let (callback, receiver) = oneshot::channel();
        self.pending.lock().insert(
            uoid,
            PendingRequest {
                sent_at: Instant::now(),
                timeout,
                callback,
            },
        );
        self.registered.fetch_add(1, Ordering::Relaxed);
        receiver
    }

    /// Forget a request, e.g. when it could not be sent at all
    pub fn cancel(&self, uoid: &Uoid) -> bool {
        self.pending.lock().remove(uoid).is_some()
    }

    /// Hand a reply to its waiting requester.
    ///
    /// Returns the envelope back if it does not answer a pending request.
    pub fn complete(&self, reply: CellMessage) -> Option<CellMessage> {
        let pending = match reply.header().last_uoid() {
            Some(last) if reply.header().is_reply() => self.pending.lock().remove(&last),
            _ => None,
        };

        match pending {
            Some(request) => {
                self.answered.fetch_add(1, Ordering::Relaxed);
                if request.callback.send(Ok(reply)).is_err() {
                    debug!("Reply arrived after the requester went away");
                }
                None
            }
            None => Some(reply),
        }
    }

    /// Complete every overdue request with a timeout error
    pub fn expire_overdue(&self, now: Instant) -> usize {
        let overdue: Vec<(Uoid, PendingRequest)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<Uoid> = pending
                .iter()
                .filter(|(_, request)| request.is_overdue(now))
                .map(|(uoid, _)| *uoid)
                .collect();
            ids.into_iter()
                .filter_map(|uoid| pending.remove(&uoid).map(|request| (uoid, request)))
                .collect()
        };

        let count = overdue.len();
        for (uoid, request) in overdue {
            debug!(uoid = %uoid, timeout_ms = request.timeout.as_millis() as u64, "Request expired");
            let error = CacheError::timeout(format!(
                "Request {} timed out after {} ms",
                uoid,
                request.timeout.as_millis()
            ));
            let _ = request.callback.send(Err(error));
        }

        self.expired.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn stats(&self) -> WaitQueueStats {
        WaitQueueStats {
            registered: self.registered.load(Ordering::Relaxed),
            answered: self.answered.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}
