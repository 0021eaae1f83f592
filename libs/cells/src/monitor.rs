//! Message Processing Monitor
//!
//! Optional per payload kind counters. When enabled, the endpoint used for
//! replies is wrapped so that every outgoing message is attributed to the
//! kind of the envelope being processed: request count, failures and the
//! time from local receipt until the reply was sent.

use cell_network::{CellEndpoint, SendError};
use cell_types::{CellFailure, CellMessage, Payload};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Default)]
struct KindCounters {
    requests: AtomicU64,
    failures: AtomicU64,
    replies: AtomicU64,
    total_time_ns: AtomicU64,
    max_time_ns: AtomicU64,
}

impl KindCounters {
    fn record_reply(&self, elapsed: Duration, failed: bool) {
        let nanos = elapsed.as_nanos() as u64;
        self.replies.fetch_add(1, Ordering::Relaxed);
        self.total_time_ns.fetch_add(nanos, Ordering::Relaxed);
        self.max_time_ns.fetch_max(nanos, Ordering::Relaxed);
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Snapshot of the counters of one payload kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindStats {
    pub kind: &'static str,
    pub requests: u64,
    pub failures: u64,
    pub replies: u64,
    pub total_time: Duration,
    pub max_time: Duration,
}

impl KindStats {
    /// Average time until reply
    pub fn average_time(&self) -> Duration {
        if self.replies == 0 {
            return Duration::ZERO;
        }
        let average = self.total_time.as_nanos() / u128::from(self.replies);
        Duration::from_nanos(u64::try_from(average).unwrap_or(u64::MAX))
    }
}

/// Per kind request and failure counters with execution time gauges
#[derive(Debug, Default)]
pub struct MessageProcessingMonitor {
    enabled: AtomicBool,
    counters: RwLock<HashMap<&'static str, Arc<KindCounters>>>,
}

impl MessageProcessingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::Relaxed);
        if previous != enabled {
            info!(enabled, "Message processing monitoring changed");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn counters_for(&self, kind: &'static str) -> Arc<KindCounters> {
        if let Some(counters) = self.counters.read().get(kind) {
            return Arc::clone(counters);
        }
        Arc::clone(self.counters.write().entry(kind).or_default())
    }

    /// Endpoint to send the reply to `envelope` through.
    ///
    /// Returns `endpoint` itself while monitoring is disabled.
    pub fn reply_endpoint(&self, envelope: &CellMessage, endpoint: &Arc<dyn CellEndpoint>) -> Arc<dyn CellEndpoint> {
        if !self.is_enabled() {
            return Arc::clone(endpoint);
        }

        let counters = self.counters_for(envelope.payload().kind().name());
        counters.requests.fetch_add(1, Ordering::Relaxed);
        Arc::new(MonitoringEndpoint {
            inner: Arc::clone(endpoint),
            counters,
            received_at: envelope.header().received_at().unwrap_or_else(Instant::now),
        })
    }

    /// Counters of every kind seen so far, sorted by kind
    pub fn snapshot(&self) -> Vec<KindStats> {
        let counters = self.counters.read();
        let mut stats: Vec<KindStats> = counters
            .iter()
            .map(|(kind, c)| KindStats {
                kind: *kind,
                requests: c.requests.load(Ordering::Relaxed),
                failures: c.failures.load(Ordering::Relaxed),
                replies: c.replies.load(Ordering::Relaxed),
                total_time: Duration::from_nanos(c.total_time_ns.load(Ordering::Relaxed)),
                max_time: Duration::from_nanos(c.max_time_ns.load(Ordering::Relaxed)),
            })
            .collect();
        stats.sort_by_key(|s| s.kind);
        stats
    }

    pub fn stats_for(&self, kind: &str) -> Option<KindStats> {
        self.snapshot().into_iter().find(|s| s.kind == kind)
    }

    pub fn reset(&self) {
        self.counters.write().clear();
    }
}

fn is_failure(payload: &dyn Payload) -> bool {
    match payload.as_vehicle() {
        Some(vehicle) => vehicle.is_reply() && !vehicle.is_successful(),
        None => payload.is::<CellFailure>(),
    }
}

/// Reply endpoint that records outcome and latency before delegating
struct MonitoringEndpoint {
    inner: Arc<dyn CellEndpoint>,
    counters: Arc<KindCounters>,
    received_at: Instant,
}

impl CellEndpoint for MonitoringEndpoint {
    fn send_message(&self, message: CellMessage) -> Result<(), SendError> {
        let failed = is_failure(message.payload());
        let result = self.inner.send_message(message);
        self.counters
            .record_reply(self.received_at.elapsed(), failed || result.is_err());
        result
    }
}
