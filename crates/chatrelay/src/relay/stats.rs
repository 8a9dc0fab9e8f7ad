use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::EndReason;

/// Process-wide counters for relay sessions
#[derive(Debug, Default)]
pub struct RelayStats {
    started: AtomicU64,
    completed: AtomicU64,
    errored: AtomicU64,
    disconnected: AtomicU64,
    timed_out: AtomicU64,
    producer_closed: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`] for the stats endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStatsSnapshot {
    pub started: u64,
    pub active: u64,
    pub completed: u64,
    pub errored: u64,
    pub disconnected: u64,
    pub timed_out: u64,
    pub producer_closed: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_start(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_end(&self, reason: EndReason) {
        let counter = match reason {
            EndReason::Completed => &self.completed,
            EndReason::Errored => &self.errored,
            EndReason::Disconnected => &self.disconnected,
            EndReason::TimedOut => &self.timed_out,
            EndReason::ProducerClosed => &self.producer_closed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let errored = self.errored.load(Ordering::Relaxed);
        let disconnected = self.disconnected.load(Ordering::Relaxed);
        let timed_out = self.timed_out.load(Ordering::Relaxed);
        let producer_closed = self.producer_closed.load(Ordering::Relaxed);
        let started = self.started.load(Ordering::Relaxed);
        let ended = completed + errored + disconnected + timed_out + producer_closed;

        RelayStatsSnapshot {
            started,
            active: started.saturating_sub(ended),
            completed,
            errored,
            disconnected,
            timed_out,
            producer_closed,
        }
    }
}
