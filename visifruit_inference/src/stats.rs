//! Inference client counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::breaker::BreakerSnapshot;

/// Lock-free counters updated on every call.
#[derive(Debug, Default)]
pub struct ClientStats {
    requests: AtomicU64,
    remote_success: AtomicU64,
    remote_failures: AtomicU64,
    remote_rejected: AtomicU64,
    cache_hits: AtomicU64,
    local_fallbacks: AtomicU64,
    local_failures: AtomicU64,
    failed: AtomicU64,
    latency_total_us: AtomicU64,
    latency_samples: AtomicU64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            #[inline]
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl ClientStats {
    counter! {
        record_request => requests,
        record_remote_success => remote_success,
        record_remote_failure => remote_failures,
        record_remote_rejected => remote_rejected,
        record_cache_hit => cache_hits,
        record_local_fallback => local_fallbacks,
        record_local_failure => local_failures,
        record_failed => failed,
    }

    /// Add one end-to-end latency sample.
    pub fn record_latency_us(&self, us: u64) {
        self.latency_total_us.fetch_add(us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Mean latency over all samples [ms].
    pub fn avg_latency_ms(&self) -> f64 {
        let n = self.latency_samples.load(Ordering::Relaxed);
        if n == 0 {
            return 0.0;
        }
        self.latency_total_us.load(Ordering::Relaxed) as f64 / n as f64 / 1_000.0
    }

    pub fn snapshot(&self, breaker: BreakerSnapshot) -> ClientStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ClientStatsSnapshot {
            requests: load(&self.requests),
            remote_success: load(&self.remote_success),
            remote_failures: load(&self.remote_failures),
            remote_rejected: load(&self.remote_rejected),
            cache_hits: load(&self.cache_hits),
            local_fallbacks: load(&self.local_fallbacks),
            local_failures: load(&self.local_failures),
            failed: load(&self.failed),
            avg_latency_ms: self.avg_latency_ms(),
            breaker,
        }
    }
}

/// Serializable view of [`ClientStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStatsSnapshot {
    pub requests: u64,
    pub remote_success: u64,
    pub remote_failures: u64,
    /// Calls short-circuited by the open breaker.
    pub remote_rejected: u64,
    pub cache_hits: u64,
    pub local_fallbacks: u64,
    pub local_failures: u64,
    /// Calls that returned an error to the caller.
    pub failed: u64,
    pub avg_latency_ms: f64,
    pub breaker: BreakerSnapshot,
}
