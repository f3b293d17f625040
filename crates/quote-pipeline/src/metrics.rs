use std::sync::atomic::{AtomicU64, Ordering};

/// Quote-pipeline outcome counters. Plain atomics rather than a metrics
/// crate dependency, keeping the observability footprint small outside of
/// `tracing`.
#[derive(Default)]
pub struct QuoteMetrics {
    pub streaming_success: AtomicU64,
    pub rest_fallback: AtomicU64,
    pub no_usable_quote: AtomicU64,
    pub zero_bid: AtomicU64,
    pub zero_ask: AtomicU64,
    pub both_zero: AtomicU64,
    pub stale_quote: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QuoteMetricsSnapshot {
    pub streaming_success: u64,
    pub rest_fallback: u64,
    pub no_usable_quote: u64,
    pub zero_bid: u64,
    pub zero_ask: u64,
    pub both_zero: u64,
    pub stale_quote: u64,
}

impl QuoteMetrics {
    pub fn snapshot(&self) -> QuoteMetricsSnapshot {
        QuoteMetricsSnapshot {
            streaming_success: self.streaming_success.load(Ordering::Relaxed),
            rest_fallback: self.rest_fallback.load(Ordering::Relaxed),
            no_usable_quote: self.no_usable_quote.load(Ordering::Relaxed),
            zero_bid: self.zero_bid.load(Ordering::Relaxed),
            zero_ask: self.zero_ask.load(Ordering::Relaxed),
            both_zero: self.both_zero.load(Ordering::Relaxed),
            stale_quote: self.stale_quote.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
