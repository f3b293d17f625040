use dashmap::DashMap;
use execution_types::Quote;

/// Read-only (from the pipeline's perspective) in-memory quote cache.
/// A separate ingestion task owns the only writer handle.
#[derive(Default)]
pub struct StreamingQuoteCache {
    inner: DashMap<String, Quote>,
}

impl StreamingQuoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<Quote> {
        self.inner.get(symbol).map(|entry| entry.value().clone())
    }

    pub fn upsert(&self, quote: Quote) {
        self.inner.insert(quote.symbol.clone(), quote);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
