use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use broker_trait::Broker;
use chrono::Utc;
use execution_types::{Quote, QuoteSource};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::cache::StreamingQuoteCache;
use crate::metrics::QuoteMetrics;

#[derive(Debug, Clone, Copy)]
pub struct QuotePipelineConfig {
    pub streaming_timeout_ms: u64,
    pub streaming_poll_interval_ms: u64,
    pub quote_freshness_seconds: i64,
}

impl Default for QuotePipelineConfig {
    fn default() -> Self {
        Self {
            streaming_timeout_ms: 5000,
            streaming_poll_interval_ms: 100,
            quote_freshness_seconds: 10,
        }
    }
}

fn min_usable_price() -> Decimal {
    Decimal::new(1, 2)
}

fn suspicious_spread_fraction() -> Decimal {
    Decimal::new(1, 1)
}

/// `get_best_quote` (C5): prefers a fresh streaming quote, falls back to a
/// one-shot broker REST quote, and normalizes both against the same
/// zero-price and suspicious-price checks.
pub struct QuotePipeline<B: Broker> {
    broker: Arc<B>,
    cache: Arc<StreamingQuoteCache>,
    config: QuotePipelineConfig,
    pub metrics: QuoteMetrics,
}

impl<B: Broker> QuotePipeline<B> {
    pub fn new(broker: Arc<B>, cache: Arc<StreamingQuoteCache>, config: QuotePipelineConfig) -> Self {
        Self { broker, cache, config, metrics: QuoteMetrics::default() }
    }

    pub async fn get_best_quote(&self, symbol: &str, correlation_id: Uuid) -> Result<Quote> {
        tracing::debug!(symbol, %correlation_id, "resolving best quote");

        if let Some(mut streaming) = self.poll_streaming_cache(symbol).await {
            let age_seconds = (Utc::now() - streaming.timestamp).num_seconds();
            if age_seconds <= self.config.quote_freshness_seconds {
                if Self::apply_zero_substitution(&mut streaming, &self.metrics) {
                    if !Self::is_suspicious(&streaming) {
                        QuoteMetrics::incr(&self.metrics.streaming_success);
                        return Ok(Self::finalize(streaming));
                    }

                    if let Some(rest) = self.fetch_rest(symbol).await? {
                        if !Self::is_suspicious(&rest) {
                            return Ok(Self::finalize(rest));
                        }
                    }
                }
            } else {
                QuoteMetrics::incr(&self.metrics.stale_quote);
            }
        }

        QuoteMetrics::incr(&self.metrics.rest_fallback);
        match self.fetch_rest(symbol).await? {
            Some(rest) => Ok(Self::finalize(rest)),
            None => {
                QuoteMetrics::incr(&self.metrics.no_usable_quote);
                Ok(Quote {
                    symbol: symbol.to_string(),
                    bid_price: Decimal::ZERO,
                    ask_price: Decimal::ZERO,
                    bid_size: Decimal::ZERO,
                    ask_size: Decimal::ZERO,
                    timestamp: Utc::now(),
                    source: QuoteSource::Unavailable,
                    had_zero_bid: false,
                    had_zero_ask: false,
                    is_stale: false,
                })
            }
        }
    }

    async fn poll_streaming_cache(&self, symbol: &str) -> Option<Quote> {
        let deadline = tokio::time::Instant::now() + StdDuration::from_millis(self.config.streaming_timeout_ms);
        loop {
            if let Some(quote) = self.cache.get(symbol) {
                return Some(quote);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(StdDuration::from_millis(self.config.streaming_poll_interval_ms)).await;
        }
    }

    async fn fetch_rest(&self, symbol: &str) -> Result<Option<Quote>> {
        let Some(raw) = self.broker.get_latest_quote(symbol).await? else {
            return Ok(None);
        };
        let mut quote = Quote {
            symbol: symbol.to_string(),
            bid_price: raw.bid_price,
            ask_price: raw.ask_price,
            bid_size: raw.bid_size,
            ask_size: raw.ask_size,
            timestamp: Utc::now(),
            source: QuoteSource::Rest,
            had_zero_bid: false,
            had_zero_ask: false,
            is_stale: false,
        };
        if !Self::apply_zero_substitution(&mut quote, &self.metrics) {
            return Ok(None);
        }
        Ok(Some(quote))
    }

    /// Returns `false` when both sides are non-positive (unusable).
    fn apply_zero_substitution(quote: &mut Quote, metrics: &QuoteMetrics) -> bool {
        let bid_bad = quote.bid_price <= Decimal::ZERO;
        let ask_bad = quote.ask_price <= Decimal::ZERO;
        if bid_bad && ask_bad {
            QuoteMetrics::incr(&metrics.both_zero);
            return false;
        }
        if bid_bad {
            quote.bid_price = quote.ask_price;
            quote.had_zero_bid = true;
            QuoteMetrics::incr(&metrics.zero_bid);
        } else if ask_bad {
            quote.ask_price = quote.bid_price;
            quote.had_zero_ask = true;
            QuoteMetrics::incr(&metrics.zero_ask);
        }
        true
    }

    fn is_suspicious(quote: &Quote) -> bool {
        if quote.bid_price < Decimal::ZERO || quote.ask_price < Decimal::ZERO {
            return true;
        }
        if quote.ask_price < quote.bid_price {
            return true;
        }
        if quote.bid_price < min_usable_price() || quote.ask_price < min_usable_price() {
            return true;
        }
        matches!(quote.spread_fraction_of_mid(), Some(frac) if frac > suspicious_spread_fraction())
    }

    fn finalize(mut quote: Quote) -> Quote {
        if quote.bid_price < min_usable_price() || quote.ask_price < min_usable_price() {
            quote.source = QuoteSource::Unavailable;
        }
        quote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use broker_trait::*;
    use rust_decimal_macros::dec;
    use tokio::sync::Mutex;

    struct StubBroker {
        quote: Mutex<Option<BrokerQuote>>,
    }

    #[async_trait]
    impl Broker for StubBroker {
        async fn get_account(&self) -> Result<BrokerAccount> {
            unimplemented!()
        }
        async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
            unimplemented!()
        }
        async fn get_position(&self, _symbol: &str) -> Result<Option<BrokerPosition>> {
            unimplemented!()
        }
        async fn get_current_price(&self, _symbol: &str) -> Result<Option<Decimal>> {
            unimplemented!()
        }
        async fn get_latest_quote(&self, _symbol: &str) -> Result<Option<BrokerQuote>> {
            Ok(self.quote.lock().await.clone())
        }
        async fn place_market_order(&self, _order: BrokerOrderRequest) -> Result<BrokerOrder> {
            unimplemented!()
        }
        async fn place_limit_order(&self, _order: BrokerLimitOrderRequest) -> Result<BrokerOrder> {
            unimplemented!()
        }
        async fn get_order(&self, _order_id: &str) -> Result<BrokerOrder> {
            unimplemented!()
        }
        async fn get_order_execution_result(&self, _order_id: &str) -> Result<OrderExecutionResult> {
            unimplemented!()
        }
        async fn get_orders(&self, _limit: Option<usize>) -> Result<Vec<BrokerOrder>> {
            unimplemented!()
        }
        async fn cancel_order(&self, _order_id: &str) -> Result<()> {
            unimplemented!()
        }
        async fn wait_for_order_completion(&self, _order_ids: &[String], _max_wait_seconds: u64) -> Result<WaitForCompletionResult> {
            unimplemented!()
        }
        async fn close_position(&self, _symbol: &str) -> Result<BrokerOrder> {
            unimplemented!()
        }
        async fn is_market_open(&self) -> Result<bool> {
            Ok(true)
        }
        fn is_paper(&self) -> bool {
            true
        }
        fn broker_name(&self) -> &str {
            "stub"
        }
    }

    fn broker_quote(symbol: &str, bid: Decimal, ask: Decimal) -> BrokerQuote {
        BrokerQuote {
            symbol: symbol.to_string(),
            bid_price: bid,
            ask_price: ask,
            bid_size: dec!(500),
            ask_size: dec!(500),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn falls_back_to_rest_when_cache_empty() {
        let broker = Arc::new(StubBroker { quote: Mutex::new(Some(broker_quote("AAPL", dec!(100.00), dec!(100.10)))) });
        let cache = Arc::new(StreamingQuoteCache::new());
        let config = QuotePipelineConfig { streaming_timeout_ms: 50, streaming_poll_interval_ms: 10, ..Default::default() };
        let pipeline = QuotePipeline::new(broker, cache, config);

        let quote = pipeline.get_best_quote("AAPL", Uuid::new_v4()).await.unwrap();
        assert_eq!(quote.source, QuoteSource::Rest);
        assert_eq!(quote.bid_price, dec!(100.00));
    }

    #[tokio::test]
    async fn zero_bid_is_substituted_from_ask() {
        let broker = Arc::new(StubBroker { quote: Mutex::new(Some(broker_quote("AAPL", dec!(0), dec!(50.00)))) });
        let cache = Arc::new(StreamingQuoteCache::new());
        let config = QuotePipelineConfig { streaming_timeout_ms: 10, streaming_poll_interval_ms: 5, ..Default::default() };
        let pipeline = QuotePipeline::new(broker, cache, config);

        let quote = pipeline.get_best_quote("AAPL", Uuid::new_v4()).await.unwrap();
        assert!(quote.had_zero_bid);
        assert_eq!(quote.bid_price, dec!(50.00));
    }

    #[tokio::test]
    async fn both_sides_zero_is_unavailable() {
        let broker = Arc::new(StubBroker { quote: Mutex::new(Some(broker_quote("AAPL", dec!(0), dec!(0)))) });
        let cache = Arc::new(StreamingQuoteCache::new());
        let config = QuotePipelineConfig { streaming_timeout_ms: 10, streaming_poll_interval_ms: 5, ..Default::default() };
        let pipeline = QuotePipeline::new(broker, cache, config);

        let quote = pipeline.get_best_quote("AAPL", Uuid::new_v4()).await.unwrap();
        assert_eq!(quote.source, QuoteSource::Unavailable);
    }

    #[tokio::test]
    async fn cached_streaming_quote_is_preferred_when_fresh() {
        let broker = Arc::new(StubBroker { quote: Mutex::new(None) });
        let cache = Arc::new(StreamingQuoteCache::new());
        cache.upsert(Quote {
            symbol: "AAPL".to_string(),
            bid_price: dec!(100.00),
            ask_price: dec!(100.05),
            bid_size: dec!(500),
            ask_size: dec!(500),
            timestamp: Utc::now(),
            source: QuoteSource::Streaming,
            had_zero_bid: false,
            had_zero_ask: false,
            is_stale: false,
        });
        let config = QuotePipelineConfig { streaming_timeout_ms: 200, streaming_poll_interval_ms: 10, ..Default::default() };
        let pipeline = QuotePipeline::new(broker, cache, config);

        let quote = pipeline.get_best_quote("AAPL", Uuid::new_v4()).await.unwrap();
        assert_eq!(quote.source, QuoteSource::Streaming);
    }
}
