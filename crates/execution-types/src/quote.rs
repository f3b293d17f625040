use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteSource {
    Streaming,
    Rest,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    pub timestamp: DateTime<Utc>,
    pub source: QuoteSource,
    pub had_zero_bid: bool,
    pub had_zero_ask: bool,
    pub is_stale: bool,
}

impl Quote {
    pub fn mid(&self) -> Decimal {
        (self.bid_price + self.ask_price) / Decimal::from(2)
    }

    pub fn spread(&self) -> Decimal {
        self.ask_price - self.bid_price
    }

    pub fn spread_fraction_of_mid(&self) -> Option<Decimal> {
        let mid = self.mid();
        if mid.is_zero() {
            None
        } else {
            Some(self.spread() / mid)
        }
    }

    pub fn has_sufficient_liquidity(&self) -> bool {
        match self.spread_fraction_of_mid() {
            Some(frac) => frac <= Decimal::new(5, 3) && self.bid_size >= Decimal::from(100) && self.ask_size >= Decimal::from(100),
            None => false,
        }
    }
}
