use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One order submission made while working a trade, kept for observability
/// even when the strategy ultimately succeeds via a later attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub label: String,
    pub order_id: Option<String>,
    pub limit_price: Option<Decimal>,
    pub filled_qty: Decimal,
    pub status: String,
}

/// Shared contract all three execution strategies return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub total_filled: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub final_order_id: Option<String>,
    pub attempts: Vec<ExecutionAttempt>,
    pub error_message: Option<String>,
}

impl ExecutionResult {
    pub fn fill_ratio(&self, requested: Decimal) -> Decimal {
        if requested.is_zero() {
            Decimal::ZERO
        } else {
            self.total_filled / requested
        }
    }
}

pub fn quantize_price(price: Decimal, min_price: Decimal) -> Decimal {
    price.max(min_price).round_dp(2)
}
