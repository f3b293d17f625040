use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use broker_trait::{Broker, BrokerLimitOrderRequest, BrokerOrderSide, NormalizedOrderStatus, TimeInForce};
use execution_types::{Quote, Side};
use rust_decimal::Decimal;

use crate::result::{quantize_price, ExecutionAttempt, ExecutionResult};

#[derive(Debug, Clone, Copy)]
pub struct WalkTheBookConfig {
    pub step_ratios: [f64; 3],
    pub step_wait_seconds: u64,
    pub market_fallback_wait_seconds: u64,
    pub market_fallback_enabled: bool,
    pub min_price: Decimal,
    /// Below this fraction of requested quantity after all limit steps, fall
    /// back to a market order for the remainder.
    pub market_fallback_fill_threshold: Decimal,
    /// Contract tolerance: a fill ≥ this fraction of the requested quantity
    /// counts as success even short of 100%.
    pub success_fill_threshold: Decimal,
}

impl Default for WalkTheBookConfig {
    fn default() -> Self {
        Self {
            step_ratios: [0.50, 0.75, 0.95],
            step_wait_seconds: 10,
            market_fallback_wait_seconds: 30,
            market_fallback_enabled: true,
            min_price: Decimal::new(1, 2),
            market_fallback_fill_threshold: Decimal::new(5, 1),
            success_fill_threshold: Decimal::new(95, 2),
        }
    }
}

fn step_limit_price(side: Side, quote: &Quote, ratio: f64, min_price: Decimal) -> Decimal {
    let ratio = Decimal::try_from(ratio).unwrap_or_default();
    let spread = quote.ask_price - quote.bid_price;
    let price = match side {
        Side::Buy => quote.bid_price + spread * ratio,
        Side::Sell => quote.ask_price - spread * ratio,
    };
    quantize_price(price, min_price)
}

/// Progressive limit-then-market execution: a tiered-delay step-wait/cancel
/// loop that walks the price in from one fixed order to a multi-step walk
/// with a market fallback.
pub struct WalkTheBook<B: Broker> {
    broker: Arc<B>,
    config: WalkTheBookConfig,
}

impl<B: Broker> WalkTheBook<B> {
    pub fn new(broker: Arc<B>, config: WalkTheBookConfig) -> Self {
        Self { broker, config }
    }

    pub async fn execute(&self, symbol: &str, side: Side, qty: Decimal, quote: &Quote, parent_id: &str) -> Result<ExecutionResult> {
        let mut remaining = qty;
        let mut total_filled = Decimal::ZERO;
        let mut weighted_price_sum = Decimal::ZERO;
        let mut attempts = Vec::new();
        let mut final_order_id = None;

        for (k, ratio) in self.config.step_ratios.iter().enumerate() {
            if remaining <= Decimal::ZERO {
                break;
            }
            let limit_price = step_limit_price(side, quote, *ratio, self.config.min_price);
            let client_order_id = format!("{parent_id}-step-{k}");

            let request = BrokerLimitOrderRequest {
                symbol: symbol.to_string(),
                qty: remaining,
                side: to_broker_side(side),
                limit_price,
                time_in_force: TimeInForce::Day,
                client_order_id: Some(client_order_id.clone()),
            };

            let order = match self.broker.place_limit_order(request).await {
                Ok(order) => order,
                Err(e) => {
                    attempts.push(ExecutionAttempt {
                        label: format!("step-{k}"),
                        order_id: None,
                        limit_price: Some(limit_price),
                        filled_qty: Decimal::ZERO,
                        status: format!("submit_failed: {e}"),
                    });
                    if k == 0 {
                        return self.market_fallback(symbol, side, remaining, parent_id, attempts, total_filled, weighted_price_sum).await;
                    }
                    continue;
                }
            };

            let _ = self.broker.wait_for_order_completion(&[order.id.clone()], self.config.step_wait_seconds).await;
            let result = self.broker.get_order_execution_result(&order.id).await?;
            attempts.push(ExecutionAttempt {
                label: format!("step-{k}"),
                order_id: Some(order.id.clone()),
                limit_price: Some(limit_price),
                filled_qty: result.filled_qty,
                status: format!("{:?}", result.status),
            });

            if result.status == NormalizedOrderStatus::Rejected {
                self.cancel_pending_attempts(&attempts).await;
                return Ok(ExecutionResult {
                    success: false,
                    total_filled,
                    avg_fill_price: avg_price(total_filled, weighted_price_sum),
                    final_order_id,
                    attempts,
                    error_message: result.error_message.or_else(|| Some("order rejected".to_string())),
                });
            }

            if result.filled_qty > Decimal::ZERO {
                weighted_price_sum += result.filled_qty * result.avg_fill_price.unwrap_or(limit_price);
                total_filled += result.filled_qty;
                remaining -= result.filled_qty;
                final_order_id = Some(order.id.clone());
            }

            if result.status != NormalizedOrderStatus::Filled && remaining > Decimal::ZERO {
                let _ = self.cancel_with_backoff(&order.id).await;
            } else if result.status == NormalizedOrderStatus::Filled {
                return Ok(ExecutionResult {
                    success: true,
                    total_filled,
                    avg_fill_price: avg_price(total_filled, weighted_price_sum),
                    final_order_id,
                    attempts,
                    error_message: None,
                });
            }
        }

        let filled_fraction = if qty.is_zero() { Decimal::ONE } else { total_filled / qty };
        if remaining > Decimal::ZERO
            && self.config.market_fallback_enabled
            && filled_fraction < self.config.market_fallback_fill_threshold
        {
            return self.market_fallback(symbol, side, remaining, parent_id, attempts, total_filled, weighted_price_sum).await;
        }

        let success = qty.is_zero() || total_filled / qty >= self.config.success_fill_threshold;
        Ok(ExecutionResult {
            success,
            total_filled,
            avg_fill_price: avg_price(total_filled, weighted_price_sum),
            final_order_id,
            attempts,
            error_message: if success { None } else { Some("insufficient fill after all steps".to_string()) },
        })
    }

    async fn market_fallback(
        &self,
        symbol: &str,
        side: Side,
        remaining: Decimal,
        parent_id: &str,
        mut attempts: Vec<ExecutionAttempt>,
        mut total_filled: Decimal,
        mut weighted_price_sum: Decimal,
    ) -> Result<ExecutionResult> {
        let request = broker_trait::BrokerOrderRequest {
            symbol: symbol.to_string(),
            qty: remaining,
            side: to_broker_side(side),
            client_order_id: Some(format!("{parent_id}-market-fallback")),
            is_complete_exit: false,
        };
        let order = self.broker.place_market_order(request).await?;
        let wait = self
            .broker
            .wait_for_order_completion(&[order.id.clone()], self.config.market_fallback_wait_seconds)
            .await?;
        let result = self.broker.get_order_execution_result(&order.id).await?;

        attempts.push(ExecutionAttempt {
            label: "market-fallback".to_string(),
            order_id: Some(order.id.clone()),
            limit_price: None,
            filled_qty: result.filled_qty,
            status: format!("{:?}", result.status),
        });

        if result.filled_qty > Decimal::ZERO {
            weighted_price_sum += result.filled_qty * result.avg_fill_price.unwrap_or_default();
            total_filled += result.filled_qty;
        }

        let success = !wait.timed_out && result.status == NormalizedOrderStatus::Filled;
        Ok(ExecutionResult {
            success,
            total_filled,
            avg_fill_price: avg_price(total_filled, weighted_price_sum),
            final_order_id: Some(order.id),
            attempts,
            error_message: if success { None } else { result.error_message.or_else(|| Some("market fallback did not fill".to_string())) },
        })
    }

    async fn cancel_with_backoff(&self, order_id: &str) -> Result<()> {
        let _ = self.broker.cancel_order(order_id).await;
        let delays = [100u64, 200, 400, 800, 1600, 3200, 6400, 10000];
        for delay in delays {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if let Ok(order) = self.broker.get_order(order_id).await {
                if order.normalized_status().is_terminal() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn cancel_pending_attempts(&self, attempts: &[ExecutionAttempt]) {
        for attempt in attempts {
            if let Some(order_id) = &attempt.order_id {
                let _ = self.broker.cancel_order(order_id).await;
            }
        }
    }
}

fn avg_price(total_filled: Decimal, weighted_sum: Decimal) -> Option<Decimal> {
    if total_filled.is_zero() {
        None
    } else {
        Some(weighted_sum / total_filled)
    }
}

fn to_broker_side(side: Side) -> BrokerOrderSide {
    match side {
        Side::Buy => BrokerOrderSide::Buy,
        Side::Sell => BrokerOrderSide::Sell,
    }
}
