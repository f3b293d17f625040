use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use broker_trait::{Broker, BrokerLimitOrderRequest, BrokerOrderSide, NormalizedOrderStatus, TimeInForce};
use execution_types::{Quote, Side};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::result::{quantize_price, ExecutionAttempt, ExecutionResult};

#[derive(Debug, Clone, Copy)]
pub struct AlmgrenChrissConfig {
    pub num_slices: usize,
    pub risk_aversion: f64,
    pub volatility: f64,
    pub temporary_impact: f64,
    pub horizon_seconds: f64,
    pub slice_wait_seconds: u64,
    pub market_fallback_wait_seconds: u64,
    pub market_fallback_enabled: bool,
    pub min_price: Decimal,
    pub success_fill_threshold: Decimal,
}

impl Default for AlmgrenChrissConfig {
    fn default() -> Self {
        Self {
            num_slices: 6,
            risk_aversion: 1e-6,
            volatility: 0.02,
            temporary_impact: 0.1,
            horizon_seconds: 1800.0,
            slice_wait_seconds: 15,
            market_fallback_wait_seconds: 30,
            market_fallback_enabled: true,
            min_price: Decimal::new(1, 2),
            success_fill_threshold: Decimal::new(95, 2),
        }
    }
}

/// Kappa of the classical trajectory, `sqrt(lambda * sigma^2 / eta)`.
fn kappa(config: &AlmgrenChrissConfig) -> f64 {
    (config.risk_aversion * config.volatility.powi(2) / config.temporary_impact).sqrt()
}

/// Remaining quantity to trade at slice `k` (0-indexed, k in 0..=N), per the
/// `x_k = Q sinh(kappa (N-k) dt) / sinh(kappa N dt)` trajectory. `x_0 = Q`,
/// `x_N = 0`.
fn trajectory_remaining(total_qty: f64, k: usize, n: usize, kappa: f64, dt: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let denom = (kappa * n as f64 * dt).sinh();
    if denom.abs() < f64::EPSILON {
        // kappa ~ 0 degenerates to a linear schedule.
        return total_qty * (1.0 - k as f64 / n as f64);
    }
    total_qty * (kappa * (n - k) as f64 * dt).sinh() / denom
}

fn slice_aggressiveness(k: usize, n: usize) -> f64 {
    if n <= 1 {
        0.60
    } else {
        0.60 + 0.30 * (k as f64 / (n - 1) as f64)
    }
}

fn slice_limit_price(side: Side, quote: &Quote, aggressiveness: f64, min_price: Decimal) -> Decimal {
    let ratio = Decimal::try_from(aggressiveness).unwrap_or_default();
    let spread = quote.ask_price - quote.bid_price;
    let price = match side {
        Side::Buy => quote.bid_price + spread * ratio,
        Side::Sell => quote.ask_price - spread * ratio,
    };
    quantize_price(price, min_price)
}

/// Optimal-execution trajectory slicing for larger orders: the same
/// step/wait/cancel shape as `WalkTheBook`, but driven by a sinh-trajectory
/// schedule instead of fixed spread ratios.
pub struct AlmgrenChriss<B: Broker> {
    broker: Arc<B>,
    config: AlmgrenChrissConfig,
}

impl<B: Broker> AlmgrenChriss<B> {
    pub fn new(broker: Arc<B>, config: AlmgrenChrissConfig) -> Self {
        Self { broker, config }
    }

    pub async fn execute(&self, symbol: &str, side: Side, qty: Decimal, quote: &Quote, parent_id: &str) -> Result<ExecutionResult> {
        let n = self.config.num_slices.max(1);
        let dt = self.config.horizon_seconds / n as f64;
        let k_val = kappa(&self.config);
        let total_qty_f64 = qty.to_f64().unwrap_or(0.0);

        let mut total_filled = Decimal::ZERO;
        let mut weighted_price_sum = Decimal::ZERO;
        let mut attempts = Vec::new();
        let mut final_order_id = None;
        let mut remaining = qty;

        for k in 1..=n {
            if remaining <= Decimal::ZERO {
                break;
            }
            let x_prev = trajectory_remaining(total_qty_f64, k - 1, n, k_val, dt);
            let x_curr = trajectory_remaining(total_qty_f64, k, n, k_val, dt);
            let slice_qty_f64 = (x_prev - x_curr).max(0.0);
            let slice_qty = Decimal::try_from(slice_qty_f64).unwrap_or_default().min(remaining);
            if slice_qty <= Decimal::ZERO {
                continue;
            }

            let aggressiveness = slice_aggressiveness(k - 1, n);
            let limit_price = slice_limit_price(side, quote, aggressiveness, self.config.min_price);
            let client_order_id = format!("{parent_id}-slice-{k}");

            let request = BrokerLimitOrderRequest {
                symbol: symbol.to_string(),
                qty: slice_qty,
                side: to_broker_side(side),
                limit_price,
                time_in_force: TimeInForce::Day,
                client_order_id: Some(client_order_id),
            };

            let order = match self.broker.place_limit_order(request).await {
                Ok(order) => order,
                Err(e) => {
                    attempts.push(ExecutionAttempt {
                        label: format!("slice-{k}"),
                        order_id: None,
                        limit_price: Some(limit_price),
                        filled_qty: Decimal::ZERO,
                        status: format!("submit_failed: {e}"),
                    });
                    continue;
                }
            };

            tokio::time::sleep(Duration::from_secs(self.config.slice_wait_seconds)).await;
            let result = self.broker.get_order_execution_result(&order.id).await?;

            attempts.push(ExecutionAttempt {
                label: format!("slice-{k}"),
                order_id: Some(order.id.clone()),
                limit_price: Some(limit_price),
                filled_qty: result.filled_qty,
                status: format!("{:?}", result.status),
            });

            if result.filled_qty > Decimal::ZERO {
                weighted_price_sum += result.filled_qty * result.avg_fill_price.unwrap_or(limit_price);
                total_filled += result.filled_qty;
                remaining -= result.filled_qty;
                final_order_id = Some(order.id.clone());
            }

            if result.status != NormalizedOrderStatus::Filled {
                let _ = self.broker.cancel_order(&order.id).await;
            }
        }

        let fill_fraction = if qty.is_zero() { Decimal::ONE } else { total_filled / qty };
        if remaining > Decimal::ZERO && self.config.market_fallback_enabled && fill_fraction < Decimal::new(5, 1) {
            return self.market_fallback(symbol, side, remaining, parent_id, attempts, total_filled, weighted_price_sum).await;
        }

        let success = qty.is_zero() || total_filled / qty >= self.config.success_fill_threshold;
        Ok(ExecutionResult {
            success,
            total_filled,
            avg_fill_price: avg_price(total_filled, weighted_price_sum),
            final_order_id,
            attempts,
            error_message: if success { None } else { Some("insufficient fill after trajectory slices".to_string()) },
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trajectory_starts_at_full_quantity_and_ends_at_zero() {
        let k = kappa(&AlmgrenChrissConfig::default());
        let dt = 1800.0 / 6.0;
        assert!((trajectory_remaining(1000.0, 0, 6, k, dt) - 1000.0).abs() < 1e-6);
        assert!(trajectory_remaining(1000.0, 6, 6, k, dt).abs() < 1e-6);
    }

    #[test]
    fn trajectory_is_monotonically_decreasing() {
        let k = kappa(&AlmgrenChrissConfig::default());
        let dt = 1800.0 / 6.0;
        let mut prev = trajectory_remaining(1000.0, 0, 6, k, dt);
        for i in 1..=6 {
            let curr = trajectory_remaining(1000.0, i, 6, k, dt);
            assert!(curr <= prev + 1e-9);
            prev = curr;
        }
    }

    #[test]
    fn aggressiveness_ramps_from_60_to_90_percent() {
        assert!((slice_aggressiveness(0, 6) - 0.60).abs() < 1e-9);
        assert!((slice_aggressiveness(5, 6) - 0.90).abs() < 1e-9);
    }

    #[test]
    fn single_slice_uses_base_aggressiveness() {
        assert!((slice_aggressiveness(0, 1) - 0.60).abs() < 1e-9);
    }
}
