use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use broker_trait::Broker;
use execution_types::{CloseType, OrderIntent, Side};
use rust_decimal::Decimal;

/// Tolerance absorbing float-imprecision between a plan's requested SELL
/// quantity and the broker's reported position.
fn sell_tolerance_fraction() -> Decimal {
    Decimal::new(1, 2)
}

/// Tolerance for comparing actual vs. expected post-fill position.
fn fractional_share_tolerance() -> Decimal {
    Decimal::new(1, 3)
}

#[derive(Debug, Clone)]
pub struct PreExecutionCheck {
    pub can_execute: bool,
    pub initial_position: Decimal,
    pub error: Option<String>,
    pub adjusted_qty: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct PostExecutionCheck {
    pub passed: bool,
    pub expected_position: Decimal,
    pub actual_position: Decimal,
    pub diff: Decimal,
}

/// Pre/post-execution position reconciliation: a small struct holding
/// broker state and running checks before and after a fill, returning
/// Ok/Err rather than panicking on a mismatch.
pub struct PortfolioValidator<B: Broker> {
    broker: Arc<B>,
}

impl<B: Broker> PortfolioValidator<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self { broker }
    }

    pub async fn validate_before_execution(&self, intent: &OrderIntent) -> Result<PreExecutionCheck> {
        let position = self.broker.get_position(&intent.symbol).await?;
        let initial_position = position.map(|p| p.qty_decimal()).unwrap_or(Decimal::ZERO);

        if intent.side != Side::Sell {
            return Ok(PreExecutionCheck {
                can_execute: true,
                initial_position,
                error: None,
                adjusted_qty: None,
            });
        }

        if initial_position < intent.quantity {
            let shortfall = intent.quantity - initial_position;
            let tolerance = intent.quantity * sell_tolerance_fraction();
            if shortfall <= tolerance && initial_position > Decimal::ZERO {
                return Ok(PreExecutionCheck {
                    can_execute: true,
                    initial_position,
                    error: None,
                    adjusted_qty: Some(initial_position),
                });
            }
            return Ok(PreExecutionCheck {
                can_execute: false,
                initial_position,
                error: Some(format!(
                    "insufficient position for {}: have {}, requested {}",
                    intent.symbol, initial_position, intent.quantity
                )),
                adjusted_qty: None,
            });
        }

        if intent.close_type == CloseType::Full && initial_position != intent.quantity {
            tracing::warn!(
                symbol = %intent.symbol,
                initial_position = %initial_position,
                requested = %intent.quantity,
                "full close quantity does not match reported position, allowing anyway"
            );
        }

        Ok(PreExecutionCheck { can_execute: true, initial_position, error: None, adjusted_qty: None })
    }

    pub async fn validate_execution(
        &self,
        intent: &OrderIntent,
        filled_qty: Decimal,
        initial_position: Decimal,
    ) -> Result<PostExecutionCheck> {
        let expected_position = match (intent.side, intent.close_type) {
            (Side::Buy, _) => initial_position + filled_qty,
            (Side::Sell, CloseType::Full) => Decimal::ZERO,
            (Side::Sell, _) => initial_position - filled_qty,
        };

        let actual_position = self.poll_settled_position(&intent.symbol).await?;
        let diff = (actual_position - expected_position).abs();

        Ok(PostExecutionCheck {
            passed: diff <= fractional_share_tolerance(),
            expected_position,
            actual_position,
            diff,
        })
    }

    async fn poll_settled_position(&self, symbol: &str) -> Result<Decimal> {
        let delays = [
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(12),
        ];
        let mut last = Decimal::ZERO;
        for delay in delays {
            tokio::time::sleep(delay).await;
            last = self
                .broker
                .get_position(symbol)
                .await?
                .map(|p| p.qty_decimal())
                .unwrap_or(Decimal::ZERO);
        }
        Ok(last)
    }
}

pub fn require_positive_fill(filled_qty: Decimal) -> Result<()> {
    if filled_qty <= Decimal::ZERO {
        bail!("fill quantity must be positive, got {filled_qty}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use broker_trait::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct FixedPositionBroker {
        qty: Decimal,
    }

    #[async_trait]
    impl Broker for FixedPositionBroker {
        async fn get_account(&self) -> AnyResult<BrokerAccount> {
            unimplemented!()
        }
        async fn get_positions(&self) -> AnyResult<Vec<BrokerPosition>> {
            unimplemented!()
        }
        async fn get_position(&self, symbol: &str) -> AnyResult<Option<BrokerPosition>> {
            if self.qty.is_zero() {
                return Ok(None);
            }
            Ok(Some(BrokerPosition {
                symbol: symbol.to_string(),
                qty: self.qty.to_string(),
                side: "long".to_string(),
                avg_entry_price: "100".to_string(),
                market_value: "100".to_string(),
                cost_basis: "100".to_string(),
                unrealized_pl: "0".to_string(),
                unrealized_plpc: "0".to_string(),
                unrealized_intraday_pl: "0".to_string(),
                current_price: "100".to_string(),
                lastday_price: "100".to_string(),
                change_today: "0".to_string(),
            }))
        }
        async fn get_current_price(&self, _symbol: &str) -> AnyResult<Option<Decimal>> {
            unimplemented!()
        }
        async fn get_latest_quote(&self, _symbol: &str) -> AnyResult<Option<BrokerQuote>> {
            unimplemented!()
        }
        async fn place_market_order(&self, _order: BrokerOrderRequest) -> AnyResult<BrokerOrder> {
            unimplemented!()
        }
        async fn place_limit_order(&self, _order: BrokerLimitOrderRequest) -> AnyResult<BrokerOrder> {
            unimplemented!()
        }
        async fn get_order(&self, _order_id: &str) -> AnyResult<BrokerOrder> {
            unimplemented!()
        }
        async fn get_order_execution_result(&self, _order_id: &str) -> AnyResult<OrderExecutionResult> {
            unimplemented!()
        }
        async fn get_orders(&self, _limit: Option<usize>) -> AnyResult<Vec<BrokerOrder>> {
            unimplemented!()
        }
        async fn cancel_order(&self, _order_id: &str) -> AnyResult<()> {
            unimplemented!()
        }
        async fn wait_for_order_completion(&self, _order_ids: &[String], _max_wait_seconds: u64) -> AnyResult<WaitForCompletionResult> {
            unimplemented!()
        }
        async fn close_position(&self, _symbol: &str) -> AnyResult<BrokerOrder> {
            unimplemented!()
        }
        async fn is_market_open(&self) -> AnyResult<bool> {
            Ok(true)
        }
        fn is_paper(&self) -> bool {
            true
        }
        fn broker_name(&self) -> &str {
            "fixed"
        }
    }

    fn sell_intent(qty: Decimal) -> OrderIntent {
        OrderIntent::new(Side::Sell, CloseType::None, "AAPL", qty, execution_types::Urgency::Medium, Uuid::new_v4(), "coid").unwrap()
    }

    #[tokio::test]
    async fn allows_sell_within_tolerance_of_reported_position() {
        let broker = Arc::new(FixedPositionBroker { qty: dec!(99.5) });
        let validator = PortfolioValidator::new(broker);
        let intent = sell_intent(dec!(100));

        let result = validator.validate_before_execution(&intent).await.unwrap();
        assert!(result.can_execute);
        assert_eq!(result.adjusted_qty, Some(dec!(99.5)));
    }

    #[tokio::test]
    async fn rejects_sell_far_beyond_reported_position() {
        let broker = Arc::new(FixedPositionBroker { qty: dec!(10) });
        let validator = PortfolioValidator::new(broker);
        let intent = sell_intent(dec!(100));

        let result = validator.validate_before_execution(&intent).await.unwrap();
        assert!(!result.can_execute);
        assert!(result.error.is_some());
    }
}
