use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single BUY/SELL/HOLD directive within a rebalance plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

/// Which half of a run a trade belongs to. Mirrors `Action` for non-HOLD items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Sell,
    Buy,
}

/// Execution strategy fixed on a Trade Message at decomposition time.
///
/// A trade dispatches to exactly one of these for its whole lifetime; a
/// `TimeAware` trade never also runs `WalkTheBook`/`AlmgrenChriss`, and vice
/// versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionPolicy {
    WalkTheBook,
    AlmgrenChriss,
    TimeAware,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::WalkTheBook
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    pub symbol: String,
    pub action: Action,
    /// Target weight in [0, 1].
    pub target_weight: Decimal,
    /// Current weight in [0, 1].
    pub current_weight: Decimal,
    /// Signed USD trade amount; zero for HOLD.
    pub trade_amount: Decimal,
    pub priority: i32,
    /// Explicit share count, when the planner already knows it.
    #[serde(default)]
    pub shares: Option<Decimal>,
    /// Price to divide `trade_amount` by when `shares` is absent.
    #[serde(default)]
    pub estimated_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub correlation_id: Uuid,
    pub plan_id: Uuid,
    pub items: Vec<PlanItem>,
    pub total_portfolio_value: Decimal,
    #[serde(default)]
    pub execution_policy: ExecutionPolicy,
}

impl RebalancePlan {
    /// Sum of target weights across non-HOLD items. Invariant: must be <= 1.
    pub fn total_target_weight(&self) -> Decimal {
        self.items
            .iter()
            .filter(|i| i.action != Action::Hold)
            .map(|i| i.target_weight)
            .sum()
    }
}

/// A Trade Message derived from one non-HOLD plan item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeMessage {
    pub run_id: Uuid,
    pub trade_id: Uuid,
    pub plan_id: Uuid,
    pub correlation_id: Uuid,
    pub strategy_id: String,
    pub symbol: String,
    pub action: Action,
    /// Absolute USD amount to trade.
    pub trade_amount: Decimal,
    pub current_weight: Decimal,
    pub target_weight: Decimal,
    pub priority: i32,
    pub phase: Phase,
    pub sequence_number: i64,
    /// SELL whose target weight is zero and current weight is positive.
    pub is_complete_exit: bool,
    /// Target weight is zero (full liquidation of the position).
    pub is_full_liquidation: bool,
    pub execution_policy: ExecutionPolicy,
    /// Explicit share count, bypassing price-based resolution when set.
    pub shares: Option<Decimal>,
    /// Price used to convert `trade_amount` into a share count when `shares`
    /// is absent; falls back to a fresh broker quote when this is also absent.
    pub estimated_price: Option<Decimal>,
}

impl TradeMessage {
    pub fn sequence_number_for(phase: Phase, priority: i32) -> i64 {
        let base = match phase {
            Phase::Sell => 1000,
            Phase::Buy => 2000,
        };
        base + priority as i64
    }

    pub fn from_plan_item(
        run_id: Uuid,
        plan_id: Uuid,
        correlation_id: Uuid,
        strategy_id: impl Into<String>,
        item: &PlanItem,
        execution_policy: ExecutionPolicy,
    ) -> Option<Self> {
        let phase = match item.action {
            Action::Buy => Phase::Buy,
            Action::Sell => Phase::Sell,
            Action::Hold => return None,
        };
        let is_full_liquidation = item.target_weight.is_zero();
        let is_complete_exit =
            item.action == Action::Sell && is_full_liquidation && item.current_weight > Decimal::ZERO;
        Some(Self {
            run_id,
            trade_id: Uuid::new_v4(),
            plan_id,
            correlation_id,
            strategy_id: strategy_id.into(),
            symbol: item.symbol.clone(),
            action: item.action,
            trade_amount: item.trade_amount.abs(),
            current_weight: item.current_weight,
            target_weight: item.target_weight,
            priority: item.priority,
            phase,
            sequence_number: Self::sequence_number_for(phase, item.priority),
            is_complete_exit,
            is_full_liquidation,
            execution_policy,
            shares: item.shares,
            estimated_price: item.estimated_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(symbol: &str, action: Action, target: Decimal, current: Decimal) -> PlanItem {
        PlanItem {
            symbol: symbol.to_string(),
            action,
            target_weight: target,
            current_weight: current,
            trade_amount: dec!(100),
            priority: 0,
            shares: None,
            estimated_price: None,
        }
    }

    #[test]
    fn sequence_numbers_order_sells_before_buys() {
        let sell = TradeMessage::sequence_number_for(Phase::Sell, 5);
        let buy = TradeMessage::sequence_number_for(Phase::Buy, 0);
        assert!(sell < buy);
    }

    #[test]
    fn complete_exit_requires_sell_and_zero_target_and_nonzero_current() {
        let run_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();
        let corr = Uuid::new_v4();

        let full_exit = item("AAPL", Action::Sell, dec!(0), dec!(0.1));
        let msg = TradeMessage::from_plan_item(run_id, plan_id, corr, "s", &full_exit, ExecutionPolicy::WalkTheBook)
            .unwrap();
        assert!(msg.is_complete_exit);
        assert!(msg.is_full_liquidation);

        let partial_sell = item("AAPL", Action::Sell, dec!(0.05), dec!(0.1));
        let msg = TradeMessage::from_plan_item(run_id, plan_id, corr, "s", &partial_sell, ExecutionPolicy::WalkTheBook)
            .unwrap();
        assert!(!msg.is_complete_exit);
    }

    #[test]
    fn hold_items_produce_no_trade_message() {
        let run_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();
        let corr = Uuid::new_v4();
        let hold = item("AAPL", Action::Hold, dec!(0.1), dec!(0.1));
        assert!(TradeMessage::from_plan_item(run_id, plan_id, corr, "s", &hold, ExecutionPolicy::WalkTheBook).is_none());
    }
}
