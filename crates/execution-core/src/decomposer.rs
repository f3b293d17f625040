use std::sync::Arc;

use anyhow::{Context, Result};
use execution_types::{Action, Phase, RebalancePlan, RunStatus, TradeMessage};
use rust_decimal::Decimal;
use run_store::RunStore;
use uuid::Uuid;

use crate::queue::{QueuedMessage, TradeQueue};

#[derive(Debug, Clone, Copy)]
pub struct DecomposerConfig {
    /// Fraction of available equity a run's BUY phase may deploy.
    pub equity_deployment_pct: Decimal,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self { equity_deployment_pct: Decimal::new(95, 2) }
    }
}

/// Splits a rebalance plan into per-trade messages, creates the run record,
/// and enqueues SELLs first (or, in the zero-sell edge case, BUYs
/// immediately).
pub struct PlanDecomposer<Q: TradeQueue, R: RunStore> {
    queue: Arc<Q>,
    run_store: Arc<R>,
    config: DecomposerConfig,
}

impl<Q: TradeQueue, R: RunStore> PlanDecomposer<Q, R> {
    pub fn new(queue: Arc<Q>, run_store: Arc<R>, config: DecomposerConfig) -> Self {
        Self { queue, run_store, config }
    }

    pub async fn decompose_and_enqueue(
        &self,
        plan: &RebalancePlan,
        correlation_id: Uuid,
        strategy_id: &str,
        alpaca_equity: Option<Decimal>,
    ) -> Result<usize> {
        let run_id = Uuid::new_v4();

        let mut messages: Vec<TradeMessage> = plan
            .items
            .iter()
            .filter(|item| item.action != Action::Hold)
            .filter_map(|item| {
                TradeMessage::from_plan_item(run_id, plan.plan_id, correlation_id, strategy_id, item, plan.execution_policy)
            })
            .collect();
        messages.sort_by_key(|m| m.sequence_number);

        let base_equity = alpaca_equity.unwrap_or(plan.total_portfolio_value);
        let max_equity_limit_usd = base_equity * self.config.equity_deployment_pct;

        self.run_store
            .create_run(run_id, correlation_id, &messages, max_equity_limit_usd)
            .await
            .with_context(|| format!("creating run {run_id}"))?;

        let sell_count = messages.iter().filter(|m| m.phase == Phase::Sell).count();

        let to_enqueue: Vec<TradeMessage> = if sell_count == 0 {
            // Zero-sell edge case: nothing blocks the BUY phase, so it must
            // not wait on a SELL completion that will never arrive.
            if let Err(err) = self.run_store.transition_to_buy_phase(run_id).await {
                self.run_store.update_run_status(run_id, RunStatus::Failed).await.ok();
                return Err(err).with_context(|| format!("transitioning run {run_id} to buy phase"));
            }
            messages.into_iter().filter(|m| m.phase == Phase::Buy).collect()
        } else {
            messages.into_iter().filter(|m| m.phase == Phase::Sell).collect()
        };

        let enqueued_count = to_enqueue.len();
        let is_buy_batch = sell_count == 0;

        for message in to_enqueue {
            let trade_id = message.trade_id;
            if let Err(err) = self.queue.send(QueuedMessage::for_trade(message)).await {
                self.run_store.update_run_status(run_id, RunStatus::Failed).await.ok();
                return Err(err.context(format!("enqueueing trade {trade_id} for run {run_id}")));
            }
        }

        if is_buy_batch && enqueued_count > 0 {
            self.run_store.mark_buy_trades_pending(run_id).await?;
        }

        Ok(enqueued_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use execution_types::{ExecutionPolicy, PlanItem};
    use rust_decimal_macros::dec;
    use run_store::SqliteRunStore;
    use sqlx::any::AnyPoolOptions;

    use crate::queue::InMemoryTradeQueue;

    async fn memory_store() -> SqliteRunStore {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let store = SqliteRunStore::from_pool(pool);
        store.init_schema().await.unwrap();
        store
    }

    fn item(symbol: &str, action: Action, target: Decimal, current: Decimal, priority: i32) -> PlanItem {
        PlanItem {
            symbol: symbol.to_string(),
            action,
            target_weight: target,
            current_weight: current,
            trade_amount: dec!(1000),
            priority,
            shares: None,
            estimated_price: None,
        }
    }

    fn plan(items: Vec<PlanItem>) -> RebalancePlan {
        RebalancePlan {
            correlation_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            items,
            total_portfolio_value: dec!(100000),
            execution_policy: ExecutionPolicy::WalkTheBook,
        }
    }

    #[tokio::test]
    async fn zero_sell_plan_enqueues_buys_immediately() {
        let store = Arc::new(memory_store().await);
        let queue = Arc::new(InMemoryTradeQueue::new());
        let decomposer = PlanDecomposer::new(queue.clone(), store.clone(), DecomposerConfig::default());

        let p = plan(vec![
            item("AAPL", Action::Buy, dec!(0.1), dec!(0), 0),
            item("MSFT", Action::Buy, dec!(0.2), dec!(0), 1),
        ]);

        let enqueued = decomposer.decompose_and_enqueue(&p, p.correlation_id, "test-strategy", None).await.unwrap();
        assert_eq!(enqueued, 2);
        assert_eq!(queue.receive_batch(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sell_phase_is_enqueued_before_buys() {
        let store = Arc::new(memory_store().await);
        let queue = Arc::new(InMemoryTradeQueue::new());
        let decomposer = PlanDecomposer::new(queue.clone(), store.clone(), DecomposerConfig::default());

        let p = plan(vec![
            item("AAPL", Action::Sell, dec!(0), dec!(0.1), 0),
            item("MSFT", Action::Buy, dec!(0.2), dec!(0), 0),
        ]);

        let enqueued = decomposer.decompose_and_enqueue(&p, p.correlation_id, "test-strategy", None).await.unwrap();
        assert_eq!(enqueued, 1);
        let batch = queue.receive_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message.symbol, "AAPL");
    }

    #[tokio::test]
    async fn hold_items_never_become_messages() {
        let store = Arc::new(memory_store().await);
        let queue = Arc::new(InMemoryTradeQueue::new());
        let decomposer = PlanDecomposer::new(queue.clone(), store.clone(), DecomposerConfig::default());

        let p = plan(vec![item("AAPL", Action::Hold, dec!(0.1), dec!(0.1), 0)]);
        let enqueued = decomposer.decompose_and_enqueue(&p, p.correlation_id, "test-strategy", None).await.unwrap();
        assert_eq!(enqueued, 0);
    }
}
