use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use broker_trait::Broker;
use chrono::Utc;
use execution_strategies::SynchronousStrategy;
use execution_types::{
    generate_client_order_id, Action, CloseType, ExecutionData, ExecutionPhase, ExecutionPolicy, ExecutionState,
    OrderIntent, Phase, PendingExecution, RunStatus, Side, TradeMessage, Urgency,
};
use portfolio_validator::PortfolioValidator;
use quote_pipeline::QuotePipeline;
use rust_decimal::Decimal;
use run_store::{PendingExecutionStore, RunStore, TradeCompletion};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::ExecutionCoreError;
use crate::events::{Event, EventBus};
use crate::queue::{QueuedMessage, TradeQueue};

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Above this cumulative SELL-failure USD amount, the BUY phase is
    /// blocked outright.
    pub sell_failure_threshold_usd: Decimal,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { sell_failure_threshold_usd: Decimal::from(500) }
    }
}

/// One stateless invocation per delivered trade message: fetch current
/// state, check guards, execute, record the outcome, and fan out events.
pub struct SingleTradeWorker<B: Broker> {
    broker: Arc<B>,
    run_store: Arc<dyn RunStore>,
    pending_store: Arc<dyn PendingExecutionStore>,
    queue: Arc<dyn TradeQueue>,
    quote_pipeline: Arc<QuotePipeline<B>>,
    validator: Arc<PortfolioValidator<B>>,
    event_bus: Arc<EventBus>,
    /// Per-invocation dedup set; correctness relies on the store's
    /// conditional writes, not on this memory.
    seen: Mutex<HashSet<String>>,
    config: WorkerConfig,
}

impl<B: Broker> SingleTradeWorker<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Arc<B>,
        run_store: Arc<dyn RunStore>,
        pending_store: Arc<dyn PendingExecutionStore>,
        queue: Arc<dyn TradeQueue>,
        quote_pipeline: Arc<QuotePipeline<B>>,
        validator: Arc<PortfolioValidator<B>>,
        event_bus: Arc<EventBus>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            broker,
            run_store,
            pending_store,
            queue,
            quote_pipeline,
            validator,
            event_bus,
            seen: Mutex::new(HashSet::new()),
            config,
        }
    }

    pub async fn handle(&self, queued: QueuedMessage) -> Result<()> {
        let msg = queued.message;
        let key = idempotency_key(&msg);
        self.seen.lock().await.insert(key);

        if let Some(existing) = self.run_store.get_trade(msg.run_id, msg.trade_id).await? {
            if existing.status.is_terminal() {
                tracing::debug!(trade_id = %msg.trade_id, "duplicate delivery of a completed trade, skipping");
                return Ok(());
            }
        }

        if !self.run_store.mark_trade_started(msg.run_id, msg.trade_id).await? {
            tracing::debug!(trade_id = %msg.trade_id, "trade already claimed by another worker, skipping");
            return Ok(());
        }

        match self.broker.is_market_open().await {
            Ok(false) => {
                return self
                    .finish(&msg, TradeCompletion {
                        success: true,
                        order_id: None,
                        error_message: Some("market closed - skipped".to_string()),
                        execution_data: None,
                    })
                    .await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not determine market status, proceeding");
            }
            Ok(true) => {}
        }

        let side = match msg.action {
            Action::Buy => Side::Buy,
            Action::Sell => Side::Sell,
            Action::Hold => unreachable!("HOLD plan items never become trade messages"),
        };

        if side == Side::Buy {
            let check = self.run_store.check_equity_circuit_breaker(msg.run_id, msg.trade_amount).await?;
            if !check.allowed {
                return self
                    .finish(&msg, TradeCompletion {
                        success: false,
                        order_id: None,
                        error_message: Some(ExecutionCoreError::CircuitBreakerRejected.to_string()),
                        execution_data: None,
                    })
                    .await;
            }
        }

        let shares = match self.resolve_shares(&msg, side).await {
            Ok(shares) => shares,
            Err(err) => {
                return self
                    .finish(&msg, TradeCompletion { success: false, order_id: None, error_message: Some(err.to_string()), execution_data: None })
                    .await;
            }
        };

        let close_type = match (side, msg.is_complete_exit) {
            (Side::Sell, true) => CloseType::Full,
            (Side::Sell, false) => CloseType::Partial,
            (Side::Buy, _) => CloseType::None,
        };

        let client_order_id = generate_client_order_id(&msg.symbol, &msg.strategy_id, None, None)
            .unwrap_or_else(|_| format!("{}-{}", msg.strategy_id, msg.trade_id));

        let intent = match OrderIntent::new(side, close_type, msg.symbol.clone(), shares, Urgency::Medium, msg.correlation_id, client_order_id.clone()) {
            Ok(intent) => intent,
            Err(err) => {
                return self
                    .finish(&msg, TradeCompletion { success: false, order_id: None, error_message: Some(err.to_string()), execution_data: None })
                    .await;
            }
        };

        let pre_check = self.validator.validate_before_execution(&intent).await?;
        if !pre_check.can_execute {
            return self
                .finish(&msg, TradeCompletion { success: false, order_id: None, error_message: pre_check.error, execution_data: None })
                .await;
        }
        let qty = pre_check.adjusted_qty.unwrap_or(shares);

        let outcome = self.execute(&msg, side, qty, &client_order_id).await;

        match outcome {
            Ok(completion) => self.finish(&msg, completion).await,
            Err(err) => {
                self.finish(&msg, TradeCompletion {
                    success: false,
                    order_id: None,
                    error_message: Some(err.to_string()),
                    execution_data: None,
                })
                .await
                .ok();
                Err(err)
            }
        }
    }

    async fn execute(&self, msg: &TradeMessage, side: Side, qty: Decimal, client_order_id: &str) -> Result<TradeCompletion> {
        if msg.execution_policy == ExecutionPolicy::TimeAware {
            return self.dispatch_time_aware(msg, side, qty).await;
        }

        let quote = self.quote_pipeline.get_best_quote(&msg.symbol, msg.correlation_id).await?;
        let strategy = SynchronousStrategy::for_policy(msg.execution_policy, self.broker.clone())
            .expect("non-TimeAware policies always resolve to a synchronous strategy");
        let result = strategy.execute(&msg.symbol, side, qty, &quote, client_order_id).await?;

        let execution_data = ExecutionData {
            filled_shares: result.total_filled,
            avg_price: result.avg_fill_price.unwrap_or_default(),
            order_type: "multi-step".to_string(),
            filled_at: if result.success { Some(Utc::now()) } else { None },
        };

        Ok(TradeCompletion {
            success: result.success,
            order_id: result.final_order_id,
            error_message: result.error_message,
            execution_data: Some(execution_data),
        })
    }

    /// Hands the trade off to the periodic time-aware tick runner instead of
    /// running it to completion inline. The trade-level row completes once
    /// the hand-off is durably recorded; fill progress is then tracked on
    /// the `PendingExecution` itself rather than via `mark_trade_completed`,
    /// since a time-aware execution can span the rest of the trading day.
    async fn dispatch_time_aware(&self, msg: &TradeMessage, side: Side, qty: Decimal) -> Result<TradeCompletion> {
        let now = Utc::now();
        let execution = PendingExecution {
            execution_id: Uuid::new_v4(),
            symbol: msg.symbol.clone(),
            side,
            target_qty: qty,
            filled_qty: Decimal::ZERO,
            avg_fill_price: None,
            state: ExecutionState::Pending,
            current_phase: ExecutionPhase::MarketClosed,
            urgency_score: Decimal::ZERO,
            child_orders: Vec::new(),
            policy_id: Some(msg.trade_id.to_string()),
            version: 0,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        self.pending_store.create_pending_execution(&execution).await?;

        Ok(TradeCompletion {
            success: true,
            order_id: Some(execution.execution_id.to_string()),
            error_message: None,
            execution_data: None,
        })
    }

    async fn resolve_shares(&self, msg: &TradeMessage, side: Side) -> Result<Decimal> {
        if msg.is_full_liquidation && side == Side::Sell {
            let position = self.broker.get_position(&msg.symbol).await?;
            return match position {
                Some(p) if p.qty_decimal() > Decimal::ZERO => Ok(p.qty_decimal()),
                _ => Err(ExecutionCoreError::NoPositionToLiquidate(msg.symbol.clone()).into()),
            };
        }

        if let Some(shares) = msg.shares {
            return Ok(shares);
        }

        if let Some(price) = msg.estimated_price {
            if price > Decimal::ZERO {
                return Ok((msg.trade_amount / price).round_dp(6));
            }
        }

        let price = self.broker.get_current_price(&msg.symbol).await?;
        match price {
            Some(p) if p > Decimal::ZERO => Ok((msg.trade_amount / p).round_dp(6)),
            _ => Err(ExecutionCoreError::NoUsablePrice(msg.symbol.clone()).into()),
        }
    }

    /// Records the trade's terminal outcome, emits `TradeExecuted`, and — for
    /// the trade that wins the SELL phase — triggers the BUY phase.
    async fn finish(&self, msg: &TradeMessage, completion: TradeCompletion) -> Result<()> {
        let shares_executed = completion.execution_data.as_ref().map(|d| d.filled_shares).unwrap_or(Decimal::ZERO);
        let price: Option<Decimal> = completion.execution_data.as_ref().map(|d| d.avg_price);

        let result = self
            .run_store
            .mark_trade_completed(msg.run_id, msg.trade_id, msg.trade_amount, msg.phase, completion.clone())
            .await?;

        self.event_bus.emit(Event::TradeExecuted {
            run_id: msg.run_id,
            trade_id: msg.trade_id,
            symbol: msg.symbol.clone(),
            action: msg.action,
            success: completion.success,
            order_id: completion.order_id.clone(),
            shares_executed,
            price,
            error: completion.error_message.clone(),
        });

        if !result.already_completed && msg.phase == Phase::Sell && result.sell_phase_complete {
            self.trigger_buy_phase(msg.run_id, msg.correlation_id).await?;
        }

        Ok(())
    }

    /// Applies the BUY-phase guard, then wins (at most once) the SELL -> BUY
    /// transition and enqueues the held BUY messages.
    pub async fn trigger_buy_phase(&self, run_id: Uuid, correlation_id: Uuid) -> Result<()> {
        let run = self.run_store.get_run(run_id).await?.ok_or(run_store::RunStoreError::RunNotFound(run_id.to_string()))?;

        if run.sell_failed_amount > self.config.sell_failure_threshold_usd {
            self.run_store.update_run_status(run_id, RunStatus::Failed).await?;
            self.event_bus.emit(Event::WorkflowFailed {
                correlation_id,
                workflow_type: "rebalance".to_string(),
                failure_reason: ExecutionCoreError::PhaseGuardTripped.to_string(),
                failure_step: "SELL_PHASE_GUARD".to_string(),
                error_details: Some(format!(
                    "sell_failed_amount={} threshold={}",
                    run.sell_failed_amount, self.config.sell_failure_threshold_usd
                )),
            });
            return Ok(());
        }

        if self.run_store.transition_to_buy_phase(run_id).await? {
            let pending = self.run_store.get_pending_buy_trades(run_id).await?;
            for message in pending {
                self.queue.send(QueuedMessage::for_trade(message)).await?;
            }
            self.run_store.mark_buy_trades_pending(run_id).await?;
        }

        Ok(())
    }
}

/// `sha256(run_id|trade_id|symbol|action)`, truncated to 16 hex characters.
fn idempotency_key(msg: &TradeMessage) -> String {
    let input = format!("{}|{}|{}|{:?}", msg.run_id, msg.trade_id, msg.symbol, msg.action);
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use execution_types::TradeMessage;
    use uuid::Uuid;

    fn sample_message(action: Action) -> TradeMessage {
        TradeMessage {
            run_id: Uuid::new_v4(),
            trade_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            strategy_id: "test".to_string(),
            symbol: "AAPL".to_string(),
            action,
            trade_amount: Decimal::from(1000),
            current_weight: Decimal::ZERO,
            target_weight: Decimal::ZERO,
            priority: 0,
            phase: Phase::Sell,
            sequence_number: 1000,
            is_complete_exit: false,
            is_full_liquidation: false,
            execution_policy: ExecutionPolicy::WalkTheBook,
            shares: None,
            estimated_price: None,
        }
    }

    #[test]
    fn idempotency_key_is_stable_for_the_same_trade() {
        let msg = sample_message(Action::Sell);
        assert_eq!(idempotency_key(&msg), idempotency_key(&msg));
    }

    #[test]
    fn idempotency_key_differs_across_actions() {
        let mut msg = sample_message(Action::Sell);
        let sell_key = idempotency_key(&msg);
        msg.action = Action::Buy;
        assert_ne!(sell_key, idempotency_key(&msg));
    }

    #[test]
    fn idempotency_key_is_sixteen_hex_characters() {
        let msg = sample_message(Action::Sell);
        let key = idempotency_key(&msg);
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
