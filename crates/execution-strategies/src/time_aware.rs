use std::sync::Arc;

use anyhow::Result;
use broker_trait::{Broker, BrokerLimitOrderRequest, BrokerOrderRequest, BrokerOrderSide, NormalizedOrderStatus, TimeInForce};
use chrono::{DateTime, NaiveTime, Utc};
use execution_types::{ChildOrder, ExecutionPhase, ExecutionState, PegType, PendingExecution, Quote, Side};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use run_store::PendingExecutionStore;

use crate::phases::{allowed_pegs, default_peg, phase_for_time};
use crate::urgency::{combined_urgency, UrgencyBreakdown, UrgencyWeights};

#[derive(Debug, Clone, Copy)]
pub struct TimeAwareConfig {
    pub session_open: NaiveTime,
    pub session_close: NaiveTime,
    pub auction_cutoff: NaiveTime,
    pub ramp_exponent: f64,
    pub weights: UrgencyWeights,
    pub max_order_size_fraction: f64,
    pub min_order_qty: Decimal,
    pub auction_reserve_fraction: f64,
    pub auction_eligible: bool,
}

impl Default for TimeAwareConfig {
    fn default() -> Self {
        Self {
            session_open: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            session_close: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            auction_cutoff: NaiveTime::from_hms_opt(15, 50, 0).unwrap(),
            ramp_exponent: 2.5,
            weights: UrgencyWeights::default(),
            max_order_size_fraction: 0.25,
            min_order_qty: Decimal::ONE,
            auction_reserve_fraction: 1.0,
            auction_eligible: true,
        }
    }
}

pub struct TimeAwareTickOutcome {
    pub execution: PendingExecution,
    pub urgency: UrgencyBreakdown,
    pub persisted: bool,
}

/// Periodic-tick institutional execution across the trading day: a single
/// per-tick step operating on a persisted `PendingExecution` under
/// optimistic locking, rather than a one-shot run loop.
pub struct TimeAwareExecutor<B: Broker, S: PendingExecutionStore + ?Sized> {
    broker: Arc<B>,
    store: Arc<S>,
    config: TimeAwareConfig,
}

impl<B: Broker, S: PendingExecutionStore + ?Sized> TimeAwareExecutor<B, S> {
    pub fn new(broker: Arc<B>, store: Arc<S>, config: TimeAwareConfig) -> Self {
        Self { broker, store, config }
    }

    pub async fn tick(&self, mut execution: PendingExecution, now: DateTime<Utc>, quote: &Quote) -> Result<TimeAwareTickOutcome> {
        let expected_version = execution.version;

        self.reconcile_child_orders(&mut execution).await?;

        if execution.filled_qty >= execution.target_qty {
            execution.state = ExecutionState::Completed;
            let persisted = self.store.save_pending_execution(&execution, expected_version).await?;
            return Ok(TimeAwareTickOutcome {
                urgency: UrgencyBreakdown { time_urgency: 0.0, fill_urgency: 0.0, phase_urgency: 0.0, combined: 0.0 },
                execution,
                persisted,
            });
        }

        let wall_clock = now.time();
        let phase = phase_for_time(wall_clock, self.config.session_open, self.config.session_close);
        execution.current_phase = phase;

        let session_total = (self.config.session_close - self.config.session_open).num_seconds() as f64;
        let elapsed = (wall_clock - self.config.session_open).num_seconds() as f64;
        let filled_ratio = if execution.target_qty.is_zero() {
            1.0
        } else {
            (execution.filled_qty / execution.target_qty).to_f64().unwrap_or(0.0)
        };

        let urgency = combined_urgency(elapsed, session_total, filled_ratio, phase, self.config.ramp_exponent, self.config.weights);
        execution.urgency_score = Decimal::try_from(urgency.combined).unwrap_or_default();

        let peg = self.select_peg(phase, urgency.combined);
        self.cancel_overly_passive_children(&mut execution, peg).await?;

        let open_children = execution.child_orders.iter().filter(|c| c.filled_qty < c.qty).count();
        if open_children == 0 && execution.remaining_qty() > Decimal::ZERO {
            self.submit_child_order(&mut execution, peg, urgency.combined, quote).await?;
        }

        if phase == ExecutionPhase::DeadlineClose
            && self.config.auction_eligible
            && wall_clock >= self.config.auction_cutoff
            && !execution.child_orders.iter().any(|c| c.peg == PegType::Market && c.order_id.ends_with("-auction"))
        {
            self.submit_closing_auction(&mut execution).await?;
        }

        let persisted = self.store.save_pending_execution(&execution, expected_version).await?;
        Ok(TimeAwareTickOutcome { execution, urgency, persisted })
    }

    fn select_peg(&self, phase: ExecutionPhase, urgency: f64) -> PegType {
        let allowed = allowed_pegs(phase);
        if allowed.is_empty() {
            return default_peg(phase);
        }
        let idx = ((urgency * (allowed.len() - 1) as f64).floor() as usize).min(allowed.len() - 1);
        allowed[idx]
    }

    async fn reconcile_child_orders(&self, execution: &mut PendingExecution) -> Result<()> {
        let mut total_filled = Decimal::ZERO;
        let mut weighted_sum = Decimal::ZERO;
        for child in &mut execution.child_orders {
            if let Ok(result) = self.broker.get_order_execution_result(&child.order_id).await {
                child.filled_qty = result.filled_qty;
            }
            if child.filled_qty > Decimal::ZERO {
                total_filled += child.filled_qty;
                weighted_sum += child.filled_qty * execution.avg_fill_price.unwrap_or_default();
            }
        }
        if total_filled > Decimal::ZERO {
            execution.filled_qty = total_filled;
            execution.avg_fill_price = Some(weighted_sum / total_filled);
        }
        Ok(())
    }

    async fn cancel_overly_passive_children(&self, execution: &mut PendingExecution, target_peg: PegType) -> Result<()> {
        let target_rank = PegType::RANKED.iter().position(|p| *p == target_peg).unwrap_or(0);
        let mut survivors = Vec::new();
        for child in execution.child_orders.drain(..) {
            let rank = PegType::RANKED.iter().position(|p| *p == child.peg).unwrap_or(0);
            if rank < target_rank {
                let _ = self.broker.cancel_order(&child.order_id).await;
            } else {
                survivors.push(child);
            }
        }
        execution.child_orders = survivors;
        Ok(())
    }

    async fn submit_child_order(&self, execution: &mut PendingExecution, peg: PegType, urgency: f64, quote: &Quote) -> Result<()> {
        let remaining = execution.remaining_qty();
        let size_fraction = Decimal::try_from(0.10 + 0.90 * urgency).unwrap_or_default();
        let cap = remaining * Decimal::try_from(self.config.max_order_size_fraction).unwrap_or(Decimal::ONE);
        let qty = (remaining * size_fraction).min(cap).max(self.config.min_order_qty).min(remaining);
        if qty <= Decimal::ZERO {
            return Ok(());
        }

        let client_order_id = format!("{}-tick-{}", execution.execution_id, execution.child_orders.len());

        let order = match peg.price_ratio() {
            None => {
                let request = BrokerOrderRequest {
                    symbol: execution.symbol.clone(),
                    qty,
                    side: to_broker_side(execution.side),
                    client_order_id: Some(client_order_id),
                    is_complete_exit: false,
                };
                self.broker.place_market_order(request).await?
            }
            Some(ratio) => {
                let ratio = Decimal::try_from(ratio).unwrap_or_default();
                let spread = quote.ask_price - quote.bid_price;
                let limit_price = match execution.side {
                    Side::Buy => quote.bid_price + spread * ratio,
                    Side::Sell => quote.ask_price - spread * ratio,
                };
                let request = BrokerLimitOrderRequest {
                    symbol: execution.symbol.clone(),
                    qty,
                    side: to_broker_side(execution.side),
                    limit_price: limit_price.max(Decimal::new(1, 2)),
                    time_in_force: TimeInForce::Day,
                    client_order_id: Some(client_order_id),
                };
                self.broker.place_limit_order(request).await?
            }
        };

        execution.child_orders.push(ChildOrder {
            order_id: order.id,
            side: execution.side,
            qty,
            filled_qty: Decimal::ZERO,
            peg,
            submitted_at: Utc::now(),
        });
        Ok(())
    }

    async fn submit_closing_auction(&self, execution: &mut PendingExecution) -> Result<()> {
        let remaining = execution.remaining_qty();
        let qty = remaining * Decimal::try_from(self.config.auction_reserve_fraction).unwrap_or(Decimal::ONE);
        if qty <= Decimal::ZERO {
            return Ok(());
        }
        let client_order_id = format!("{}-auction", execution.execution_id);
        let request = BrokerLimitOrderRequest {
            symbol: execution.symbol.clone(),
            qty,
            side: to_broker_side(execution.side),
            limit_price: Decimal::ZERO,
            time_in_force: TimeInForce::Cls,
            client_order_id: Some(client_order_id),
        };
        if let Ok(order) = self.broker.place_limit_order(request).await {
            execution.child_orders.push(ChildOrder {
                order_id: order.id,
                side: execution.side,
                qty,
                filled_qty: Decimal::ZERO,
                peg: PegType::Market,
                submitted_at: Utc::now(),
            });
        }
        Ok(())
    }
}

fn to_broker_side(side: Side) -> BrokerOrderSide {
    match side {
        Side::Buy => BrokerOrderSide::Buy,
        Side::Sell => BrokerOrderSide::Sell,
    }
}

/// Returns whether `status`, if obtained for an order, should be treated as
/// still-working for the purposes of the "fewer than one open child order"
/// check in step 5 of the tick algorithm.
pub fn is_still_working(status: NormalizedOrderStatus) -> bool {
    !status.is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_peg_picks_most_passive_at_zero_urgency() {
        let executor_peg = {
            let allowed = allowed_pegs(ExecutionPhase::PassiveAccumulation);
            allowed[0]
        };
        assert_eq!(executor_peg, PegType::Mid);
    }

    #[test]
    fn deadline_close_allows_indexing_into_full_ranked_list() {
        let allowed = allowed_pegs(ExecutionPhase::DeadlineClose);
        let idx = ((1.0_f64 * (allowed.len() - 1) as f64).floor() as usize).min(allowed.len() - 1);
        assert_eq!(allowed[idx], PegType::Market);
    }
}
