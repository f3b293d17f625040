use std::sync::Arc;

use anyhow::Result;
use execution_types::{Phase, RunStatus, TradeStatus};
use run_store::RunStore;

use crate::queue::{QueuedMessage, TradeQueue};

/// Recovers runs stuck between a won `transition_to_buy_phase` and a
/// completed BUY enqueue, the narrow crash window between the two writes.
/// Mirrors the startup-recovery idiom of scanning for stuck work and
/// re-driving it from durable state.
///
/// Re-enqueuing already-enqueued BUY messages is safe: `mark_buy_trades_pending`
/// only records that the enqueue happened and doesn't gate the phase
/// transition, and the consuming worker's per-trade idempotency check
/// absorbs any resulting duplicate delivery.
pub async fn reconcile_stuck_buy_phases<R: RunStore + ?Sized, Q: TradeQueue + ?Sized>(run_store: &Arc<R>, queue: &Arc<Q>) -> Result<usize> {
    let stuck_runs = run_store.find_stuck_runs(0).await?;
    let mut resweept = 0;

    for run in stuck_runs {
        if run.status != RunStatus::BuyPhase || run.current_phase != Phase::Buy {
            continue;
        }

        let all_buy_trades_pending = run.trade_ids.len() as i64 > 0 && {
            let mut all_pending = true;
            for trade_id in &run.trade_ids {
                let Some(trade) = run_store.get_trade(run.run_id, *trade_id).await? else { continue };
                if trade.phase == Phase::Buy && trade.status != TradeStatus::Pending {
                    all_pending = false;
                    break;
                }
            }
            all_pending
        };

        if !all_buy_trades_pending {
            continue;
        }

        let pending = run_store.get_pending_buy_trades(run.run_id).await?;
        if pending.is_empty() {
            continue;
        }

        for message in pending {
            queue.send(QueuedMessage::for_trade(message)).await?;
        }
        run_store.mark_buy_trades_pending(run.run_id).await?;
        resweept += 1;
    }

    Ok(resweept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use execution_types::{Action, ExecutionPolicy, PlanItem, TradeMessage};
    use rust_decimal_macros::dec;
    use run_store::SqliteRunStore;
    use sqlx::any::AnyPoolOptions;
    use uuid::Uuid;

    use crate::queue::InMemoryTradeQueue;

    async fn memory_store() -> SqliteRunStore {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let store = SqliteRunStore::from_pool(pool);
        store.init_schema().await.unwrap();
        store
    }

    fn trade(run_id: Uuid, symbol: &str, action: Action, priority: i32) -> TradeMessage {
        let item = PlanItem {
            symbol: symbol.to_string(),
            action,
            target_weight: dec!(0.1),
            current_weight: dec!(0),
            trade_amount: dec!(500),
            priority,
            shares: None,
            estimated_price: None,
        };
        TradeMessage::from_plan_item(run_id, Uuid::new_v4(), Uuid::new_v4(), "test", &item, ExecutionPolicy::WalkTheBook).unwrap()
    }

    #[tokio::test]
    async fn resweeps_a_run_stuck_with_unenqueued_buy_trades() {
        let store = Arc::new(memory_store().await);
        let queue = Arc::new(InMemoryTradeQueue::new());
        let run_id = Uuid::new_v4();

        let sell = trade(run_id, "AAPL", Action::Sell, 0);
        let buy = trade(run_id, "MSFT", Action::Buy, 0);
        store.create_run(run_id, Uuid::new_v4(), &[sell.clone(), buy], dec!(100000)).await.unwrap();

        store.mark_trade_started(run_id, sell.trade_id).await.unwrap();
        store
            .mark_trade_completed(
                run_id,
                sell.trade_id,
                sell.trade_amount,
                Phase::Sell,
                run_store::TradeCompletion { success: true, order_id: None, error_message: None, execution_data: None },
            )
            .await
            .unwrap();
        store.transition_to_buy_phase(run_id).await.unwrap();

        let resweept = reconcile_stuck_buy_phases(&store, &queue).await.unwrap();
        assert_eq!(resweept, 1);
        assert_eq!(queue.receive_batch(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn leaves_runs_with_no_pending_buy_messages_alone() {
        let store = Arc::new(memory_store().await);
        let queue = Arc::new(InMemoryTradeQueue::new());
        let run_id = Uuid::new_v4();

        let buy = trade(run_id, "MSFT", Action::Buy, 0);
        store.create_run(run_id, Uuid::new_v4(), &[buy], dec!(100000)).await.unwrap();

        let resweept = reconcile_stuck_buy_phases(&store, &queue).await.unwrap();
        assert_eq!(resweept, 0);
    }
}
