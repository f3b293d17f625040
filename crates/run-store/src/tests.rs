use execution_types::{Action, ExecutionPolicy, Phase, PlanItem, RunStatus, TradeMessage};
use rust_decimal_macros::dec;
use sqlx::any::AnyPoolOptions;
use uuid::Uuid;

use crate::store::{RunStore, SqliteRunStore, TradeCompletion};

async fn memory_store() -> SqliteRunStore {
    sqlx::any::install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite pool");
    let store = SqliteRunStore::from_pool(pool);
    store.init_schema().await.expect("schema init");
    store
}

fn trade(symbol: &str, action: Action, target: &str, current: &str, priority: i32) -> TradeMessage {
    let item = PlanItem {
        symbol: symbol.to_string(),
        action,
        target_weight: target.parse().unwrap(),
        current_weight: current.parse().unwrap(),
        trade_amount: dec!(1000),
        priority,
        shares: None,
        estimated_price: None,
    };
    TradeMessage::from_plan_item(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "test-strategy", &item, ExecutionPolicy::WalkTheBook)
        .expect("non-HOLD item produces a trade message")
}

#[tokio::test]
async fn create_run_seeds_sell_and_buy_counters() {
    let store = memory_store().await;
    let run_id = Uuid::new_v4();
    let trades = vec![
        trade("AAPL", Action::Sell, "0", "0.2", 0),
        trade("MSFT", Action::Buy, "0.2", "0", 1),
    ];
    store
        .create_run(run_id, Uuid::new_v4(), &trades, dec!(100000))
        .await
        .unwrap();

    let run = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.sell_total, 1);
    assert_eq!(run.buy_total, 1);
    assert_eq!(run.status, RunStatus::SellPhase);
    assert_eq!(run.pending_buy_messages.len(), 1);
}

#[tokio::test]
async fn create_run_with_no_sells_starts_in_buy_phase() {
    let store = memory_store().await;
    let run_id = Uuid::new_v4();
    let trades = vec![trade("MSFT", Action::Buy, "0.2", "0", 0)];
    store.create_run(run_id, Uuid::new_v4(), &trades, dec!(100000)).await.unwrap();

    let run = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::BuyPhase);
    assert!(run.sell_phase_complete());
}

#[tokio::test]
async fn mark_trade_started_is_claimed_exactly_once() {
    let store = memory_store().await;
    let run_id = Uuid::new_v4();
    let t = trade("AAPL", Action::Sell, "0", "0.2", 0);
    let trade_id = t.trade_id;
    store.create_run(run_id, Uuid::new_v4(), &[t], dec!(100000)).await.unwrap();

    assert!(store.mark_trade_started(run_id, trade_id).await.unwrap());
    assert!(!store.mark_trade_started(run_id, trade_id).await.unwrap());
}

#[tokio::test]
async fn mark_trade_completed_rejects_duplicate_completion() {
    let store = memory_store().await;
    let run_id = Uuid::new_v4();
    let t = trade("AAPL", Action::Sell, "0", "0.2", 0);
    let trade_id = t.trade_id;
    let phase = t.phase;
    store.create_run(run_id, Uuid::new_v4(), &[t], dec!(100000)).await.unwrap();
    store.mark_trade_started(run_id, trade_id).await.unwrap();

    let outcome = TradeCompletion {
        success: true,
        order_id: Some("order-1".to_string()),
        error_message: None,
        execution_data: None,
    };
    let result = store
        .mark_trade_completed(run_id, trade_id, dec!(1000), phase, outcome.clone())
        .await
        .unwrap();
    assert!(!result.already_completed);
    assert!(result.sell_phase_complete);

    let second = store.mark_trade_completed(run_id, trade_id, dec!(1000), phase, outcome).await.unwrap();
    assert!(second.already_completed);
}

#[tokio::test]
async fn transition_to_buy_phase_succeeds_exactly_once() {
    let store = memory_store().await;
    let run_id = Uuid::new_v4();
    let t = trade("AAPL", Action::Sell, "0", "0.2", 0);
    store.create_run(run_id, Uuid::new_v4(), &[t], dec!(100000)).await.unwrap();

    assert!(store.transition_to_buy_phase(run_id).await.unwrap());
    assert!(!store.transition_to_buy_phase(run_id).await.unwrap());

    let run = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::BuyPhase);
}

#[tokio::test]
async fn equity_circuit_breaker_blocks_once_headroom_exhausted() {
    let store = memory_store().await;
    let run_id = Uuid::new_v4();
    let t = trade("MSFT", Action::Buy, "0.2", "0", 0);
    store.create_run(run_id, Uuid::new_v4(), &[t], dec!(1000)).await.unwrap();

    let first = store.check_equity_circuit_breaker(run_id, dec!(600)).await.unwrap();
    assert!(first.allowed);
    store.record_buy_succeeded_value(run_id, dec!(600)).await.unwrap();

    let second = store.check_equity_circuit_breaker(run_id, dec!(500)).await.unwrap();
    assert!(!second.allowed);
}

#[tokio::test]
async fn successful_buy_completion_advances_cumulative_buy_succeeded_value() {
    let store = memory_store().await;
    let run_id = Uuid::new_v4();
    let first_buy = trade("MSFT", Action::Buy, "0.2", "0", 0);
    let first_id = first_buy.trade_id;
    let second_buy = trade("GOOG", Action::Buy, "0.2", "0", 1);
    let second_id = second_buy.trade_id;
    store.create_run(run_id, Uuid::new_v4(), &[first_buy, second_buy], dec!(1000)).await.unwrap();

    store.mark_trade_started(run_id, first_id).await.unwrap();
    let outcome = TradeCompletion { success: true, order_id: Some("order-1".to_string()), error_message: None, execution_data: None };
    store.mark_trade_completed(run_id, first_id, dec!(1000), Phase::Buy, outcome).await.unwrap();

    let check = store.check_equity_circuit_breaker(run_id, dec!(1)).await.unwrap();
    assert!(!check.allowed, "cumulative_buy_succeeded_value should now equal the limit, leaving no headroom");

    store.mark_trade_started(run_id, second_id).await.unwrap();
    let failed = TradeCompletion { success: false, order_id: None, error_message: Some("rejected".to_string()), execution_data: None };
    store.mark_trade_completed(run_id, second_id, dec!(1000), Phase::Buy, failed).await.unwrap();

    let check = store.check_equity_circuit_breaker(run_id, dec!(1)).await.unwrap();
    assert!(!check.allowed, "a failed BUY must not move cumulative_buy_succeeded_value");
}

#[tokio::test]
async fn mark_run_completed_is_idempotent() {
    let store = memory_store().await;
    let run_id = Uuid::new_v4();
    let t = trade("MSFT", Action::Buy, "0.2", "0", 0);
    store.create_run(run_id, Uuid::new_v4(), &[t], dec!(100000)).await.unwrap();

    assert!(store.mark_run_completed(run_id).await.unwrap());
    assert!(!store.mark_run_completed(run_id).await.unwrap());
}
