use rust_decimal::Decimal;
use thiserror::Error;

/// Per-trade terminal failure kinds, carried into
/// `RunStore::mark_trade_completed`'s `error_message` via `Display`.
#[derive(Debug, Error)]
pub enum ExecutionCoreError {
    #[error("circuit breaker: proposed buy would exceed equity limit")]
    CircuitBreakerRejected,
    #[error("BUY phase blocked: SELL failures exceed threshold")]
    PhaseGuardTripped,
    #[error("insufficient position for {symbol}: have {have}, requested {requested}")]
    InsufficientPosition { symbol: String, have: Decimal, requested: Decimal },
    #[error("settlement mismatch: expected {expected}, actual {actual}")]
    SettlementMismatch { expected: Decimal, actual: Decimal },
    #[error("no usable price to resolve shares for {0}")]
    NoUsablePrice(String),
    #[error("no position to liquidate for {0}")]
    NoPositionToLiquidate(String),
    #[error(transparent)]
    RunStore(#[from] run_store::RunStoreError),
}
