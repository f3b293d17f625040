use chrono::{DateTime, Utc};
use execution_types::{
    ChildOrder, ExecutionData, ExecutionPhase, ExecutionState, Phase, PendingExecution, RunRecord, RunStatus, Side,
    TradeMessage, TradeRecord, TradeStatus,
};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

fn parse_phase(raw: &str) -> Phase {
    match raw {
        "BUY" => Phase::Buy,
        _ => Phase::Sell,
    }
}

pub(crate) fn phase_str(phase: Phase) -> &'static str {
    match phase {
        Phase::Sell => "SELL",
        Phase::Buy => "BUY",
    }
}

fn parse_run_status(raw: &str) -> RunStatus {
    match raw {
        "PENDING" => RunStatus::Pending,
        "SELL_PHASE" => RunStatus::SellPhase,
        "BUY_PHASE" => RunStatus::BuyPhase,
        "COMPLETED" => RunStatus::Completed,
        _ => RunStatus::Failed,
    }
}

pub(crate) fn run_status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "PENDING",
        RunStatus::SellPhase => "SELL_PHASE",
        RunStatus::BuyPhase => "BUY_PHASE",
        RunStatus::Completed => "COMPLETED",
        RunStatus::Failed => "FAILED",
    }
}

fn parse_trade_status(raw: &str) -> TradeStatus {
    match raw {
        "PENDING" => TradeStatus::Pending,
        "RUNNING" => TradeStatus::Running,
        "COMPLETED" => TradeStatus::Completed,
        _ => TradeStatus::Failed,
    }
}

pub(crate) fn trade_status_str(status: TradeStatus) -> &'static str {
    match status {
        TradeStatus::Pending => "PENDING",
        TradeStatus::Running => "RUNNING",
        TradeStatus::Completed => "COMPLETED",
        TradeStatus::Failed => "FAILED",
    }
}

pub(crate) fn parse_dt(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Boundary row matching the `runs` table's f64/TEXT columns, converted into
/// `RunRecord`'s Decimal/enum shape at the edge, mirroring
/// `ActiveRiskPositionRow -> ActiveRiskPosition`.
#[derive(sqlx::FromRow)]
pub(crate) struct RunRow {
    pub run_id: String,
    pub correlation_id: String,
    pub total_trades: i64,
    pub completed_trades: i64,
    pub succeeded_trades: i64,
    pub failed_trades: i64,
    pub sell_total: i64,
    pub sell_completed: i64,
    pub buy_total: i64,
    pub buy_completed: i64,
    pub sell_failed_amount: f64,
    pub sell_succeeded_amount: f64,
    pub max_equity_limit_usd: f64,
    pub cumulative_buy_succeeded_value: f64,
    pub current_phase: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub expires_at: String,
    pub pending_buy_messages: String,
}

impl RunRow {
    pub(crate) fn into_record(self, trade_ids: Vec<Uuid>) -> RunRecord {
        let pending_buy_messages: Vec<TradeMessage> =
            serde_json::from_str(&self.pending_buy_messages).unwrap_or_default();
        RunRecord {
            run_id: Uuid::parse_str(&self.run_id).unwrap_or_default(),
            correlation_id: Uuid::parse_str(&self.correlation_id).unwrap_or_default(),
            total_trades: self.total_trades,
            completed_trades: self.completed_trades,
            succeeded_trades: self.succeeded_trades,
            failed_trades: self.failed_trades,
            sell_total: self.sell_total,
            sell_completed: self.sell_completed,
            buy_total: self.buy_total,
            buy_completed: self.buy_completed,
            sell_failed_amount: Decimal::from_f64(self.sell_failed_amount).unwrap_or_default(),
            sell_succeeded_amount: Decimal::from_f64(self.sell_succeeded_amount).unwrap_or_default(),
            max_equity_limit_usd: Decimal::from_f64(self.max_equity_limit_usd).unwrap_or_default(),
            cumulative_buy_succeeded_value: Decimal::from_f64(self.cumulative_buy_succeeded_value)
                .unwrap_or_default(),
            current_phase: parse_phase(&self.current_phase),
            status: parse_run_status(&self.status),
            created_at: parse_dt(&self.created_at),
            updated_at: parse_dt(&self.updated_at),
            expires_at: parse_dt(&self.expires_at),
            trade_ids,
            pending_buy_messages,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct TradeRow {
    pub trade_id: String,
    pub symbol: String,
    pub phase: String,
    pub sequence_number: i64,
    pub trade_amount: f64,
    pub status: String,
    pub order_id: Option<String>,
    pub error_message: Option<String>,
    pub execution_data: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl TradeRow {
    pub(crate) fn into_record(self, run_id: Uuid) -> TradeRecord {
        let execution_data: Option<ExecutionData> = self
            .execution_data
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        TradeRecord {
            run_id,
            trade_id: Uuid::parse_str(&self.trade_id).unwrap_or_default(),
            symbol: self.symbol,
            phase: parse_phase(&self.phase),
            sequence_number: self.sequence_number,
            trade_amount: Decimal::from_f64(self.trade_amount).unwrap_or_default(),
            status: parse_trade_status(&self.status),
            order_id: self.order_id,
            error_message: self.error_message,
            execution_data,
            created_at: parse_dt(&self.created_at),
            started_at: self.started_at.as_deref().map(parse_dt),
            completed_at: self.completed_at.as_deref().map(parse_dt),
        }
    }
}

pub(crate) use phase_str as to_phase_str;
pub(crate) use run_status_str as to_run_status_str;
pub(crate) use trade_status_str as to_trade_status_str;

fn parse_side(raw: &str) -> Side {
    match raw {
        "BUY" => Side::Buy,
        _ => Side::Sell,
    }
}

pub(crate) fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn parse_execution_state(raw: &str) -> ExecutionState {
    match raw {
        "PENDING" => ExecutionState::Pending,
        "ACTIVE" => ExecutionState::Active,
        "PAUSED" => ExecutionState::Paused,
        "COMPLETED" => ExecutionState::Completed,
        "FAILED" => ExecutionState::Failed,
        _ => ExecutionState::Cancelled,
    }
}

pub(crate) fn execution_state_str(state: ExecutionState) -> &'static str {
    match state {
        ExecutionState::Pending => "PENDING",
        ExecutionState::Active => "ACTIVE",
        ExecutionState::Paused => "PAUSED",
        ExecutionState::Completed => "COMPLETED",
        ExecutionState::Failed => "FAILED",
        ExecutionState::Cancelled => "CANCELLED",
    }
}

fn parse_execution_phase(raw: &str) -> ExecutionPhase {
    match raw {
        "OPEN_AVOIDANCE" => ExecutionPhase::OpenAvoidance,
        "PASSIVE_ACCUMULATION" => ExecutionPhase::PassiveAccumulation,
        "URGENCY_RAMP" => ExecutionPhase::UrgencyRamp,
        "DEADLINE_CLOSE" => ExecutionPhase::DeadlineClose,
        _ => ExecutionPhase::MarketClosed,
    }
}

pub(crate) fn execution_phase_str(phase: ExecutionPhase) -> &'static str {
    match phase {
        ExecutionPhase::OpenAvoidance => "OPEN_AVOIDANCE",
        ExecutionPhase::PassiveAccumulation => "PASSIVE_ACCUMULATION",
        ExecutionPhase::UrgencyRamp => "URGENCY_RAMP",
        ExecutionPhase::DeadlineClose => "DEADLINE_CLOSE",
        ExecutionPhase::MarketClosed => "MARKET_CLOSED",
    }
}

pub(crate) use execution_phase_str as to_execution_phase_str;
pub(crate) use execution_state_str as to_execution_state_str;
pub(crate) use side_str as to_side_str;

/// Boundary row for the `pending_executions` table, the time-aware
/// strategy's optimistically-locked persistence unit.
#[derive(sqlx::FromRow)]
pub(crate) struct PendingExecutionRow {
    pub execution_id: String,
    pub symbol: String,
    pub side: String,
    pub target_qty: f64,
    pub filled_qty: f64,
    pub avg_fill_price: Option<f64>,
    pub state: String,
    pub current_phase: String,
    pub urgency_score: f64,
    pub child_orders: String,
    pub policy_id: Option<String>,
    pub version: i64,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl PendingExecutionRow {
    pub(crate) fn into_record(self) -> PendingExecution {
        let child_orders: Vec<ChildOrder> = serde_json::from_str(&self.child_orders).unwrap_or_default();
        PendingExecution {
            execution_id: Uuid::parse_str(&self.execution_id).unwrap_or_default(),
            symbol: self.symbol,
            side: parse_side(&self.side),
            target_qty: Decimal::from_f64(self.target_qty).unwrap_or_default(),
            filled_qty: Decimal::from_f64(self.filled_qty).unwrap_or_default(),
            avg_fill_price: self.avg_fill_price.and_then(Decimal::from_f64),
            state: parse_execution_state(&self.state),
            current_phase: parse_execution_phase(&self.current_phase),
            urgency_score: Decimal::from_f64(self.urgency_score).unwrap_or_default(),
            child_orders,
            policy_id: self.policy_id,
            version: self.version,
            notes: self.notes,
            created_at: parse_dt(&self.created_at),
            updated_at: parse_dt(&self.updated_at),
        }
    }
}
