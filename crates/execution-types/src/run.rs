use crate::plan::{Phase, TradeMessage};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    SellPhase,
    BuyPhase,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TradeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Run record, one per rebalance (conceptually `RUN#{run_id}/METADATA`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub correlation_id: Uuid,

    pub total_trades: i64,
    pub completed_trades: i64,
    pub succeeded_trades: i64,
    pub failed_trades: i64,

    pub sell_total: i64,
    pub sell_completed: i64,
    pub buy_total: i64,
    pub buy_completed: i64,

    pub sell_failed_amount: Decimal,
    pub sell_succeeded_amount: Decimal,

    pub max_equity_limit_usd: Decimal,
    pub cumulative_buy_succeeded_value: Decimal,

    pub current_phase: Phase,
    pub status: RunStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Row expires ~24h after creation; enforced by an explicit sweep since
    /// the SQLite backing store has no native TTL attribute.
    pub expires_at: DateTime<Utc>,

    pub trade_ids: Vec<Uuid>,
    /// BUY trade messages withheld from the queue until the SELL phase
    /// completes.
    pub pending_buy_messages: Vec<TradeMessage>,
}

impl RunRecord {
    /// Derived flag: true once every SELL trade has reached a terminal
    /// state, or trivially true if there were no SELL trades at all.
    pub fn sell_phase_complete(&self) -> bool {
        self.sell_total == 0 || self.sell_completed >= self.sell_total
    }

    pub fn is_sell_phase_complete(&self) -> bool {
        self.current_phase == Phase::Sell && self.sell_phase_complete()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionData {
    pub filled_shares: Decimal,
    pub avg_price: Decimal,
    pub order_type: String,
    pub filled_at: Option<DateTime<Utc>>,
}

/// Trade record, one per trade (conceptually `RUN#{run_id}/TRADE#{trade_id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub run_id: Uuid,
    pub trade_id: Uuid,
    pub symbol: String,
    pub phase: Phase,
    pub sequence_number: i64,
    pub trade_amount: Decimal,
    pub status: TradeStatus,
    pub order_id: Option<String>,
    pub error_message: Option<String>,
    pub execution_data: Option<ExecutionData>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
