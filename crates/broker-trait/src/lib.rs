use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Unified broker types (broker-agnostic)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerAccount {
    pub id: String,
    pub account_number: String,
    pub status: String,
    pub currency: String,
    pub cash: String,
    pub buying_power: String,
    pub portfolio_value: String,
    pub equity: String,
    pub pattern_day_trader: bool,
    pub trading_blocked: bool,
    pub daytrade_count: i32,
}

impl BrokerAccount {
    pub fn cash_decimal(&self) -> Decimal {
        Decimal::from_str(&self.cash).unwrap_or_default()
    }
    pub fn buying_power_decimal(&self) -> Decimal {
        Decimal::from_str(&self.buying_power).unwrap_or_default()
    }
    pub fn portfolio_value_decimal(&self) -> Decimal {
        Decimal::from_str(&self.portfolio_value).unwrap_or_default()
    }
    pub fn equity_decimal(&self) -> Decimal {
        Decimal::from_str(&self.equity).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: String,
    pub side: String,
    pub avg_entry_price: String,
    pub market_value: String,
    pub cost_basis: String,
    pub unrealized_pl: String,
    pub unrealized_plpc: String,
    pub unrealized_intraday_pl: String,
    pub current_price: String,
    pub lastday_price: String,
    pub change_today: String,
}

impl BrokerPosition {
    pub fn qty_decimal(&self) -> Decimal {
        Decimal::from_str(&self.qty).unwrap_or_default()
    }
    pub fn avg_entry_price_decimal(&self) -> Decimal {
        Decimal::from_str(&self.avg_entry_price).unwrap_or_default()
    }
    pub fn market_value_decimal(&self) -> Decimal {
        Decimal::from_str(&self.market_value).unwrap_or_default()
    }
    pub fn cost_basis_decimal(&self) -> Decimal {
        Decimal::from_str(&self.cost_basis).unwrap_or_default()
    }
    pub fn unrealized_pl_decimal(&self) -> Decimal {
        Decimal::from_str(&self.unrealized_pl).unwrap_or_default()
    }
    pub fn current_price_decimal(&self) -> Decimal {
        Decimal::from_str(&self.current_price).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerOrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Day,
    /// Participate in the closing auction print.
    Cls,
}

/// Normalized order status, collapsing broker-specific spellings:
/// NEW/ACCEPTED/PENDING_NEW collapse to `Open`; CANCELED and CANCELLED both
/// map to `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizedOrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl NormalizedOrderStatus {
    pub fn from_broker_str(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "new" | "accepted" | "pending_new" => Self::Open,
            "partially_filled" => Self::PartiallyFilled,
            "filled" => Self::Filled,
            "canceled" | "cancelled" => Self::Cancelled,
            "rejected" => Self::Rejected,
            "expired" => Self::Expired,
            _ => Self::Open,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrderRequest {
    pub symbol: String,
    pub qty: Decimal,
    pub side: BrokerOrderSide,
    pub client_order_id: Option<String>,
    /// Whether this order is expected to close out a position entirely.
    pub is_complete_exit: bool,
}

impl BrokerOrderRequest {
    pub fn buy(symbol: impl Into<String>, qty: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            side: BrokerOrderSide::Buy,
            client_order_id: None,
            is_complete_exit: false,
        }
    }

    pub fn sell(symbol: impl Into<String>, qty: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            side: BrokerOrderSide::Sell,
            client_order_id: None,
            is_complete_exit: false,
        }
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    pub fn with_complete_exit(mut self, complete: bool) -> Self {
        self.is_complete_exit = complete;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerLimitOrderRequest {
    pub symbol: String,
    pub qty: Decimal,
    pub side: BrokerOrderSide,
    pub limit_price: Decimal,
    pub time_in_force: TimeInForce,
    pub client_order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub id: String,
    pub client_order_id: String,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub symbol: String,
    pub qty: Option<String>,
    pub filled_qty: Option<String>,
    pub filled_avg_price: Option<String>,
    pub order_type: String,
    pub side: String,
    pub status: String,
}

impl BrokerOrder {
    pub fn filled_quantity_decimal(&self) -> Option<Decimal> {
        self.filled_qty
            .as_ref()
            .and_then(|s| Decimal::from_str(s).ok())
    }

    pub fn filled_avg_price_decimal(&self) -> Option<Decimal> {
        self.filled_avg_price
            .as_ref()
            .and_then(|s| Decimal::from_str(s).ok())
    }

    pub fn normalized_status(&self) -> NormalizedOrderStatus {
        NormalizedOrderStatus::from_broker_str(&self.status)
    }
}

/// Result of polling an order to (or past) a terminal state.
#[derive(Debug, Clone)]
pub struct OrderExecutionResult {
    pub status: NormalizedOrderStatus,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub error_message: Option<String>,
}

/// Result of a `wait_for_order_completion` call across one or more orders.
#[derive(Debug, Clone)]
pub struct WaitForCompletionResult {
    pub completed_order_ids: Vec<String>,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerQuote {
    pub symbol: String,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Broker trait
// ---------------------------------------------------------------------------

/// Broker-agnostic trading interface consumed by the execution core.
///
/// Covers account and position lookups, order submission/cancellation, plus
/// the quote, limit-order, and completion-polling operations a multi-step
/// execution strategy needs.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn get_account(&self) -> Result<BrokerAccount>;

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>>;

    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>>;

    async fn get_current_price(&self, symbol: &str) -> Result<Option<Decimal>>;

    async fn get_latest_quote(&self, symbol: &str) -> Result<Option<BrokerQuote>>;

    async fn place_market_order(&self, order: BrokerOrderRequest) -> Result<BrokerOrder>;

    async fn place_limit_order(&self, order: BrokerLimitOrderRequest) -> Result<BrokerOrder>;

    async fn get_order(&self, order_id: &str) -> Result<BrokerOrder>;

    async fn get_order_execution_result(&self, order_id: &str) -> Result<OrderExecutionResult>;

    async fn get_orders(&self, limit: Option<usize>) -> Result<Vec<BrokerOrder>>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    async fn wait_for_order_completion(
        &self,
        order_ids: &[String],
        max_wait_seconds: u64,
    ) -> Result<WaitForCompletionResult>;

    async fn close_position(&self, symbol: &str) -> Result<BrokerOrder>;

    async fn is_market_open(&self) -> Result<bool>;

    /// Whether this is a paper/simulated account.
    fn is_paper(&self) -> bool;

    /// Broker name for logging.
    fn broker_name(&self) -> &str;
}
