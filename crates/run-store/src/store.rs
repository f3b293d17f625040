use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use execution_types::{ExecutionData, Phase, PendingExecution, RunRecord, RunStatus, TradeMessage, TradeRecord, TradeStatus};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::error::RunStoreError;
use crate::models::{
    parse_dt, to_execution_phase_str, to_execution_state_str, to_phase_str, to_run_status_str, to_side_str,
    to_trade_status_str, PendingExecutionRow, RunRow, TradeRow,
};

const RUN_TTL_HOURS: i64 = 24;

/// Outcome a trade worker reports back when it finishes a trade attempt.
#[derive(Debug, Clone)]
pub struct TradeCompletion {
    pub success: bool,
    pub order_id: Option<String>,
    pub error_message: Option<String>,
    pub execution_data: Option<ExecutionData>,
}

/// Aggregate counters after a completion write lands, used by the caller to
/// decide whether the SELL phase just finished.
#[derive(Debug, Clone, Copy)]
pub struct TradeCompletionResult {
    pub already_completed: bool,
    pub sell_completed: i64,
    pub sell_total: i64,
    pub buy_completed: i64,
    pub buy_total: i64,
    pub sell_phase_complete: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerCheck {
    pub allowed: bool,
    pub headroom: Decimal,
}

/// Persistence seam for run/trade bookkeeping. The concrete substrate is a
/// single SQL table set standing in for the partition/sort key layout of a
/// wide-column store: `run_id` plays the partition key role, `trade_id` the
/// sort key role.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(
        &self,
        run_id: Uuid,
        correlation_id: Uuid,
        trades: &[TradeMessage],
        max_equity_limit_usd: Decimal,
    ) -> Result<(), RunStoreError>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunRecord>, RunStoreError>;

    async fn get_trade(&self, run_id: Uuid, trade_id: Uuid) -> Result<Option<TradeRecord>, RunStoreError>;

    /// Claims a trade for execution. Returns `false` if another worker
    /// already claimed it (PENDING -> RUNNING is a conditional write).
    async fn mark_trade_started(&self, run_id: Uuid, trade_id: Uuid) -> Result<bool, RunStoreError>;

    async fn mark_trade_completed(
        &self,
        run_id: Uuid,
        trade_id: Uuid,
        trade_amount: Decimal,
        phase: Phase,
        outcome: TradeCompletion,
    ) -> Result<TradeCompletionResult, RunStoreError>;

    async fn is_sell_phase_complete(&self, run_id: Uuid) -> Result<bool, RunStoreError>;

    /// Flips the run from SELL_PHASE to BUY_PHASE exactly once. Returns
    /// `true` only for the caller that won the transition.
    async fn transition_to_buy_phase(&self, run_id: Uuid) -> Result<bool, RunStoreError>;

    async fn get_pending_buy_trades(&self, run_id: Uuid) -> Result<Vec<TradeMessage>, RunStoreError>;

    async fn mark_buy_trades_pending(&self, run_id: Uuid) -> Result<(), RunStoreError>;

    async fn check_equity_circuit_breaker(
        &self,
        run_id: Uuid,
        proposed_buy_value: Decimal,
    ) -> Result<CircuitBreakerCheck, RunStoreError>;

    async fn record_buy_succeeded_value(&self, run_id: Uuid, value: Decimal) -> Result<(), RunStoreError>;

    async fn update_run_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), RunStoreError>;

    /// Finalizes a run once every trade has reached a terminal state.
    /// Returns `false` if the run was already terminal.
    async fn mark_run_completed(&self, run_id: Uuid) -> Result<bool, RunStoreError>;

    async fn find_stuck_runs(&self, max_age_minutes: i64) -> Result<Vec<RunRecord>, RunStoreError>;
}

pub struct SqliteRunStore {
    pool: AnyPool,
}

impl SqliteRunStore {
    pub async fn connect(database_url: &str) -> Result<Self, RunStoreError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(5).connect(database_url).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), RunStoreError> {
        for statement in include_str!("schema.sql").split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn fetch_run_row(&self, run_id: Uuid) -> Result<Option<RunRow>, RunStoreError> {
        let row = sqlx::query_as::<_, RunRow>("SELECT * FROM runs WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn trade_ids_for(&self, run_id: Uuid) -> Result<Vec<Uuid>, RunStoreError> {
        let rows: Vec<AnyRow> = sqlx::query("SELECT trade_id FROM trades WHERE run_id = ? ORDER BY sequence_number")
            .bind(run_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.try_get::<String, _>("trade_id").ok())
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect())
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn create_run(
        &self,
        run_id: Uuid,
        correlation_id: Uuid,
        trades: &[TradeMessage],
        max_equity_limit_usd: Decimal,
    ) -> Result<(), RunStoreError> {
        let sell_total = trades.iter().filter(|t| t.phase == Phase::Sell).count() as i64;
        let buy_total = trades.len() as i64 - sell_total;
        let now = Utc::now();
        let expires_at = now + Duration::hours(RUN_TTL_HOURS);

        // BUY trade bodies are held here, not yet in the trades table's
        // per-symbol rows, until the SELL phase clears; see
        // `get_pending_buy_trades`/`mark_buy_trades_pending`.
        let pending_buy: Vec<&TradeMessage> = trades.iter().filter(|t| t.phase == Phase::Buy).collect();
        let pending_buy_json = serde_json::to_string(&pending_buy).unwrap_or_else(|_| "[]".to_string());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO runs (run_id, correlation_id, total_trades, completed_trades, succeeded_trades, \
             failed_trades, sell_total, sell_completed, buy_total, buy_completed, sell_failed_amount, \
             sell_succeeded_amount, max_equity_limit_usd, cumulative_buy_succeeded_value, current_phase, \
             status, created_at, updated_at, expires_at, pending_buy_messages, buy_trades_pending) \
             VALUES (?, ?, ?, 0, 0, 0, ?, 0, ?, 0, 0, 0, ?, 0, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(run_id.to_string())
        .bind(correlation_id.to_string())
        .bind(trades.len() as i64)
        .bind(sell_total)
        .bind(buy_total)
        .bind(max_equity_limit_usd.to_f64().unwrap_or(0.0))
        .bind(to_phase_str(Phase::Sell))
        .bind(to_run_status_str(if sell_total > 0 { RunStatus::SellPhase } else { RunStatus::BuyPhase }))
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .bind(pending_buy_json)
        .execute(&mut *tx)
        .await?;

        for (idx, trade) in trades.iter().enumerate() {
            sqlx::query(
                "INSERT INTO trades (run_id, trade_id, symbol, phase, sequence_number, trade_amount, status, \
                 order_id, error_message, execution_data, created_at, started_at, completed_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, ?, NULL, NULL)",
            )
            .bind(run_id.to_string())
            .bind(trade.trade_id.to_string())
            .bind(&trade.symbol)
            .bind(to_phase_str(trade.phase))
            .bind(idx as i64)
            .bind(trade.trade_amount.to_f64().unwrap_or(0.0))
            .bind(to_trade_status_str(TradeStatus::Pending))
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<RunRecord>, RunStoreError> {
        let Some(row) = self.fetch_run_row(run_id).await? else {
            return Ok(None);
        };
        let trade_ids = self.trade_ids_for(run_id).await?;
        Ok(Some(row.into_record(trade_ids)))
    }

    async fn get_trade(&self, run_id: Uuid, trade_id: Uuid) -> Result<Option<TradeRecord>, RunStoreError> {
        let row = sqlx::query_as::<_, TradeRow>("SELECT * FROM trades WHERE run_id = ? AND trade_id = ?")
            .bind(run_id.to_string())
            .bind(trade_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.into_record(run_id)))
    }

    async fn mark_trade_started(&self, run_id: Uuid, trade_id: Uuid) -> Result<bool, RunStoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE trades SET status = ?, started_at = ? WHERE run_id = ? AND trade_id = ? AND status = ?",
        )
        .bind(to_trade_status_str(TradeStatus::Running))
        .bind(now)
        .bind(run_id.to_string())
        .bind(trade_id.to_string())
        .bind(to_trade_status_str(TradeStatus::Pending))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_trade_completed(
        &self,
        run_id: Uuid,
        trade_id: Uuid,
        trade_amount: Decimal,
        phase: Phase,
        outcome: TradeCompletion,
    ) -> Result<TradeCompletionResult, RunStoreError> {
        let existing = self.get_trade(run_id, trade_id).await?.ok_or_else(|| RunStoreError::RunNotFound(run_id.to_string()))?;
        if existing.status.is_terminal() {
            let run = self.get_run(run_id).await?.ok_or_else(|| RunStoreError::RunNotFound(run_id.to_string()))?;
            return Ok(TradeCompletionResult {
                already_completed: true,
                sell_completed: run.sell_completed,
                sell_total: run.sell_total,
                buy_completed: run.buy_completed,
                buy_total: run.buy_total,
                sell_phase_complete: run.sell_phase_complete(),
            });
        }

        let now = Utc::now().to_rfc3339();
        let status = if outcome.success { TradeStatus::Completed } else { TradeStatus::Failed };
        let execution_data_json = outcome
            .execution_data
            .as_ref()
            .map(|d| serde_json::to_string(d).unwrap_or_default());

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE trades SET status = ?, order_id = ?, error_message = ?, execution_data = ?, completed_at = ? \
             WHERE run_id = ? AND trade_id = ? AND status = ?",
        )
        .bind(to_trade_status_str(status))
        .bind(&outcome.order_id)
        .bind(&outcome.error_message)
        .bind(execution_data_json)
        .bind(&now)
        .bind(run_id.to_string())
        .bind(trade_id.to_string())
        .bind(to_trade_status_str(TradeStatus::Running))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RunStoreError::ConditionalWriteLost(run_id.to_string()));
        }

        let phase_completed_col = match phase {
            Phase::Sell => "sell_completed",
            Phase::Buy => "buy_completed",
        };

        let mut update = format!(
            "UPDATE runs SET completed_trades = completed_trades + 1, {phase_completed_col} = {phase_completed_col} + 1, updated_at = ?"
        );
        let mut bind_amount = false;
        if phase == Phase::Sell {
            let amount_col = if outcome.success { "sell_succeeded_amount" } else { "sell_failed_amount" };
            update.push_str(&format!(", {amount_col} = {amount_col} + ?"));
            bind_amount = true;
        } else if phase == Phase::Buy && outcome.success {
            update.push_str(", cumulative_buy_succeeded_value = cumulative_buy_succeeded_value + ?");
            bind_amount = true;
        }
        if outcome.success {
            update.push_str(", succeeded_trades = succeeded_trades + 1");
        } else {
            update.push_str(", failed_trades = failed_trades + 1");
        }
        update.push_str(" WHERE run_id = ?");

        let mut q = sqlx::query(&update).bind(&now);
        if bind_amount {
            q = q.bind(trade_amount.to_f64().unwrap_or(0.0));
        }
        q = q.bind(run_id.to_string());
        q.execute(&mut *tx).await?;

        tx.commit().await?;

        let run = self.get_run(run_id).await?.ok_or_else(|| RunStoreError::RunNotFound(run_id.to_string()))?;
        Ok(TradeCompletionResult {
            already_completed: false,
            sell_completed: run.sell_completed,
            sell_total: run.sell_total,
            buy_completed: run.buy_completed,
            buy_total: run.buy_total,
            sell_phase_complete: run.sell_phase_complete(),
        })
    }

    async fn is_sell_phase_complete(&self, run_id: Uuid) -> Result<bool, RunStoreError> {
        let run = self.get_run(run_id).await?.ok_or_else(|| RunStoreError::RunNotFound(run_id.to_string()))?;
        Ok(run.sell_phase_complete())
    }

    async fn transition_to_buy_phase(&self, run_id: Uuid) -> Result<bool, RunStoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE runs SET current_phase = ?, status = ?, updated_at = ? WHERE run_id = ? AND current_phase = ?",
        )
        .bind(to_phase_str(Phase::Buy))
        .bind(to_run_status_str(RunStatus::BuyPhase))
        .bind(now)
        .bind(run_id.to_string())
        .bind(to_phase_str(Phase::Sell))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_pending_buy_trades(&self, run_id: Uuid) -> Result<Vec<TradeMessage>, RunStoreError> {
        let run = self.get_run(run_id).await?.ok_or_else(|| RunStoreError::RunNotFound(run_id.to_string()))?;
        Ok(run.pending_buy_messages)
    }

    /// Clears the held BUY message bodies and flips the once-only flag that
    /// tells the reconciliation sweep these trades have already been handed
    /// to the queue.
    async fn mark_buy_trades_pending(&self, run_id: Uuid) -> Result<(), RunStoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE runs SET buy_trades_pending = 1, pending_buy_messages = '[]', updated_at = ? \
             WHERE run_id = ? AND buy_trades_pending = 0",
        )
        .bind(now)
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn check_equity_circuit_breaker(
        &self,
        run_id: Uuid,
        proposed_buy_value: Decimal,
    ) -> Result<CircuitBreakerCheck, RunStoreError> {
        let run = self.get_run(run_id).await?.ok_or_else(|| RunStoreError::RunNotFound(run_id.to_string()))?;
        let projected = run.cumulative_buy_succeeded_value + proposed_buy_value;
        let allowed = projected <= run.max_equity_limit_usd;
        let headroom = (run.max_equity_limit_usd - run.cumulative_buy_succeeded_value).max(Decimal::ZERO);
        Ok(CircuitBreakerCheck { allowed, headroom })
    }

    async fn record_buy_succeeded_value(&self, run_id: Uuid, value: Decimal) -> Result<(), RunStoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE runs SET cumulative_buy_succeeded_value = cumulative_buy_succeeded_value + ?, updated_at = ? \
             WHERE run_id = ?",
        )
        .bind(value.to_f64().unwrap_or(0.0))
        .bind(now)
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_run_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), RunStoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE runs SET status = ?, updated_at = ? WHERE run_id = ?")
            .bind(to_run_status_str(status))
            .bind(now)
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RunStoreError::RunNotFound(run_id.to_string()));
        }
        Ok(())
    }

    async fn mark_run_completed(&self, run_id: Uuid) -> Result<bool, RunStoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE runs SET status = ?, updated_at = ? WHERE run_id = ? AND status != ? AND status != ?",
        )
        .bind(to_run_status_str(RunStatus::Completed))
        .bind(now)
        .bind(run_id.to_string())
        .bind(to_run_status_str(RunStatus::Completed))
        .bind(to_run_status_str(RunStatus::Failed))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_stuck_runs(&self, max_age_minutes: i64) -> Result<Vec<RunRecord>, RunStoreError> {
        let cutoff: DateTime<Utc> = Utc::now() - Duration::minutes(max_age_minutes);
        let rows = sqlx::query_as::<_, RunRow>(
            "SELECT * FROM runs WHERE status IN (?, ?) ORDER BY updated_at ASC",
        )
        .bind(to_run_status_str(RunStatus::SellPhase))
        .bind(to_run_status_str(RunStatus::BuyPhase))
        .fetch_all(&self.pool)
        .await?;

        let mut stuck = Vec::new();
        for row in rows {
            if parse_dt(&row.updated_at) < cutoff {
                let run_id = Uuid::parse_str(&row.run_id).unwrap_or_default();
                let trade_ids = self.trade_ids_for(run_id).await?;
                stuck.push(row.into_record(trade_ids));
            }
        }
        Ok(stuck)
    }
}

/// Persistence for time-aware strategy state, separate from `RunStore`
/// because its unit of optimistic concurrency (`version`) and access pattern
/// (per-tick upsert keyed on a single execution id) don't fit the run/trade
/// conditional-write shapes above.
#[async_trait]
pub trait PendingExecutionStore: Send + Sync {
    async fn create_pending_execution(&self, execution: &PendingExecution) -> Result<(), RunStoreError>;

    async fn get_pending_execution(&self, execution_id: Uuid) -> Result<Option<PendingExecution>, RunStoreError>;

    async fn list_active_pending_executions(&self) -> Result<Vec<PendingExecution>, RunStoreError>;

    /// Persists `execution` iff its stored `version` still equals
    /// `expected_version`, bumping the version by one. Returns `false` on a
    /// version mismatch (the tick that lost the race should skip this cycle).
    async fn save_pending_execution(
        &self,
        execution: &PendingExecution,
        expected_version: i64,
    ) -> Result<bool, RunStoreError>;
}

#[async_trait]
impl PendingExecutionStore for SqliteRunStore {
    async fn create_pending_execution(&self, execution: &PendingExecution) -> Result<(), RunStoreError> {
        let child_orders_json = serde_json::to_string(&execution.child_orders).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            "INSERT INTO pending_executions (execution_id, symbol, side, target_qty, filled_qty, avg_fill_price, \
             state, current_phase, urgency_score, child_orders, policy_id, version, notes, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(execution.execution_id.to_string())
        .bind(&execution.symbol)
        .bind(to_side_str(execution.side))
        .bind(execution.target_qty.to_f64().unwrap_or(0.0))
        .bind(execution.filled_qty.to_f64().unwrap_or(0.0))
        .bind(execution.avg_fill_price.and_then(|p| p.to_f64()))
        .bind(to_execution_state_str(execution.state))
        .bind(to_execution_phase_str(execution.current_phase))
        .bind(execution.urgency_score.to_f64().unwrap_or(0.0))
        .bind(child_orders_json)
        .bind(&execution.policy_id)
        .bind(execution.version)
        .bind(&execution.notes)
        .bind(execution.created_at.to_rfc3339())
        .bind(execution.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_pending_execution(&self, execution_id: Uuid) -> Result<Option<PendingExecution>, RunStoreError> {
        let row = sqlx::query_as::<_, PendingExecutionRow>("SELECT * FROM pending_executions WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(PendingExecutionRow::into_record))
    }

    async fn list_active_pending_executions(&self) -> Result<Vec<PendingExecution>, RunStoreError> {
        let rows = sqlx::query_as::<_, PendingExecutionRow>(
            "SELECT * FROM pending_executions WHERE state IN ('PENDING', 'ACTIVE') ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PendingExecutionRow::into_record).collect())
    }

    async fn save_pending_execution(
        &self,
        execution: &PendingExecution,
        expected_version: i64,
    ) -> Result<bool, RunStoreError> {
        let child_orders_json = serde_json::to_string(&execution.child_orders).unwrap_or_else(|_| "[]".to_string());
        let result = sqlx::query(
            "UPDATE pending_executions SET filled_qty = ?, avg_fill_price = ?, state = ?, current_phase = ?, \
             urgency_score = ?, child_orders = ?, version = version + 1, notes = ?, updated_at = ? \
             WHERE execution_id = ? AND version = ?",
        )
        .bind(execution.filled_qty.to_f64().unwrap_or(0.0))
        .bind(execution.avg_fill_price.and_then(|p| p.to_f64()))
        .bind(to_execution_state_str(execution.state))
        .bind(to_execution_phase_str(execution.current_phase))
        .bind(execution.urgency_score.to_f64().unwrap_or(0.0))
        .bind(child_orders_json)
        .bind(&execution.notes)
        .bind(Utc::now().to_rfc3339())
        .bind(execution.execution_id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
