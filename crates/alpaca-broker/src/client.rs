use crate::models::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use broker_trait::{
    Broker, BrokerAccount, BrokerLimitOrderRequest, BrokerOrder, BrokerOrderRequest,
    BrokerOrderSide, BrokerPosition, BrokerQuote, NormalizedOrderStatus, OrderExecutionResult,
    TimeInForce as BrokerTimeInForce, WaitForCompletionResult,
};
use reqwest::{header, Client};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

pub struct AlpacaClient {
    client: Client,
    base_url: String,
    data_url: String,
    api_key: String,
    secret_key: String,
}

impl AlpacaClient {
    /// Create a new Alpaca client
    pub fn new(api_key: String, secret_key: String, base_url: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        let data_url = "https://data.alpaca.markets".to_string();

        Ok(Self {
            client,
            base_url,
            data_url,
            api_key,
            secret_key,
        })
    }

    /// Create client from environment variables.
    /// Accepts both APCA_API_KEY_ID / APCA_API_SECRET_KEY (standard Alpaca names)
    /// and ALPACA_API_KEY / ALPACA_SECRET_KEY as fallbacks.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("APCA_API_KEY_ID")
            .or_else(|_| std::env::var("ALPACA_API_KEY"))
            .map_err(|_| anyhow!("APCA_API_KEY_ID (or ALPACA_API_KEY) not set"))?;
        let secret_key = std::env::var("APCA_API_SECRET_KEY")
            .or_else(|_| std::env::var("ALPACA_SECRET_KEY"))
            .map_err(|_| anyhow!("APCA_API_SECRET_KEY (or ALPACA_SECRET_KEY) not set"))?;
        let base_url = std::env::var("ALPACA_BASE_URL")
            .unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string());

        Self::new(api_key, secret_key, base_url)
    }

    fn auth_headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "APCA-API-KEY-ID",
            header::HeaderValue::from_str(&self.api_key)
                .expect("API key contains invalid header characters"),
        );
        headers.insert(
            "APCA-API-SECRET-KEY",
            header::HeaderValue::from_str(&self.secret_key)
                .expect("Secret key contains invalid header characters"),
        );
        headers
    }

    pub async fn get_account(&self) -> Result<Account> {
        let url = format!("{}/v2/account", self.base_url);

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Alpaca API error: {}", error_text));
        }

        Ok(response.json::<Account>().await?)
    }

    pub async fn submit_order(&self, order: OrderRequest) -> Result<Order> {
        let url = format!("{}/v2/orders", self.base_url);

        tracing::info!("Submitting order to Alpaca: {:?}", order);

        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers())
            .json(&order)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Alpaca order failed: {}", error_text));
        }

        let order_response = response.json::<Order>().await?;
        tracing::info!("Order submitted successfully: {}", order_response.id);
        Ok(order_response)
    }

    pub async fn submit_market_order(&self, order: MarketOrderRequest) -> Result<Order> {
        self.submit_order(order.to_order_request()).await
    }

    pub async fn submit_limit_order(&self, order: LimitOrderRequest) -> Result<Order> {
        self.submit_order(order.to_order_request()).await
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Order> {
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to get order: {}", error_text));
        }

        Ok(response.json::<Order>().await?)
    }

    pub async fn get_orders(&self, limit: Option<usize>) -> Result<Vec<Order>> {
        let mut url = format!("{}/v2/orders?status=all", self.base_url);
        if let Some(lim) = limit {
            url.push_str(&format!("&limit={}", lim));
        }

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to get orders: {}", error_text));
        }

        Ok(response.json::<Vec<Order>>().await?)
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);

        let response = self
            .client
            .delete(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to cancel order: {}", error_text));
        }

        tracing::info!("Order {} canceled successfully", order_id);
        Ok(())
    }

    pub async fn get_positions(&self) -> Result<Vec<Position>> {
        let url = format!("{}/v2/positions", self.base_url);

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to get positions: {}", error_text));
        }

        Ok(response.json::<Vec<Position>>().await?)
    }

    pub async fn get_position(&self, symbol: &str) -> Result<Option<Position>> {
        let url = format!("{}/v2/positions/{}", self.base_url, symbol);

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to get position: {}", error_text));
        }

        Ok(Some(response.json::<Position>().await?))
    }

    pub async fn close_position(&self, symbol: &str) -> Result<Order> {
        let url = format!("{}/v2/positions/{}", self.base_url, symbol);

        let response = self
            .client
            .delete(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to close position: {}", error_text));
        }

        let order = response.json::<Order>().await?;
        tracing::info!("Position {} closed successfully", symbol);
        Ok(order)
    }

    pub async fn get_latest_quote(&self, symbol: &str) -> Result<Option<RawQuote>> {
        let url = format!("{}/v2/stocks/{}/quotes/latest", self.data_url, symbol);

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to get latest quote: {}", error_text));
        }

        let parsed = response.json::<LatestQuoteResponse>().await?;
        Ok(Some(parsed.quote))
    }

    pub async fn get_clock(&self) -> Result<Clock> {
        let url = format!("{}/v2/clock", self.base_url);

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to get clock: {}", error_text));
        }

        Ok(response.json::<Clock>().await?)
    }

    pub async fn is_trading_available(&self) -> Result<bool> {
        let account = self.get_account().await?;
        Ok(!account.trading_blocked && !account.account_blocked)
    }

    pub fn is_paper(&self) -> bool {
        self.base_url.contains("paper-api")
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Poll order status until a terminal state is reached or the wait budget
    /// is exhausted. Delay schedule tiers by total budget: short budgets poll
    /// quickly, long budgets back off to avoid hammering the API.
    async fn poll_until_terminal(&self, order_id: &str, max_wait_seconds: u64) -> Result<Order> {
        let delays: Vec<u64> = if max_wait_seconds <= 10 {
            vec![2, 3, 5]
        } else if max_wait_seconds <= 30 {
            vec![1, 2, 4, 8, 15]
        } else {
            vec![1, 2, 4, 8, 15, 15, 15]
        };

        let mut elapsed = 0u64;
        let mut last = self.get_order(order_id).await?;
        for delay in delays {
            if NormalizedOrderStatus::from_broker_str(&last.status).is_terminal() {
                return Ok(last);
            }
            if elapsed >= max_wait_seconds {
                break;
            }
            tokio::time::sleep(Duration::from_secs(delay)).await;
            elapsed += delay;
            last = self.get_order(order_id).await?;
        }
        Ok(last)
    }
}

// ---------------------------------------------------------------------------
// Conversion helpers: Alpaca types -> unified Broker types
// ---------------------------------------------------------------------------

fn account_to_broker(a: Account) -> BrokerAccount {
    BrokerAccount {
        id: a.id,
        account_number: a.account_number,
        status: a.status,
        currency: a.currency,
        cash: a.cash,
        buying_power: a.buying_power,
        portfolio_value: a.portfolio_value,
        equity: a.equity,
        pattern_day_trader: a.pattern_day_trader,
        trading_blocked: a.trading_blocked,
        daytrade_count: a.daytrade_count,
    }
}

fn position_to_broker(p: Position) -> BrokerPosition {
    BrokerPosition {
        symbol: p.symbol,
        qty: p.qty,
        side: p.side,
        avg_entry_price: p.avg_entry_price,
        market_value: p.market_value,
        cost_basis: p.cost_basis,
        unrealized_pl: p.unrealized_pl,
        unrealized_plpc: p.unrealized_plpc,
        unrealized_intraday_pl: p.unrealized_intraday_pl,
        current_price: p.current_price,
        lastday_price: p.lastday_price,
        change_today: p.change_today,
    }
}

fn order_to_broker(o: Order) -> BrokerOrder {
    BrokerOrder {
        id: o.id,
        client_order_id: o.client_order_id,
        created_at: o.created_at,
        filled_at: o.filled_at,
        symbol: o.symbol,
        qty: o.quantity,
        filled_qty: o.filled_quantity,
        filled_avg_price: o.filled_avg_price,
        order_type: o.order_type,
        side: o.side,
        status: o.status,
    }
}

fn time_in_force_to_alpaca(tif: BrokerTimeInForce) -> TimeInForce {
    match tif {
        BrokerTimeInForce::Day => TimeInForce::Day,
        BrokerTimeInForce::Cls => TimeInForce::Cls,
    }
}

#[async_trait]
impl Broker for AlpacaClient {
    async fn get_account(&self) -> Result<BrokerAccount> {
        self.get_account().await.map(account_to_broker)
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
        self.get_positions()
            .await
            .map(|ps| ps.into_iter().map(position_to_broker).collect())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>> {
        self.get_position(symbol)
            .await
            .map(|p| p.map(position_to_broker))
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Option<Decimal>> {
        let quote = self.get_latest_quote(symbol).await?;
        Ok(quote.and_then(|q| {
            let mid = (q.bid_price + q.ask_price) / 2.0;
            Decimal::from_str(&format!("{:.4}", mid)).ok()
        }))
    }

    async fn get_latest_quote(&self, symbol: &str) -> Result<Option<BrokerQuote>> {
        let raw = self.get_latest_quote(symbol).await?;
        Ok(raw.map(|q| BrokerQuote {
            symbol: symbol.to_string(),
            bid_price: Decimal::from_str(&format!("{:.4}", q.bid_price)).unwrap_or_default(),
            ask_price: Decimal::from_str(&format!("{:.4}", q.ask_price)).unwrap_or_default(),
            bid_size: Decimal::from_str(&format!("{:.0}", q.bid_size)).unwrap_or_default(),
            ask_size: Decimal::from_str(&format!("{:.0}", q.ask_size)).unwrap_or_default(),
            timestamp: q.timestamp,
        }))
    }

    async fn place_market_order(&self, order: BrokerOrderRequest) -> Result<BrokerOrder> {
        // `is_complete_exit` tells the caller's intent (liquidate the whole
        // position) but the qty has already been resolved by the caller, so
        // this still goes through the ordinary order endpoint rather than
        // `close_position`, which recomputes qty from the live position.
        let side = match order.side {
            BrokerOrderSide::Buy => OrderSide::Buy,
            BrokerOrderSide::Sell => OrderSide::Sell,
        };
        let alpaca_order = MarketOrderRequest {
            symbol: order.symbol,
            qty: order.qty,
            side,
            client_order_id: order.client_order_id,
        };
        self.submit_market_order(alpaca_order)
            .await
            .map(order_to_broker)
    }

    async fn place_limit_order(&self, order: BrokerLimitOrderRequest) -> Result<BrokerOrder> {
        let side = match order.side {
            BrokerOrderSide::Buy => OrderSide::Buy,
            BrokerOrderSide::Sell => OrderSide::Sell,
        };
        let alpaca_order = LimitOrderRequest {
            symbol: order.symbol,
            qty: order.qty,
            side,
            limit_price: order.limit_price,
            time_in_force: time_in_force_to_alpaca(order.time_in_force),
            client_order_id: order.client_order_id,
        };
        self.submit_limit_order(alpaca_order)
            .await
            .map(order_to_broker)
    }

    async fn get_order(&self, order_id: &str) -> Result<BrokerOrder> {
        self.get_order(order_id).await.map(order_to_broker)
    }

    async fn get_order_execution_result(&self, order_id: &str) -> Result<OrderExecutionResult> {
        let order = self.get_order(order_id).await?;
        let status = NormalizedOrderStatus::from_broker_str(&order.status);
        let filled_qty = order
            .filled_quantity
            .as_deref()
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or_default();
        let avg_fill_price = order
            .filled_avg_price
            .as_deref()
            .and_then(|s| Decimal::from_str(s).ok());
        let error_message = if status == NormalizedOrderStatus::Rejected {
            Some(format!("order {} rejected by broker", order_id))
        } else {
            None
        };
        Ok(OrderExecutionResult {
            status,
            filled_qty,
            avg_fill_price,
            error_message,
        })
    }

    async fn get_orders(&self, limit: Option<usize>) -> Result<Vec<BrokerOrder>> {
        self.get_orders(limit)
            .await
            .map(|os| os.into_iter().map(order_to_broker).collect())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.cancel_order(order_id).await
    }

    async fn wait_for_order_completion(
        &self,
        order_ids: &[String],
        max_wait_seconds: u64,
    ) -> Result<WaitForCompletionResult> {
        let mut completed = Vec::new();
        for order_id in order_ids {
            let order = self.poll_until_terminal(order_id, max_wait_seconds).await?;
            if NormalizedOrderStatus::from_broker_str(&order.status).is_terminal() {
                completed.push(order_id.clone());
            }
        }
        let timed_out = completed.len() < order_ids.len();
        Ok(WaitForCompletionResult {
            completed_order_ids: completed,
            timed_out,
        })
    }

    async fn close_position(&self, symbol: &str) -> Result<BrokerOrder> {
        self.close_position(symbol).await.map(order_to_broker)
    }

    async fn is_market_open(&self) -> Result<bool> {
        Ok(self.get_clock().await?.is_open)
    }

    fn is_paper(&self) -> bool {
        self.is_paper()
    }

    fn broker_name(&self) -> &str {
        "alpaca"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    #[ignore] // Only run with valid credentials
    async fn test_get_account() {
        let client = AlpacaClient::from_env().unwrap();
        let account = client.get_account().await.unwrap();

        println!("Account ID: {}", account.id);
        println!("Buying Power: ${}", account.buying_power);
        println!("Portfolio Value: ${}", account.portfolio_value);

        assert!(!account.id.is_empty());
    }

    #[tokio::test]
    #[ignore] // Only run with valid credentials
    async fn test_submit_market_order() {
        let client = AlpacaClient::from_env().unwrap();

        let order = MarketOrderRequest::buy("AAPL", dec!(1));
        let result = client.submit_market_order(order).await.unwrap();

        println!("Order submitted: {}", result.id);
        println!("Status: {}", result.status);

        client.cancel_order(&result.id).await.unwrap();
    }
}
