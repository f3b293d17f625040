use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use execution_types::{Quote, QuoteSource};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use std::str::FromStr;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::cache::StreamingQuoteCache;

const ALPACA_IEX_STREAM: &str = "wss://stream.data.alpaca.markets/v2/iex";

/// Owns the one websocket connection feeding the streaming quote cache.
/// Grounded in `alpaca-broker`'s `AlpacaWebSocket`: reconnect-with-backoff
/// loop, `tokio::select!` against a shutdown `Notify`, upserting on each
/// message instead of broadcasting it.
pub struct QuoteIngestionTask {
    api_key: String,
    api_secret: String,
    symbols: Vec<String>,
    cache: Arc<StreamingQuoteCache>,
    shutdown: Arc<tokio::sync::Notify>,
}

impl QuoteIngestionTask {
    pub fn new(api_key: String, api_secret: String, symbols: Vec<String>, cache: Arc<StreamingQuoteCache>) -> Self {
        Self { api_key, api_secret, symbols, cache, shutdown: Arc::new(tokio::sync::Notify::new()) }
    }

    pub fn shutdown_handle(&self) -> Arc<tokio::sync::Notify> {
        self.shutdown.clone()
    }

    pub async fn run(&self) {
        loop {
            match self.connect_and_stream().await {
                Ok(()) => {
                    tracing::info!("quote stream disconnected gracefully");
                    break;
                }
                Err(e) => {
                    tracing::warn!("quote stream error: {e}, reconnecting in 5s");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {},
                        _ = self.shutdown.notified() => {
                            tracing::info!("quote stream shutdown requested");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn connect_and_stream(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (ws_stream, _) = connect_async(ALPACA_IEX_STREAM).await?;
        let (mut write, mut read) = ws_stream.split();
        tracing::info!("connected to quote stream");

        let auth_msg = serde_json::json!({
            "action": "auth",
            "key": self.api_key,
            "secret": self.api_secret,
        });
        write.send(Message::Text(auth_msg.to_string())).await?;

        if let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => tracing::debug!("quote stream auth response: {text}"),
                Ok(_) => {}
                Err(e) => return Err(Box::new(e)),
            }
        }

        let sub_msg = serde_json::json!({
            "action": "subscribe",
            "quotes": self.symbols,
        });
        write.send(Message::Text(sub_msg.to_string())).await?;
        tracing::info!("subscribed to quotes for {} symbols", self.symbols.len());

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_message(&text),
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("quote stream connection closed");
                            return Ok(());
                        }
                        Some(Err(e)) => return Err(Box::new(e)),
                        _ => {}
                    }
                }
                _ = self.shutdown.notified() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    fn handle_message(&self, text: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
            return;
        };
        let entries: Vec<&serde_json::Value> = match &value {
            serde_json::Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        for entry in entries {
            if entry.get("T").and_then(|t| t.as_str()) != Some("q") {
                continue;
            }
            let Some(symbol) = entry.get("S").and_then(|s| s.as_str()) else {
                continue;
            };
            let bid_price = decimal_field(entry, "bp");
            let ask_price = decimal_field(entry, "ap");
            let bid_size = decimal_field(entry, "bs");
            let ask_size = decimal_field(entry, "as");

            self.cache.upsert(Quote {
                symbol: symbol.to_string(),
                bid_price,
                ask_price,
                bid_size,
                ask_size,
                timestamp: Utc::now(),
                source: QuoteSource::Streaming,
                had_zero_bid: false,
                had_zero_ask: false,
                is_stale: false,
            });
        }
    }
}

fn decimal_field(entry: &serde_json::Value, key: &str) -> Decimal {
    entry
        .get(key)
        .and_then(|v| v.as_f64())
        .and_then(|f| Decimal::from_str(&format!("{f:.4}")).ok())
        .unwrap_or_default()
}
