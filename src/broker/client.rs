//! Alpaca REST client (market data v2 + trading v2).

use crate::broker::error::BrokerError;
use crate::broker::traits::{Brokerage, MarketDataProvider};
use crate::broker::types::*;
use crate::config::BrokerConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, instrument, warn};

const LIVE_TRADING_URL: &str = "https://api.alpaca.markets";
const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
const DATA_URL: &str = "https://data.alpaca.markets";

/// Maximum bars per page accepted by the bars endpoint.
const PAGE_LIMIT: u32 = 10_000;

/// Alpaca API client for both market data and trading.
pub struct AlpacaClient {
    http: Client,
    api_key: String,
    secret_key: String,
    trading_base_url: String,
    data_base_url: String,
    feed: String,
}

impl AlpacaClient {
    /// Create a new Alpaca client from configuration.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let default_trading = if config.paper {
            PAPER_TRADING_URL
        } else {
            LIVE_TRADING_URL
        };

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            trading_base_url: config
                .trading_url
                .clone()
                .unwrap_or_else(|| default_trading.to_string()),
            data_base_url: config
                .data_url
                .clone()
                .unwrap_or_else(|| DATA_URL.to_string()),
            feed: config.data_feed.clone(),
        })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
    }

    /// Pull the `message` field out of an error body, falling back to the status.
    async fn error_message(response: Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<AlpacaErrorBody>(&body) {
            Ok(parsed) if !parsed.message.is_empty() => format!("{status}: {}", parsed.message),
            _ => format!("{status}: {body}"),
        }
    }
}

#[async_trait]
impl MarketDataProvider for AlpacaClient {
    #[instrument(skip(self))]
    async fn get_bars(
        &self,
        symbol: &str,
        lookback_days: u32,
    ) -> Result<PriceSeries, BrokerError> {
        let url = format!("{}/v2/stocks/{}/bars", self.data_base_url, symbol);
        let end = Utc::now();
        let start = end - Duration::days(i64::from(lookback_days));
        let start = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = end.to_rfc3339_opts(SecondsFormat::Secs, true);
        let limit = PAGE_LIMIT.to_string();

        let mut bars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![
                ("timeframe", "1Hour"),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("limit", limit.as_str()),
                ("adjustment", "raw"),
                ("feed", self.feed.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                query.push(("page_token", token));
            }

            let response = self
                .authed(self.http.get(&url).query(&query))
                .send()
                .await
                .map_err(|e| BrokerError::data_unavailable(symbol, e.to_string()))?;

            if !response.status().is_success() {
                let reason = Self::error_message(response).await;
                return Err(BrokerError::data_unavailable(symbol, reason));
            }

            let page: AlpacaBarsResponse = response
                .json()
                .await
                .map_err(|e| BrokerError::data_unavailable(symbol, e.to_string()))?;

            bars.extend(page.bars.unwrap_or_default().into_iter().map(Bar::from));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        if bars.is_empty() {
            return Err(BrokerError::data_unavailable(symbol, "no bars returned"));
        }

        debug!(symbol, bars = bars.len(), "Fetched hourly bars");
        Ok(PriceSeries::new(symbol, bars))
    }

    #[instrument(skip(self))]
    async fn get_latest_quote(&self, symbol: &str) -> Result<Quote, BrokerError> {
        let url = format!("{}/v2/stocks/{}/quotes/latest", self.data_base_url, symbol);
        let response = self
            .authed(self.http.get(&url).query(&[("feed", self.feed.as_str())]))
            .send()
            .await
            .map_err(|e| BrokerError::data_unavailable(symbol, e.to_string()))?;

        if !response.status().is_success() {
            let reason = Self::error_message(response).await;
            return Err(BrokerError::data_unavailable(symbol, reason));
        }

        let latest: AlpacaLatestQuote = response
            .json()
            .await
            .map_err(|e| BrokerError::data_unavailable(symbol, e.to_string()))?;

        Ok(Quote {
            bid: latest.quote.bid_price,
            ask: latest.quote.ask_price,
        })
    }
}

#[async_trait]
impl Brokerage for AlpacaClient {
    #[instrument(skip(self))]
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, BrokerError> {
        let url = format!("{}/v2/positions/{}", self.trading_base_url, symbol);
        let response = self.authed(self.http.get(&url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(BrokerError::Decode(Self::error_message(response).await));
        }

        let position: AlpacaPosition = response
            .json()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))?;

        let current_price = position.current_price.unwrap_or(position.avg_entry_price);
        Ok(Some(Position {
            symbol: position.symbol,
            quantity: position.qty,
            avg_entry_price: position.avg_entry_price,
            current_price,
        }))
    }

    #[instrument(skip(self), fields(symbol = %order.symbol))]
    async fn submit_order(&self, order: &MarketOrder) -> Result<OrderAck, BrokerError> {
        let url = format!("{}/v2/orders", self.trading_base_url);
        let response = self.authed(self.http.post(&url).json(order)).send().await?;

        if !response.status().is_success() {
            let reason = Self::error_message(response).await;
            warn!(symbol = %order.symbol, %reason, "Order rejected by Alpaca");
            return Err(BrokerError::rejected(&order.symbol, reason));
        }

        let ack: AlpacaOrder = response
            .json()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))?;

        if ack.status == OrderStatus::Rejected {
            return Err(BrokerError::rejected(&order.symbol, "status rejected"));
        }

        Ok(OrderAck {
            id: ack.id,
            symbol: ack.symbol,
            side: ack.side,
            qty: ack.qty.unwrap_or(order.qty),
            status: ack.status,
            filled_avg_price: ack.filled_avg_price,
        })
    }
}
