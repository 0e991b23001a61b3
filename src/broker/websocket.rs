//! Alpaca real-time quote stream.

use crate::broker::error::BrokerError;
use crate::broker::traits::PriceFeed;
use crate::broker::types::{AlpacaStreamMessage, FeedEvent, Tick};
use crate::config::BrokerConfig;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

const STREAM_BASE_URL: &str = "wss://stream.data.alpaca.markets/v2";

/// Buffered ticks before the reader applies backpressure.
const CHANNEL_CAPACITY: usize = 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Quote stream client. One connection per subscription.
pub struct AlpacaQuoteStream {
    url: String,
    api_key: String,
    secret_key: String,
    writer: Mutex<Option<WsSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl AlpacaQuoteStream {
    pub fn new(config: &BrokerConfig) -> Self {
        let url = config
            .stream_url
            .clone()
            .unwrap_or_else(|| format!("{}/{}", STREAM_BASE_URL, config.data_feed));

        Self {
            url,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// Read control messages until `expected` is acknowledged.
    async fn await_success(read: &mut WsRead, expected: &str) -> Result<(), BrokerError> {
        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| BrokerError::StreamDisconnected(e.to_string()))?;
            let Message::Text(text) = msg else {
                continue;
            };
            let parsed: Vec<AlpacaStreamMessage> = serde_json::from_str(&text)
                .map_err(|e| BrokerError::Decode(e.to_string()))?;
            for message in parsed {
                match message {
                    AlpacaStreamMessage::Success { msg } if msg == expected => return Ok(()),
                    AlpacaStreamMessage::Error { code, msg } => {
                        return Err(BrokerError::StreamDisconnected(format!("{code}: {msg}")));
                    }
                    _ => {}
                }
            }
        }
        Err(BrokerError::StreamDisconnected(format!(
            "connection closed while waiting for '{expected}'"
        )))
    }

    /// Translate one text frame into feed events. Returns `false` once the
    /// server reports an error and the stream should stop.
    fn parse_frame(text: &str, events: &mut Vec<FeedEvent>) -> bool {
        let messages: Vec<AlpacaStreamMessage> = match serde_json::from_str(text) {
            Ok(messages) => messages,
            Err(e) => {
                debug!(error = %e, "Ignoring unparseable stream frame");
                return true;
            }
        };

        for message in messages {
            match message {
                AlpacaStreamMessage::Quote {
                    symbol,
                    bid_price,
                    ask_price,
                    timestamp,
                } => {
                    let price = if ask_price > Decimal::ZERO {
                        ask_price
                    } else {
                        bid_price
                    };
                    if price > Decimal::ZERO {
                        events.push(FeedEvent::Tick(Tick {
                            symbol,
                            price,
                            timestamp,
                        }));
                    }
                }
                AlpacaStreamMessage::Subscription { quotes } => {
                    info!(symbols = quotes.len(), "Quote subscription confirmed");
                    events.push(FeedEvent::Connected);
                }
                AlpacaStreamMessage::Error { code, msg } => {
                    error!(code, %msg, "Stream error");
                    events.push(FeedEvent::Disconnected(format!("{code}: {msg}")));
                    return false;
                }
                AlpacaStreamMessage::Success { .. } | AlpacaStreamMessage::Other => {}
            }
        }
        true
    }
}

#[async_trait]
impl PriceFeed for AlpacaQuoteStream {
    async fn subscribe(
        &self,
        symbols: Vec<String>,
    ) -> Result<mpsc::Receiver<FeedEvent>, BrokerError> {
        info!(url = %self.url, symbols = symbols.len(), "Connecting to quote stream");

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| BrokerError::StreamDisconnected(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        Self::await_success(&mut read, "connected").await?;

        let auth = serde_json::json!({
            "action": "auth",
            "key": self.api_key,
            "secret": self.secret_key,
        });
        write
            .send(Message::Text(auth.to_string().into()))
            .await
            .map_err(|e| BrokerError::StreamDisconnected(e.to_string()))?;
        Self::await_success(&mut read, "authenticated").await?;

        let subscribe = serde_json::json!({ "action": "subscribe", "quotes": symbols });
        write
            .send(Message::Text(subscribe.to_string().into()))
            .await
            .map_err(|e| BrokerError::StreamDisconnected(e.to_string()))?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let handle = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let keep_going = Self::parse_frame(&text, &mut events);
                        for event in events.drain(..) {
                            if tx.send(event).await.is_err() {
                                warn!("Tick receiver dropped");
                                return;
                            }
                        }
                        if !keep_going {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        info!(?frame, "Quote stream closed by server");
                        let _ = tx
                            .send(FeedEvent::Disconnected("closed by server".to_string()))
                            .await;
                        return;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        let _ = tx.send(FeedEvent::Disconnected(e.to_string())).await;
                        return;
                    }
                    _ => {}
                }
            }
            let _ = tx
                .send(FeedEvent::Disconnected("stream ended".to_string()))
                .await;
        });

        *self.writer.lock().await = Some(write);
        *self.reader.lock().await = Some(handle);
        Ok(rx)
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.send(Message::Close(None)).await {
                debug!(error = %e, "Close frame not delivered");
            }
        }
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        info!("Quote stream closed");
    }
}
