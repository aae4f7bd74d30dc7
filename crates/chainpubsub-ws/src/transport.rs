//! WebSocket connector built on `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use chainpubsub_core::error::PubSubError;
use chainpubsub_core::transport::{Connection, Connector, Outbound};

/// Opens one WebSocket per connect to a fixed `ws://` or `wss://` URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Connection, PubSubError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| PubSubError::connection(format!("connect to {}: {e}", self.url)))?;
        tracing::debug!(url = %self.url, "websocket handshake complete");

        let (sink, stream) = ws_stream.split();

        let sink = sink
            .sink_map_err(ws_error)
            .with(|frame: Outbound| future::ready(Ok::<_, PubSubError>(to_message(frame))));

        // Pings from the server are answered by tungstenite while reading.
        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.into_bytes())),
                Ok(Message::Binary(bytes)) => Some(Ok(bytes)),
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("closed by server: {} {}", f.code, f.reason))
                        .unwrap_or_else(|| "closed by server".to_string());
                    Some(Err(PubSubError::Connection(reason)))
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Err(e) => Some(Err(ws_error(e))),
            })
        });

        Ok(Connection::new(sink, stream))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

fn to_message(frame: Outbound) -> Message {
    match frame {
        Outbound::Text(text) => Message::Text(text),
        Outbound::Ping => Message::Ping(Vec::new()),
    }
}

fn ws_error(e: tungstenite::Error) -> PubSubError {
    PubSubError::Connection(e.to_string())
}
