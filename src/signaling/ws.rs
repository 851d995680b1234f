use super::events::RelayFrame;
use super::{RelayConnector, RelayLink};
use crate::error::SignalingError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// WebSocket-транспорт: каждый кадр relay идёт JSON в текстовом сообщении
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl RelayConnector for WsConnector {
    async fn open(&self) -> Result<RelayLink, SignalingError> {
        debug!(url = %self.url, "opening relay websocket");
        let (ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SignalingError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let (outbound, mut out_rx) = mpsc::unbounded_channel::<RelayFrame>();
        let (in_tx, inbound) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(event = %frame.event, "dropping unencodable frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("relay websocket write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("relay websocket writer finished");
        });

        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match RelayFrame::decode(&text) {
                        Ok(frame) => {
                            if in_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("ignoring malformed relay frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("relay websocket read failed: {}", e);
                        break;
                    }
                }
            }
            debug!("relay websocket reader finished");
        });

        Ok(RelayLink { outbound, inbound })
    }
}
