use crate::messages::{ChannelEvent, ClientEvent, Fragment, ServerEvent};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound half of the message channel
#[async_trait(?Send)]
pub trait Outbound {
    /// Send one captured audio fragment as a binary frame
    async fn send_audio(&mut self, fragment: Fragment) -> Result<()>;

    /// Send a control event as a JSON text frame
    async fn send_event(&mut self, event: ClientEvent) -> Result<()>;
}

/// Writer half of the websocket
pub struct WsWriter {
    sink: SplitSink<Socket, Message>,
}

#[async_trait(?Send)]
impl Outbound for WsWriter {
    async fn send_audio(&mut self, fragment: Fragment) -> Result<()> {
        self.sink
            .send(Message::Binary(fragment.as_bytes().to_vec().into()))
            .await
            .context("Failed to send audio fragment")
    }

    async fn send_event(&mut self, event: ClientEvent) -> Result<()> {
        let text = serde_json::to_string(&event).context("Failed to serialize client event")?;
        tracing::debug!("Sending {}", text);
        self.sink
            .send(Message::Text(text.into()))
            .await
            .context("Failed to send client event")
    }
}

/// Open the websocket and start reading server events
///
/// Events are delivered on the returned receiver; the last one is always
/// `ChannelEvent::Closed`.
pub async fn connect(url: &str) -> Result<(WsWriter, mpsc::Receiver<ChannelEvent>)> {
    let (socket, _response) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    tracing::info!("Connected to {}", url);

    let (sink, stream) = socket.split();
    let (event_tx, event_rx) = mpsc::channel(100);
    tokio::spawn(read_events(stream, event_tx));

    Ok((WsWriter { sink }, event_rx))
}

async fn read_events(mut stream: SplitStream<Socket>, tx: mpsc::Sender<ChannelEvent>) {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Websocket read failed: {}", e);
                break;
            }
        };

        match message {
            Message::Text(text) => {
                let Some(event) = parse_event(text.as_str()) else {
                    continue;
                };
                if tx.send(ChannelEvent::Server(event)).await.is_err() {
                    return;
                }
            }
            Message::Close(frame) => {
                tracing::info!("Server closed the connection: {:?}", frame);
                break;
            }
            Message::Binary(data) => {
                tracing::debug!("Ignoring {} byte binary frame", data.len());
            }
            _ => {}
        }
    }

    let _ = tx.send(ChannelEvent::Closed).await;
}

/// Parse one text frame, logging and dropping anything malformed
fn parse_event(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Ignoring malformed server message: {}", e);
            None
        }
    }
}
