//! Websocket transport over `tokio-tungstenite`.
//!
//! Ping and pong frames are answered by tungstenite itself and never reach
//! the stream.

use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use super::{Transport, WireMessage};
use crate::error::{Error, Result};
use crate::protocol::CloseInfo;

/// Dial a websocket server.
///
/// # Errors
///
/// [`Error::Transport`] if the connection or handshake fails.
pub async fn connect(url: &str) -> Result<Transport> {
    let (ws, response) = tokio_tungstenite::connect_async(url).await?;
    tracing::debug!("websocket connected to {} ({})", url, response.status());

    let (sink, stream) = ws.split();
    let sink = sink
        .sink_map_err(Error::from)
        .with(|msg: WireMessage| future::ready(Ok::<_, Error>(to_message(msg))));
    let stream = stream.filter_map(|item| {
        future::ready(match item {
            Ok(msg) => from_message(msg).map(Ok),
            Err(e) => Some(Err(Error::from(e))),
        })
    });

    Ok(Transport::new(sink, stream))
}

/// Convert an outbound frame to a tungstenite message.
pub fn to_message(msg: WireMessage) -> Message {
    match msg {
        WireMessage::Binary(bytes) => Message::Binary(bytes.to_vec()),
        WireMessage::Text(text) => Message::Text(text),
        WireMessage::Close(info) => Message::Close(info.map(|info| CloseFrame {
            code: CloseCode::from(info.code),
            reason: info.reason.into(),
        })),
    }
}

/// Convert an inbound tungstenite message, dropping control frames.
pub fn from_message(msg: Message) -> Option<WireMessage> {
    match msg {
        Message::Binary(data) => Some(WireMessage::Binary(data.into())),
        Message::Text(text) => Some(WireMessage::Text(text)),
        Message::Close(frame) => Some(WireMessage::Close(
            frame.map(|f| CloseInfo::new(u16::from(f.code), f.reason.into_owned())),
        )),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}
