//! The WebSocket transport task, grounded on the teacher's `WormholeIO` /
//! `ws_connector` in `core/io.rs`: a boxed `Sink`/`FusedStream` pair hides
//! `async-tungstenite` behind two small, protocol-agnostic types so the rest
//! of the crate never names a websocket crate directly.

use std::pin::Pin;

use async_tungstenite::tungstenite as ws;
use futures::sink::{Sink, SinkExt};
use futures::stream::{FusedStream, StreamExt, TryStreamExt};

use crate::error::RelayError;
use url::Url;

/// One inbound occurrence from the socket: a text frame, or the socket
/// having gone away. Matches the teacher's `IOEvent` split.
#[derive(Debug)]
pub(crate) enum IoEvent {
    MessageReceived(String),
    ConnectionLost,
}

pub(crate) type WsWriter = Pin<Box<dyn Sink<String, Error = RelayError> + Send>>;
pub(crate) type WsReader = Pin<Box<dyn FusedStream<Item = IoEvent> + Send>>;

/// Open a websocket to `url` and split it into a writer that accepts text
/// frames and a reader that yields [`IoEvent`]s. Binary frames are a
/// protocol violation here (the wire is JSON-text only) and are dropped
/// with a warning rather than torn down as an error, the same way pings
/// that need no reply are dropped.
pub(crate) async fn connect(url: &Url) -> Result<(WsWriter, WsReader), RelayError> {
    let (ws_stream, _response) = async_tungstenite::async_std::connect_async(url.as_str())
        .await
        .map_err(|e| RelayError::WebSocket(e.to_string()))?;
    let (write, read) = ws_stream.split();

    let reader = read
        .map_err(|e| RelayError::WebSocket(e.to_string()))
        .try_filter_map(|message| async move {
            match message {
                ws::Message::Text(text) => Ok(Some(IoEvent::MessageReceived(text))),
                ws::Message::Close(_) => Ok(Some(IoEvent::ConnectionLost)),
                ws::Message::Ping(_) | ws::Message::Pong(_) => Ok(None),
                ws::Message::Binary(_) => {
                    tracing::warn!("dropping unexpected binary websocket frame");
                    Ok(None)
                },
                ws::Message::Frame(_) => Ok(None),
            }
        })
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "websocket read error, treating as connection loss");
            IoEvent::ConnectionLost
        });

    let writer = write
        .sink_map_err(|e| RelayError::WebSocket(e.to_string()))
        .with(|text: String| async move { Ok(ws::Message::Text(text)) });

    Ok((Box::pin(writer), Box::pin(reader.fuse())))
}
