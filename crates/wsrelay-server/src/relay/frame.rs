//! Transport-neutral view of a `WebSocket` leg.
//!
//! The client leg is an axum socket and the upstream leg a `tokio-tungstenite`
//! stream. Both are boxed into the same [`Leg`] shape so the session driver
//! never sees library message types.

use std::pin::Pin;

use axum::extract::ws::{Message as ClientMessage, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use wsrelay_core::Payload;

use super::close::CloseInfo;
use crate::error::{RelayError, Result};

/// Inbound frame from either leg.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Text or binary payload.
    Data(Payload),
    /// Close frame, `None` when it carried no status.
    Close(Option<CloseInfo>),
    /// Ping/pong and raw frames. The libraries answer pings themselves.
    Control,
}

/// Outbound frame to either leg.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Text or binary payload.
    Data(Payload),
    /// Close frame.
    Close(Option<CloseInfo>),
}

/// Boxed inbound half.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;
/// Boxed outbound half.
pub type FrameSink = Pin<Box<dyn Sink<Outbound, Error = RelayError> + Send>>;

/// One side of a relay session, split into halves.
pub struct Leg {
    /// Outbound half.
    pub sink: FrameSink,
    /// Inbound half.
    pub stream: FrameStream,
}

impl std::fmt::Debug for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leg").finish_non_exhaustive()
    }
}

impl Leg {
    /// Wrap an upgraded axum socket (the client leg).
    pub fn from_axum(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(|e| RelayError::Client(e.to_string()))
            .with(|out: Outbound| future::ready(Ok::<_, RelayError>(client_message(out))));
        let stream = stream.map(|item| {
            item.map(client_frame)
                .map_err(|e| RelayError::Client(e.to_string()))
        });
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Wrap a connected `tokio-tungstenite` stream (the upstream leg).
    pub fn from_tungstenite<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let sink = sink
            .sink_map_err(RelayError::from)
            .with(|out: Outbound| future::ready(Ok::<_, RelayError>(upstream_message(out))));
        let stream = stream.map(|item| item.map(upstream_frame).map_err(RelayError::from));
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

fn client_frame(msg: ClientMessage) -> Frame {
    match msg {
        ClientMessage::Text(text) => Frame::Data(Payload::Text(text.as_str().to_owned())),
        ClientMessage::Binary(bytes) => Frame::Data(Payload::Binary(bytes)),
        ClientMessage::Close(frame) => Frame::Close(frame.map(CloseInfo::from)),
        ClientMessage::Ping(_) | ClientMessage::Pong(_) => Frame::Control,
    }
}

fn client_message(out: Outbound) -> ClientMessage {
    match out {
        Outbound::Data(Payload::Text(text)) => ClientMessage::Text(text.into()),
        Outbound::Data(Payload::Binary(bytes)) => ClientMessage::Binary(bytes),
        Outbound::Close(info) => ClientMessage::Close(info.map(Into::into)),
    }
}

fn upstream_frame(msg: UpstreamMessage) -> Frame {
    match msg {
        UpstreamMessage::Text(text) => Frame::Data(Payload::Text(text.as_str().to_owned())),
        UpstreamMessage::Binary(bytes) => Frame::Data(Payload::Binary(bytes)),
        UpstreamMessage::Close(frame) => Frame::Close(frame.map(CloseInfo::from)),
        UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_) => {
            Frame::Control
        }
    }
}

fn upstream_message(out: Outbound) -> UpstreamMessage {
    match out {
        Outbound::Data(Payload::Text(text)) => UpstreamMessage::Text(text.into()),
        Outbound::Data(Payload::Binary(bytes)) => UpstreamMessage::Binary(bytes),
        Outbound::Close(info) => UpstreamMessage::Close(info.map(Into::into)),
    }
}
