//! Transport seam between a client actor and its socket.
//!
//! The client pumps only see [`Frame`]s through a [`Connection`]; production
//! wraps an axum [`WebSocket`], tests plug in an in-memory pair.

use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures::{Sink, Stream};

use super::message::OutboundFrame;

/// One transport-level frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text, normally an encoded envelope.
    Text(OutboundFrame),
    /// Binary data. Ignored inbound, never produced by the server.
    Binary(Bytes),
    /// Transport keepalive.
    Ping(Bytes),
    /// Reply to a transport ping.
    Pong(Bytes),
    /// Close handshake.
    Close,
}

/// Failure on a client connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The peer went away or the socket is already closed.
    #[error("connection closed")]
    Closed,
    /// Nothing arrived within the read deadline.
    #[error("no frame received within {0:?}")]
    ReadTimeout(Duration),
    /// A single write exceeded the write deadline.
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
    /// Socket-level error.
    #[error("transport error: {0}")]
    Transport(#[from] axum::Error),
}

/// A full-duplex frame transport.
pub trait Connection:
    Stream<Item = Result<Frame, ConnectionError>> + Sink<Frame, Error = ConnectionError> + Send + 'static
{
}

impl<T> Connection for T where
    T: Stream<Item = Result<Frame, ConnectionError>>
        + Sink<Frame, Error = ConnectionError>
        + Send
        + 'static
{
}

/// [`Connection`] over an upgraded axum socket.
pub struct AxumConnection(WebSocket);

impl AxumConnection {
    /// Wrap an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        Self(socket)
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Self::Text(OutboundFrame::from(text.as_str())),
            Message::Binary(data) => Self::Binary(data),
            Message::Ping(data) => Self::Ping(data),
            Message::Pong(data) => Self::Pong(data),
            Message::Close(_) => Self::Close,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Self::Text(Utf8Bytes::from(&*text)),
            Frame::Binary(data) => Self::Binary(data),
            Frame::Ping(data) => Self::Ping(data),
            Frame::Pong(data) => Self::Pong(data),
            Frame::Close => Self::Close(None),
        }
    }
}

impl Stream for AxumConnection {
    type Item = Result<Frame, ConnectionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let next = ready!(Pin::new(&mut self.0).poll_next(cx));
        Poll::Ready(next.map(|result| result.map(Frame::from).map_err(ConnectionError::from)))
    }
}

impl Sink<Frame> for AxumConnection {
    type Error = ConnectionError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0).poll_ready(cx).map_err(ConnectionError::from)
    }

    fn start_send(mut self: Pin<&mut Self>, frame: Frame) -> Result<(), Self::Error> {
        Pin::new(&mut self.0)
            .start_send(Message::from(frame))
            .map_err(ConnectionError::from)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0).poll_flush(cx).map_err(ConnectionError::from)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.0).poll_close(cx).map_err(ConnectionError::from)
    }
}
