//! Streaming response and request payloads.
//!
//! A [`Body`] is either a finite, already-available byte sequence or a live
//! producer with push semantics: zero or more chunks, then exactly one end
//! signal, optionally preceded by an error.
//!
//! ```text
//! BodySender::write(chunk) ─┐
//! BodySender::write(chunk) ─┼──▶ Body (Stream<Item = Result<Bytes, BodyError>>)
//! BodySender::end(None)    ─┘
//! ```
//!
//! Chunks are delivered in emission order. Once the sender is consumed by
//! [`BodySender::end`] or [`BodySender::abort`] no further chunks can be
//! pushed.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::BodyError;

/// A boxed stream of body chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, BodyError>>;

/// A request or response payload.
pub struct Body {
    kind: Kind,
}

enum Kind {
    Empty,
    Full(Bytes),
    Stream(BodyStream),
}

impl Body {
    /// Creates an empty body.
    pub fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    /// Creates a body from an already available byte sequence.
    pub fn full(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            Self::empty()
        } else {
            Self {
                kind: Kind::Full(bytes),
            }
        }
    }

    /// Creates a body from an arbitrary chunk stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, BodyError>> + Send + 'static,
    {
        Self {
            kind: Kind::Stream(stream.boxed()),
        }
    }

    /// Creates a push-based body and the sender that feeds it.
    pub fn channel() -> (BodySender, Body) {
        let (tx, rx) = mpsc::unbounded_channel();
        let body = Self::from_stream(ChannelStream { rx, done: false });
        (BodySender { tx }, body)
    }

    /// Returns `true` when the body is a live producer.
    pub fn is_stream(&self) -> bool {
        matches!(self.kind, Kind::Stream(_))
    }

    /// Returns the exact length if the body is fully materialized.
    pub fn exact_len(&self) -> Option<u64> {
        match &self.kind {
            Kind::Empty => Some(0),
            Kind::Full(bytes) => Some(bytes.len() as u64),
            Kind::Stream(_) => None,
        }
    }

    /// Returns the bytes of a materialized body without consuming it.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.kind {
            Kind::Empty => Some(&[]),
            Kind::Full(bytes) => Some(bytes),
            Kind::Stream(_) => None,
        }
    }

    /// Converts the body into a chunk stream.
    pub fn into_stream(self) -> BodyStream {
        match self.kind {
            Kind::Stream(stream) => stream,
            kind => Self { kind }.boxed(),
        }
    }

    /// Reads the whole body into memory.
    ///
    /// Meant for small payloads and tests; streaming consumers should poll the
    /// body chunk by chunk instead.
    pub async fn collect(self) -> Result<Bytes, BodyError> {
        match self.kind {
            Kind::Empty => Ok(Bytes::new()),
            Kind::Full(bytes) => Ok(bytes),
            Kind::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Empty => f.write_str("Body(empty)"),
            Kind::Full(bytes) => write!(f, "Body(full, {} bytes)", bytes.len()),
            Kind::Stream(_) => f.write_str("Body(stream)"),
        }
    }
}

impl Stream for Body {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match &mut this.kind {
            Kind::Empty => Poll::Ready(None),
            Kind::Full(bytes) => {
                let bytes = std::mem::take(bytes);
                this.kind = Kind::Empty;
                Poll::Ready(Some(Ok(bytes)))
            }
            Kind::Stream(stream) => stream.poll_next_unpin(cx),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.kind {
            Kind::Empty => (0, Some(0)),
            Kind::Full(_) => (1, Some(1)),
            Kind::Stream(stream) => stream.size_hint(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::full(bytes)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::full(s)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::full(Bytes::from_static(s.as_bytes()))
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Self::full(Bytes::from_static(bytes))
    }
}

// =============================================================================
// Push producer
// =============================================================================

enum Frame {
    Data(Bytes),
    End,
    Error(BodyError),
}

/// The producing half of a [`Body::channel`].
///
/// Writes never block and never short-read; the consumer is fed in the order
/// chunks were written.
pub struct BodySender {
    tx: mpsc::UnboundedSender<Frame>,
}

impl BodySender {
    /// Pushes a chunk and returns the number of bytes consumed, which is
    /// always the chunk length.
    pub fn write(&self, chunk: impl Into<Bytes>) -> usize {
        let chunk = chunk.into();
        let len = chunk.len();
        if len > 0 && self.tx.send(Frame::Data(chunk)).is_err() {
            trace!(len, "body consumer gone, discarding chunk");
        }
        len
    }

    /// Sends an optional final chunk followed by the end signal.
    pub fn end(self, last: Option<Bytes>) {
        if let Some(chunk) = last {
            self.write(chunk);
        }
        let _ = self.tx.send(Frame::End);
    }

    /// Propagates an error to the consumer and terminates the body.
    pub fn abort(self, err: BodyError) {
        let _ = self.tx.send(Frame::Error(err));
    }

    /// Returns `true` if the consuming side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for BodySender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodySender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct ChannelStream {
    rx: mpsc::UnboundedReceiver<Frame>,
    done: bool,
}

impl Stream for ChannelStream {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Frame::Data(bytes))) => Poll::Ready(Some(Ok(bytes))),
            Poll::Ready(Some(Frame::End)) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Frame::Error(err))) => {
                self.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(Some(Err(BodyError::Aborted)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_body_collects() {
        let body = Body::from("hello");
        assert_eq!(body.exact_len(), Some(5));
        assert!(!body.is_stream());
        assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_channel_preserves_order() {
        let (tx, body) = Body::channel();
        assert_eq!(tx.write("ab"), 2);
        assert_eq!(tx.write(Bytes::new()), 0);
        assert_eq!(tx.write("cd"), 2);
        tx.end(Some(Bytes::from_static(b"ef")));

        assert!(body.is_stream());
        assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"abcdef"));
    }

    #[tokio::test]
    async fn test_channel_error_terminates() {
        let (tx, mut body) = Body::channel();
        tx.write("x");
        tx.abort(BodyError::custom("boom"));

        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"x"));
        assert!(matches!(body.next().await, Some(Err(BodyError::Custom(_)))));
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_sender_is_aborted() {
        let (tx, body) = Body::channel();
        tx.write("partial");
        drop(tx);

        assert!(matches!(body.collect().await, Err(BodyError::Aborted)));
    }

    #[test]
    fn test_write_after_consumer_dropped() {
        let (tx, body) = Body::channel();
        drop(body);
        assert!(tx.is_closed());
        assert_eq!(tx.write("still counted"), 13);
    }
}
