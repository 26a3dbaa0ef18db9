//! The client-facing response channel.
//!
//! A sink accepts exactly one response: [`ResponseSink::send`] consumes the
//! boxed sink, so a second write is unrepresentable. Whoever holds the box
//! owns the client connection; the engine gives it up when a handler hijacks.

use std::fmt;

use tokio::sync::oneshot;

use crate::body::ProxyBody;
use crate::error::ProxyError;

/// Where the response to one proxied request goes.
pub trait ResponseSink: Send {
    /// Write `response` (status, headers, streaming body) to the client.
    fn send(self: Box<Self>, response: http::Response<ProxyBody>) -> Result<(), ProxyError>;
}

/// A sink backed by a oneshot channel, read by the hyper service.
pub struct ChannelSink {
    tx: oneshot::Sender<http::Response<ProxyBody>>,
}

impl ChannelSink {
    /// Create a sink and the receiver the response will arrive on.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<http::Response<ProxyBody>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }
}

impl fmt::Debug for ChannelSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl ResponseSink for ChannelSink {
    fn send(self: Box<Self>, response: http::Response<ProxyBody>) -> Result<(), ProxyError> {
        self.tx.send(response).map_err(|_| ProxyError::SinkClosed)
    }
}
