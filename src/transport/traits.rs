//! Transport trait abstraction for pluggable frame streams

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

/// An inbound-only stream of binary frames
#[async_trait]
pub trait FrameStream: Send + 'static {
    /// Wait for the next binary frame.
    ///
    /// Returns `None` once the peer has closed the stream. Non-binary
    /// messages are consumed silently.
    async fn next_frame(&mut self) -> Option<Result<Bytes>>;

    /// Close the stream gracefully
    async fn shutdown(&mut self) -> Result<()>;
}

/// Factory for creating frame streams
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// The stream type this connector produces
    type Stream: FrameStream;

    /// Attempt to connect to `url`, returning a stream on success
    async fn connect(&self, url: &Url) -> Result<Self::Stream>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
