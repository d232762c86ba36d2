use crate::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Raw chunks pushed by the remote device over the notify channel
pub type NotifyStream = BoxStream<'static, Vec<u8>>;

/// Link-level operations a polling session needs from the radio link.
///
/// The production implementation is [`crate::Client`] on top of btleplug;
/// tests drive sessions through a scripted transport instead.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the link to the device
    async fn connect(&self) -> Result<()>;

    /// Tear the link down; never fails the caller's control flow
    async fn disconnect(&self) -> Result<()>;

    /// Subscribe to the notify channel and return its chunk stream.
    ///
    /// The stream ends when the link drops.
    async fn subscribe(&self) -> Result<NotifyStream>;

    /// Write one command to the write channel
    async fn write_command(&self, data: &[u8]) -> Result<()>;
}
