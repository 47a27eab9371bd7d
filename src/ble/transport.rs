//! The wireless transport boundary.
//!
//! The firmware core never talks to a radio directly. It declares its
//! channels, starts the service and advertising once, and afterwards only
//! asks whether a peer is connected and pushes values.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// Handle to a channel created on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub usize);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}

/// What a peer may do with a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Peer subscribes and receives pushed values.
    Notify,
    /// Peer writes values to the device.
    Write,
}

/// A peripheral-side wireless stack.
///
/// Channels must be created before [`start_service`](Self::start_service).
/// `notify` on a channel with no subscribed peer is not an error; the value
/// is simply not delivered.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WirelessTransport: Send {
    /// Declare a notify-capable channel.
    fn create_notify_channel(&mut self, uuid: Uuid) -> Result<ChannelId>;

    /// Declare a write-capable channel.
    fn create_write_channel(&mut self, uuid: Uuid) -> Result<ChannelId>;

    /// Publish the declared channels.
    async fn start_service(&mut self) -> Result<()>;

    /// Start advertising the device.
    async fn start_advertising(&mut self) -> Result<()>;

    /// Whether a peer is currently connected.
    fn is_device_connected(&self) -> bool;

    /// Replace the value held by a channel.
    fn set_value(&mut self, channel: ChannelId, value: &[u8]) -> Result<()>;

    /// Push the channel's current value to the subscribed peer.
    async fn notify(&mut self, channel: ChannelId) -> Result<()>;
}
