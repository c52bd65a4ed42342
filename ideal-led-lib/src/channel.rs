//! Transport seam between the session and a platform BLE stack.
//!
//! The core never talks GATT directly. A [`DeviceChannel`] implementation owns scanning,
//! connecting, and the write/notify characteristics, and exposes them as raw byte I/O.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors reported by a [`DeviceChannel`] implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device disconnected")]
    Disconnected,

    /// The peripheral refused a write in the requested mode
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    #[error("Transport error: {0}")]
    Backend(String),
}

/// GATT write flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Wait for the link-layer confirmation
    WithResponse,
    /// Fire and forget
    WithoutResponse,
}

/// Raw byte channel to one controller
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    /// Scan for and connect to `address`. Implementations may wait indefinitely; the
    /// session bounds the wait.
    async fn connect(&self, address: &str) -> Result<(), ChannelError>;

    /// Write one encrypted packet to the command characteristic.
    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<(), ChannelError>;

    /// Wait for the next notification from the controller.
    async fn next_notification(&self) -> Result<Bytes, ChannelError>;

    async fn disconnect(&self) -> Result<(), ChannelError>;
}
