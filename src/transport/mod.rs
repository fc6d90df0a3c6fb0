//! Transport module for the link to the IR blaster
//!
//! [`Transport`] is the contract the bridge drives; [`BleTransport`] is the
//! Bluetooth LE implementation talking to the blaster's GATT service.

mod ble;
mod protocol;

use std::time::Duration;

use async_trait::async_trait;

pub use ble::BleTransport;

/// Callback fired from the transport's own listener when the link drops
pub type DisconnectHandler = Box<dyn Fn() + Send + Sync>;

/// Errors that can occur talking to the blaster
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected to IR blaster")]
    NotConnected,

    #[error("no saved code named {0:?}")]
    UnknownCommand(String),

    #[error("link not ready after {0:?} (encryption may not have completed)")]
    ReadyTimeout(Duration),

    #[error("no status notification within {0:?}")]
    StatusTimeout(Duration),

    #[error("device {0:?} not found")]
    DeviceNotFound(String),

    #[error("no bluetooth adapter available")]
    NoAdapter,

    #[error("characteristic {0} not found on device")]
    MissingCharacteristic(uuid::Uuid),

    #[error("malformed saved codes: {0}")]
    MalformedCodes(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
}

/// Operations the bridge needs from the link to the blaster
#[async_trait]
pub trait Transport: Send + Sync {
    /// Find and connect to the device. Returns true once connected.
    async fn connect(&self) -> bool;

    fn is_connected(&self) -> bool;

    async fn disconnect(&self);

    /// Wait until the link can carry reads and writes
    async fn wait_until_ready(&self, timeout: Duration) -> Result<(), TransportError>;

    /// Resolve `name` to a saved code, send it, and return the device status
    async fn send_command_by_name(&self, name: &str) -> Result<String, TransportError>;

    /// Arm the device to run `name` after `delay` unless heartbeats keep arriving
    async fn schedule_disconnect_command(
        &self,
        name: &str,
        delay: Duration,
    ) -> Result<(), TransportError>;

    /// Reset the device's auto-disconnect timer
    async fn send_heartbeat(&self) -> Result<(), TransportError>;

    /// Install the single disconnect callback, replacing any previous one
    fn set_disconnect_handler(&self, handler: Option<DisconnectHandler>);
}
