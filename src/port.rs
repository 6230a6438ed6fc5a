//! Transport Contract
//!
//! Every backend (BLE, classic-Bluetooth accessory, TCP) implements
//! [`Port`]. Callers open a logical channel, write command bytes and
//! read one terminator-framed response; per-transport plumbing stays
//! behind this contract. Operations only some backends support carry
//! defaults so the others report `Unsupported` instead of pretending.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::ble::device_info::BleDeviceInfo;
use crate::ble::radio::{DeviceId, WriteMode};
use crate::ble::scan::ScannedDevice;
use crate::ble::subscription::SubscriptionKind;
use crate::error::ConnectError;

/// Which backend a connection context uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Bluetooth,
    Ble,
}

/// Connection state of a transport instance. Exactly one per active
/// transport; `Connecting` is held exclusively: a second open while
/// connecting is rejected, not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Where a transport should connect.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// Colon-delimited descriptor: accepted protocol-name prefixes for
    /// classic Bluetooth, or a `host:port` pair for TCP.
    Name(String),
    /// A peripheral discovered by a previous BLE scan.
    Device(DeviceId),
}

impl Endpoint {
    pub fn describe(&self) -> String {
        match self {
            Endpoint::Name(name) => name.clone(),
            Endpoint::Device(id) => id.to_string(),
        }
    }
}

/// Invoked when the device-side link drops.
pub type DisconnectCallback = Box<dyn Fn() + Send + Sync>;
/// Invoked when the radio itself becomes unusable.
pub type RadioUnavailableCallback = Box<dyn Fn() + Send + Sync>;
/// Invoked with each completed signal-strength read.
pub type RssiCallback = Box<dyn Fn(i16) + Send + Sync>;
/// Invoked with the full current device list after each applied scan
/// update.
pub type ScanCallback = Box<dyn Fn(Vec<ScannedDevice>) + Send + Sync>;

/// The unified transport contract.
#[async_trait]
pub trait Port: Send + Sync {
    /// Open the logical channel. A no-op success when already connected;
    /// fails fast with [`ConnectError::Connecting`] while a connect is
    /// in flight.
    async fn open(&self, endpoint: &Endpoint) -> Result<(), ConnectError>;

    /// Write command bytes, honoring the deadline. An empty payload is a
    /// trivial success.
    async fn write(&self, data: &[u8], timeout: Duration) -> Result<(), ConnectError>;

    /// Wait for one terminator-framed response and hand it off, clearing
    /// the receive buffer.
    async fn read(&self, timeout: Duration) -> Result<Vec<u8>, ConnectError>;

    /// Release all transport resources. Idempotent.
    fn close(&self);

    /// Continuous receive mode: newly buffered bytes are drained at a
    /// short fixed interval onto the returned channel until the
    /// connection drops or a newer flow replaces this one.
    fn receive_data_flow(&self) -> mpsc::UnboundedReceiver<Vec<u8>>;

    fn set_on_device_disconnect(&self, callback: DisconnectCallback);

    async fn start_scan(&self) -> Result<(), ConnectError> {
        Err(ConnectError::Unsupported)
    }

    fn stop_scan(&self) {}

    fn set_scan_callback(&self, _callback: ScanCallback) {}

    /// Re-establish a previously successful connection (BLE only).
    async fn reconnect(&self) -> Result<(), ConnectError> {
        Err(ConnectError::Unsupported)
    }

    fn set_on_radio_unavailable(&self, _callback: RadioUnavailableCallback) {}

    fn set_on_rssi_update(&self, _callback: RssiCallback) {}

    /// Best-effort device/service metadata (BLE only).
    async fn device_info(&self) -> Option<BleDeviceInfo> {
        None
    }

    /// Switch the active write characteristic and write mode (BLE only).
    fn change_write_role(&self, _characteristic_uuid: &str, _mode: WriteMode, _active: bool) {}

    /// Toggle a characteristic's NOTIFY/INDICATE subscription (BLE
    /// only).
    fn change_subscription(&self, _characteristic_uuid: &str, _kind: SubscriptionKind, _active: bool) {
    }
}
