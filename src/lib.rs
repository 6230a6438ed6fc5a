//! obd-connect
//!
//! Transport-agnostic connection layer for talking to an OBD-style
//! command/response device over BLE (GATT), classic-Bluetooth accessory
//! streams, or a raw TCP socket.
//!
//! Callers open a logical channel through [`ConnectManager`], write
//! command bytes and read a framed response; a response is complete when
//! the device appends its ASCII `>` prompt. The per-transport plumbing
//! (characteristic discovery, stream scheduling, socket I/O) stays
//! behind the [`Port`] contract.
//!
//! The BLE backend is portable: it consumes typed [`ble::RadioEvent`]
//! messages from a platform binding implementing [`ble::RadioLink`].
//! The classic-Bluetooth backend likewise takes an
//! [`stream::AccessoryProvider`]. TCP works out of the box.

pub mod ble;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod port;
pub mod protocol;
pub mod stream;
pub mod wait;

pub use ble::{
    Advertisement, BleDeviceInfo, BleTransport, CharacteristicId, CharacteristicInfo,
    CharacteristicProps, DeviceId, RadioEvent, RadioLink, RadioState, ScannedDevice,
    SubscriptionKind, WriteMode,
};
pub use config::{BleConfig, ConnectConfig, LogConfig, StreamConfig};
pub use error::ConnectError;
pub use manager::{ConnectContext, ConnectManager};
pub use port::{Endpoint, LinkState, Port, TransportKind};
pub use stream::{AccessoryInfo, AccessoryProvider, AccessoryStreams, BluetoothTransport, TcpTransport};
