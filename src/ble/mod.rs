//! BLE Sub-System
//!
//! Central-role transport over a platform radio seam: scanning,
//! connection lifecycle, GATT discovery and role selection, chunked
//! writes, notification-driven receive, RSSI monitoring, reconnection
//! and device metadata collection.

pub mod device_info;
pub mod radio;
pub mod roles;
pub mod scan;
pub mod subscription;
pub mod transport;

pub use device_info::{BleCharacteristicInfo, BleDeviceInfo, BleServiceInfo, BroadcastData, DeviceDetails};
pub use radio::{
    Advertisement, CharacteristicId, CharacteristicInfo, CharacteristicProps, DeviceId, RadioEvent,
    RadioLink, RadioState, WriteMode,
};
pub use scan::ScannedDevice;
pub use subscription::SubscriptionKind;
pub use transport::BleTransport;
