//! Device/Service Metadata Model
//!
//! Plain records describing a connected peripheral: captured broadcast
//! data, the standard Device Information Service fields, and per-service
//! characteristic descriptors with live property status. Collection is
//! best-effort: a failed read degrades to an absent field, never an
//! error.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::ble::radio::{CharacteristicId, CharacteristicInfo, WriteMode};
use crate::ble::roles::SelectedRoles;
use crate::ble::subscription::{SubscriptionCache, SubscriptionKind};

/// Standard Device Information Service.
pub const DEVICE_INFO_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);

pub const MANUFACTURER_NAME_UUID: Uuid = Uuid::from_u128(0x00002a29_0000_1000_8000_00805f9b34fb);
pub const MODEL_NUMBER_UUID: Uuid = Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);
pub const SERIAL_NUMBER_UUID: Uuid = Uuid::from_u128(0x00002a25_0000_1000_8000_00805f9b34fb);
pub const HARDWARE_REVISION_UUID: Uuid = Uuid::from_u128(0x00002a27_0000_1000_8000_00805f9b34fb);
pub const FIRMWARE_REVISION_UUID: Uuid = Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb);
pub const SOFTWARE_REVISION_UUID: Uuid = Uuid::from_u128(0x00002a28_0000_1000_8000_00805f9b34fb);
pub const SYSTEM_ID_UUID: Uuid = Uuid::from_u128(0x00002a23_0000_1000_8000_00805f9b34fb);
pub const IEEE_CERT_UUID: Uuid = Uuid::from_u128(0x00002a2a_0000_1000_8000_00805f9b34fb);
pub const PNP_ID_UUID: Uuid = Uuid::from_u128(0x00002a50_0000_1000_8000_00805f9b34fb);

/// All standard device-information characteristics, in read order.
pub(crate) const DEVICE_INFO_CHARACTERISTICS: [Uuid; 9] = [
    MANUFACTURER_NAME_UUID,
    MODEL_NUMBER_UUID,
    SERIAL_NUMBER_UUID,
    HARDWARE_REVISION_UUID,
    FIRMWARE_REVISION_UUID,
    SOFTWARE_REVISION_UUID,
    SYSTEM_ID_UUID,
    IEEE_CERT_UUID,
    PNP_ID_UUID,
];

/// Advertisement-derived facts about the peripheral.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcastData {
    pub device_name: String,
    /// Advertised transmit power, falling back to the last observed RSSI.
    pub tx_power_level: i32,
    pub service_uuids: Vec<String>,
    pub manufacturer_data: Option<Vec<u8>>,
    /// Whether the peripheral was actually captured during a scan.
    pub advertised: bool,
}

/// Standard Device Information Service fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceDetails {
    /// Always populated; unknown devices get a placeholder.
    pub manufacturer_name: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub hardware_revision: Option<String>,
    pub firmware_revision: Option<String>,
    pub software_revision: Option<String>,
    pub system_id: Option<String>,
    pub ieee_id: Option<String>,
    pub pnp_id: Option<String>,
}

/// One service and its characteristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleServiceInfo {
    pub service_uuid: String,
    pub characteristics: Vec<BleCharacteristicInfo>,
}

/// One characteristic with its advertised capabilities, last known value
/// and live property status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleCharacteristicInfo {
    pub characteristic_uuid: String,
    pub properties: Vec<String>,
    /// Last known value, hex-encoded; empty when never read.
    pub value: String,
    /// Per-capability activity: is this the active write target with the
    /// matching mode, is it actively subscribed as NOTIFY/INDICATE.
    pub property_status: BTreeMap<String, bool>,
}

/// Snapshot surfaced to the caller: broadcast data plus optional device
/// information plus the interesting services. Built once per connection
/// and cached until disconnect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BleDeviceInfo {
    pub broadcast: Option<BroadcastData>,
    pub details: Option<DeviceDetails>,
    pub services: Vec<BleServiceInfo>,
}

/// Colon-separated uppercase hex, e.g. `0A:1B:2C`.
pub(crate) fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Decode a device-information characteristic value. The binary
/// identifiers are hex-encoded; everything else is read as UTF-8.
pub(crate) fn parse_characteristic_value(uuid: Uuid, data: &[u8]) -> String {
    if uuid == SYSTEM_ID_UUID || uuid == IEEE_CERT_UUID || uuid == PNP_ID_UUID {
        hex_string(data)
    } else {
        String::from_utf8_lossy(data).to_string()
    }
}

/// Store a decoded value on the matching detail field.
pub(crate) fn apply_device_info_value(details: &mut DeviceDetails, uuid: Uuid, value: String) {
    let slot = if uuid == MANUFACTURER_NAME_UUID {
        &mut details.manufacturer_name
    } else if uuid == MODEL_NUMBER_UUID {
        &mut details.model_number
    } else if uuid == SERIAL_NUMBER_UUID {
        &mut details.serial_number
    } else if uuid == HARDWARE_REVISION_UUID {
        &mut details.hardware_revision
    } else if uuid == FIRMWARE_REVISION_UUID {
        &mut details.firmware_revision
    } else if uuid == SOFTWARE_REVISION_UUID {
        &mut details.software_revision
    } else if uuid == SYSTEM_ID_UUID {
        &mut details.system_id
    } else if uuid == IEEE_CERT_UUID {
        &mut details.ieee_id
    } else if uuid == PNP_ID_UUID {
        &mut details.pnp_id
    } else {
        return;
    };
    *slot = Some(value);
}

/// Build the service descriptor list from the discovered characteristics.
///
/// Only services containing a characteristic with more than one
/// advertised capability are reported; single-capability services are
/// uninteresting for this surface.
pub(crate) fn build_service_list(
    characteristics: &[CharacteristicInfo],
    values: &HashMap<CharacteristicId, Vec<u8>>,
    roles: &SelectedRoles,
    write_mode: WriteMode,
    subscriptions: &SubscriptionCache,
) -> Vec<BleServiceInfo> {
    let mut services: Vec<Uuid> = Vec::new();
    for characteristic in characteristics {
        if !services.contains(&characteristic.id.service) {
            services.push(characteristic.id.service);
        }
    }

    services
        .into_iter()
        .filter(|service| {
            characteristics
                .iter()
                .any(|c| c.id.service == *service && c.props.count() > 1)
        })
        .map(|service| BleServiceInfo {
            service_uuid: service.to_string(),
            characteristics: characteristics
                .iter()
                .filter(|c| c.id.service == service)
                .map(|c| describe_characteristic(c, values, roles, write_mode, subscriptions))
                .collect(),
        })
        .collect()
}

fn describe_characteristic(
    characteristic: &CharacteristicInfo,
    values: &HashMap<CharacteristicId, Vec<u8>>,
    roles: &SelectedRoles,
    write_mode: WriteMode,
    subscriptions: &SubscriptionCache,
) -> BleCharacteristicInfo {
    let props = characteristic.props;
    let id = characteristic.id;
    let is_active_write = roles.write.as_ref().map(|w| w.id) == Some(id);

    let mut status = BTreeMap::new();
    if props.read {
        status.insert("READ".to_string(), true);
    }
    if props.notify {
        status.insert(
            "NOTIFY".to_string(),
            subscriptions.contains(&id, SubscriptionKind::Notify),
        );
    }
    if props.indicate {
        status.insert(
            "INDICATE".to_string(),
            subscriptions.contains(&id, SubscriptionKind::Indicate),
        );
    }
    if props.write {
        status.insert(
            "WRITE".to_string(),
            is_active_write && write_mode == WriteMode::WithResponse,
        );
    }
    if props.write_without_response {
        status.insert(
            "WRITE_WITHOUT_RESPONSE".to_string(),
            is_active_write && write_mode == WriteMode::WithoutResponse,
        );
    }

    BleCharacteristicInfo {
        characteristic_uuid: id.uuid.to_string(),
        properties: props.names().iter().map(|s| s.to_string()).collect(),
        value: values.get(&id).map(|v| hex_string(v)).unwrap_or_default(),
        property_status: status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::radio::CharacteristicProps;

    fn characteristic(service: u128, uuid: u128, props: CharacteristicProps) -> CharacteristicInfo {
        CharacteristicInfo {
            id: CharacteristicId::new(Uuid::from_u128(service), Uuid::from_u128(uuid)),
            props,
        }
    }

    #[test]
    fn test_binary_ids_hex_encoded() {
        assert_eq!(
            parse_characteristic_value(SYSTEM_ID_UUID, &[0x0A, 0x1B, 0x2C]),
            "0A:1B:2C"
        );
        assert_eq!(
            parse_characteristic_value(MANUFACTURER_NAME_UUID, b"ELM Electronics"),
            "ELM Electronics"
        );
    }

    #[test]
    fn test_apply_device_info_value() {
        let mut details = DeviceDetails::default();
        apply_device_info_value(&mut details, MODEL_NUMBER_UUID, "ELM327 v1.5".into());
        apply_device_info_value(&mut details, PNP_ID_UUID, "01:02".into());
        apply_device_info_value(&mut details, Uuid::from_u128(0xdead), "ignored".into());
        assert_eq!(details.model_number.as_deref(), Some("ELM327 v1.5"));
        assert_eq!(details.pnp_id.as_deref(), Some("01:02"));
        assert!(details.serial_number.is_none());
    }

    #[test]
    fn test_single_capability_services_filtered_out() {
        let read_only = characteristic(
            0xA,
            1,
            CharacteristicProps {
                read: true,
                ..Default::default()
            },
        );
        let combined = characteristic(
            0xB,
            2,
            CharacteristicProps {
                notify: true,
                write: true,
                ..Default::default()
            },
        );
        let services = build_service_list(
            &[read_only, combined],
            &HashMap::new(),
            &SelectedRoles::default(),
            WriteMode::WithoutResponse,
            &SubscriptionCache::default(),
        );
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].service_uuid, Uuid::from_u128(0xB).to_string());
    }

    #[test]
    fn test_property_status_reflects_active_roles() {
        let combined = characteristic(
            0xC,
            3,
            CharacteristicProps {
                write: true,
                write_without_response: true,
                notify: true,
                ..Default::default()
            },
        );
        let roles = SelectedRoles {
            notify: Some(combined.clone()),
            write: Some(combined.clone()),
        };
        let mut subscriptions = SubscriptionCache::default();
        subscriptions.insert(&combined.id, SubscriptionKind::Notify);

        let services = build_service_list(
            &[combined.clone()],
            &HashMap::new(),
            &roles,
            WriteMode::WithResponse,
            &subscriptions,
        );
        let status = &services[0].characteristics[0].property_status;
        assert_eq!(status.get("NOTIFY"), Some(&true));
        // Active write target with a matching mode.
        assert_eq!(status.get("WRITE"), Some(&true));
        // Mode mismatch leaves the other write capability inactive.
        assert_eq!(status.get("WRITE_WITHOUT_RESPONSE"), Some(&false));
    }

    #[test]
    fn test_value_hex_from_latest_read() {
        let combined = characteristic(
            0xD,
            4,
            CharacteristicProps {
                notify: true,
                write: true,
                ..Default::default()
            },
        );
        let mut values = HashMap::new();
        values.insert(combined.id, vec![0x41, 0x00]);
        let services = build_service_list(
            &[combined],
            &values,
            &SelectedRoles::default(),
            WriteMode::WithoutResponse,
            &SubscriptionCache::default(),
        );
        assert_eq!(services[0].characteristics[0].value, "41:00");
    }
}
