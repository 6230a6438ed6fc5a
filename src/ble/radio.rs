//! BLE Radio Seam
//!
//! The portable core never talks to a native radio stack directly. A
//! platform binding implements [`RadioLink`] for the command direction
//! and translates native callbacks into typed [`RadioEvent`] messages
//! pushed onto the transport's event channel.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ble::subscription::SubscriptionKind;

/// Radio permission/power state, as reported by the platform's
/// authorization collaborator. The core only ever asks "is the radio
/// usable" and reacts to state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    Authorized,
    Denied,
    Restricted,
    Undetermined,
    Unsupported,
    PoweredOff,
    Resetting,
}

impl RadioState {
    /// The radio is usable only when access is authorized and powered.
    pub fn is_usable(self) -> bool {
        matches!(self, RadioState::Authorized)
    }
}

/// Opaque identity of a peripheral, stable across scan and connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a characteristic. The service id participates because a
/// peripheral may expose the same characteristic UUID under different
/// services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicId {
    pub service: Uuid,
    pub uuid: Uuid,
}

impl CharacteristicId {
    pub fn new(service: Uuid, uuid: Uuid) -> Self {
        Self { service, uuid }
    }
}

impl std::fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.uuid)
    }
}

/// Capabilities a characteristic advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProps {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProps {
    pub fn supports_notify(self) -> bool {
        self.notify || self.indicate
    }

    pub fn supports_write(self) -> bool {
        self.write || self.write_without_response
    }

    /// Number of advertised capabilities.
    pub fn count(self) -> usize {
        [
            self.read,
            self.write,
            self.write_without_response,
            self.notify,
            self.indicate,
        ]
        .iter()
        .filter(|p| **p)
        .count()
    }

    /// Capability names in the wire-facing spelling.
    pub fn names(self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.read {
            out.push("READ");
        }
        if self.write {
            out.push("WRITE");
        }
        if self.notify {
            out.push("NOTIFY");
        }
        if self.indicate {
            out.push("INDICATE");
        }
        if self.write_without_response {
            out.push("WRITE_WITHOUT_RESPONSE");
        }
        out
    }

    /// Subscription kind used when enabling notifications on this
    /// characteristic: NOTIFY when advertised, INDICATE otherwise.
    pub fn subscription_kind(self) -> SubscriptionKind {
        if self.notify {
            SubscriptionKind::Notify
        } else {
            SubscriptionKind::Indicate
        }
    }
}

/// A discovered characteristic with its advertised capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub id: CharacteristicId,
    pub props: CharacteristicProps,
}

/// GATT write mode for the active write characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    WithResponse,
    #[default]
    WithoutResponse,
}

/// Parsed advertisement payload captured during scanning.
#[derive(Debug, Clone, Default)]
pub struct Advertisement {
    pub local_name: Option<String>,
    pub service_uuids: Vec<Uuid>,
    pub manufacturer_data: Option<Vec<u8>>,
    pub tx_power: Option<i8>,
}

/// Typed messages the platform binding pushes onto the transport's event
/// channel, replacing delegate-style dispatch from the radio stack.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// Radio permission/power state changed.
    StateChanged(RadioState),
    /// An advertisement was received during scanning.
    Advertisement {
        device: DeviceId,
        rssi: i16,
        data: Advertisement,
    },
    /// The link to a peripheral was established.
    LinkEstablished(DeviceId),
    /// The link to a peripheral dropped.
    LinkLost(DeviceId),
    /// Characteristics were discovered for one service.
    CharacteristicsDiscovered {
        service: Uuid,
        characteristics: Vec<CharacteristicInfo>,
    },
    /// A characteristic reported a new value (notification or read).
    ValueUpdated {
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
    /// The platform acknowledged a subscribe/unsubscribe, reporting the
    /// characteristic's actual subscription state.
    SubscriptionChanged {
        characteristic: CharacteristicId,
        active: bool,
    },
    /// A signal-strength read completed.
    RssiRead(i16),
}

/// Command side of the radio seam. Requests are fire-and-forget: results
/// and failures surface as [`RadioEvent`]s (or as the absence of one,
/// which callers turn into a timeout).
pub trait RadioLink: Send + Sync {
    /// Current permission/power state.
    fn state(&self) -> RadioState;

    /// Request a link to the peripheral.
    fn connect(&self, device: &DeviceId);

    /// Tear down the link to the peripheral.
    fn disconnect(&self, device: &DeviceId);

    /// Start a duplicate-tolerant scan for all advertising peripherals.
    fn start_scan(&self);

    fn stop_scan(&self);

    /// Request service and characteristic discovery for every service.
    fn discover_services(&self, device: &DeviceId);

    /// Issue a GATT write on a characteristic.
    fn write(&self, device: &DeviceId, characteristic: &CharacteristicId, payload: &[u8], mode: WriteMode);

    /// Enable or disable the notify/indicate subscription.
    fn set_subscribed(&self, device: &DeviceId, characteristic: &CharacteristicId, enable: bool);

    /// Request a characteristic value read; the value arrives as a
    /// [`RadioEvent::ValueUpdated`].
    fn read_characteristic(&self, device: &DeviceId, characteristic: &CharacteristicId);

    /// Trigger a signal-strength read; the value arrives as a
    /// [`RadioEvent::RssiRead`].
    fn read_rssi(&self, device: &DeviceId);

    /// Physical link state as the platform currently reports it.
    fn link_connected(&self, device: &DeviceId) -> bool;

    /// Maximum bytes writable in one link-layer operation for the given
    /// write mode.
    fn max_write_len(&self, device: &DeviceId, mode: WriteMode) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_usable_only_when_authorized() {
        assert!(RadioState::Authorized.is_usable());
        for state in [
            RadioState::Denied,
            RadioState::Restricted,
            RadioState::Undetermined,
            RadioState::Unsupported,
            RadioState::PoweredOff,
            RadioState::Resetting,
        ] {
            assert!(!state.is_usable());
        }
    }

    #[test]
    fn test_props_classification() {
        let notify_only = CharacteristicProps {
            notify: true,
            ..Default::default()
        };
        assert!(notify_only.supports_notify());
        assert!(!notify_only.supports_write());
        assert_eq!(notify_only.subscription_kind(), SubscriptionKind::Notify);

        let indicate_write = CharacteristicProps {
            indicate: true,
            write_without_response: true,
            ..Default::default()
        };
        assert!(indicate_write.supports_notify());
        assert!(indicate_write.supports_write());
        assert_eq!(indicate_write.subscription_kind(), SubscriptionKind::Indicate);
        assert_eq!(indicate_write.count(), 2);
    }

    #[test]
    fn test_props_names_order() {
        let props = CharacteristicProps {
            read: true,
            write: true,
            notify: true,
            indicate: true,
            write_without_response: true,
        };
        assert_eq!(
            props.names(),
            vec!["READ", "WRITE", "NOTIFY", "INDICATE", "WRITE_WITHOUT_RESPONSE"]
        );
    }
}
