//! BLE Scan Records
//!
//! Keeps the table of peripherals seen while scanning and decides when a
//! fresh advertisement is worth applying. Noisy advertisers can deliver
//! dozens of callbacks per second; the refresh policy bounds the volume
//! while still refreshing stale entries.

use std::time::{Duration, Instant};

use crate::ble::radio::{Advertisement, DeviceId};

/// Last-known view of a peripheral seen during scanning.
#[derive(Debug, Clone)]
pub struct ScannedDevice {
    pub id: DeviceId,
    pub name: Option<String>,
    pub rssi: i16,
    pub last_update: Instant,
    pub update_count: u32,
    pub advertisement: Advertisement,
}

/// Refresh policy for an already-known device, evaluated in order with
/// the first match winning:
///
/// 1. RSSI moved at least 10 dBm: apply immediately.
/// 2. at least 5 dBm and at least 1 s since the last update.
/// 3. at least 2 dBm and at least 3 s since the last update.
/// 4. at least 5 s since the last update, regardless of movement.
pub(crate) fn should_refresh(rssi_delta: u16, since_last: Duration) -> bool {
    if rssi_delta >= 10 {
        return true;
    }
    if rssi_delta >= 5 && since_last >= Duration::from_secs(1) {
        return true;
    }
    if rssi_delta >= 2 && since_last >= Duration::from_secs(3) {
        return true;
    }
    since_last >= Duration::from_secs(5)
}

/// Insert or refresh a device record for one advertisement.
///
/// New devices are always inserted; known devices are refreshed per
/// [`should_refresh`]. Returns true when the table changed and the full
/// list should be re-delivered to the scan callback.
pub(crate) fn apply_advertisement(
    table: &mut Vec<ScannedDevice>,
    device: DeviceId,
    rssi: i16,
    data: Advertisement,
    now: Instant,
) -> bool {
    match table.iter_mut().find(|d| d.id == device) {
        Some(existing) => {
            let delta = existing.rssi.abs_diff(rssi);
            let since_last = now.saturating_duration_since(existing.last_update);
            if !should_refresh(delta, since_last) {
                return false;
            }
            existing.rssi = rssi;
            existing.last_update = now;
            existing.update_count += 1;
            if data.local_name.is_some() {
                existing.name = data.local_name.clone();
            }
            existing.advertisement = data;
            true
        }
        None => {
            table.push(ScannedDevice {
                id: device,
                name: data.local_name.clone(),
                rssi,
                last_update: now,
                update_count: 1,
                advertisement: data,
            });
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(n: u32) -> DeviceId {
        DeviceId(format!("device-{n}"))
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_refresh_tiers() {
        // Tier 1: big movement fires regardless of elapsed time.
        assert!(should_refresh(10, ms(0)));
        assert!(should_refresh(11, ms(200)));
        // Tier 2: medium movement needs one second.
        assert!(!should_refresh(5, ms(900)));
        assert!(should_refresh(5, ms(1000)));
        assert!(should_refresh(6, ms(1100)));
        // Tier 3: small movement needs three seconds.
        assert!(!should_refresh(2, ms(2900)));
        assert!(should_refresh(2, ms(3000)));
        assert!(should_refresh(3, ms(4200)));
        // Tier 4: anything refreshes after five seconds.
        assert!(!should_refresh(0, ms(4999)));
        assert!(should_refresh(0, ms(5000)));
        assert!(should_refresh(1, ms(5100)));
        // No tier fires for quiet, recent advertisers.
        assert!(!should_refresh(1, ms(600)));
        assert!(!should_refresh(4, ms(500)));
    }

    #[test]
    fn test_tight_burst_applies_only_first_update() {
        let t0 = Instant::now();
        let mut table = Vec::new();
        // Seed the baseline entry.
        assert!(apply_advertisement(&mut table, dev(1), -60, Advertisement::default(), t0));

        // Deltas [11, 1, 1, 1] at t = 0, 0.2, 0.4, 0.6 s: only the first
        // (10 dBm or more) lands.
        let mut updates = 0;
        for (delta_rssi, at) in [(-49, 0u64), (-48, 200), (-47, 400), (-46, 600)] {
            if apply_advertisement(&mut table, dev(1), delta_rssi, Advertisement::default(), t0 + ms(at)) {
                updates += 1;
            }
        }
        assert_eq!(updates, 1);
        assert_eq!(table[0].rssi, -49);
        assert_eq!(table[0].update_count, 2);
    }

    #[test]
    fn test_spaced_sequence_hits_each_tier() {
        let t0 = Instant::now();
        let mut table = Vec::new();
        apply_advertisement(&mut table, dev(2), -60, Advertisement::default(), t0);

        // Each advertisement satisfies a different policy tier.
        let cases = [
            (-49, 100u64), // delta 11, tier 1
            (-43, 1300),   // delta 6 after 1.2 s, tier 2
            (-40, 4500),   // delta 3 after 3.2 s, tier 3
            (-39, 9800),   // delta 1 after 5.3 s, tier 4
        ];
        for (rssi, at) in cases {
            assert!(
                apply_advertisement(&mut table, dev(2), rssi, Advertisement::default(), t0 + ms(at)),
                "advertisement at {at}ms should refresh"
            );
        }
        assert_eq!(table[0].update_count, 5);
        assert_eq!(table[0].rssi, -39);
    }

    #[test]
    fn test_new_device_always_inserts() {
        let t0 = Instant::now();
        let mut table = Vec::new();
        assert!(apply_advertisement(&mut table, dev(3), -80, Advertisement::default(), t0));
        assert!(apply_advertisement(&mut table, dev(4), -81, Advertisement::default(), t0));
        assert_eq!(table.len(), 2);
        // First-seen order is preserved.
        assert_eq!(table[0].id, dev(3));
        assert_eq!(table[1].id, dev(4));
    }

    #[test]
    fn test_refresh_keeps_known_name_when_advertisement_omits_it() {
        let t0 = Instant::now();
        let mut table = Vec::new();
        let named = Advertisement {
            local_name: Some("OBDII".into()),
            ..Default::default()
        };
        apply_advertisement(&mut table, dev(5), -60, named, t0);
        apply_advertisement(&mut table, dev(5), -45, Advertisement::default(), t0 + ms(100));
        assert_eq!(table[0].name.as_deref(), Some("OBDII"));
    }
}
