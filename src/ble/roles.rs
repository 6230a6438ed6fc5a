//! Characteristic Role Selection
//!
//! The target device's GATT layout is not assumed in advance, so every
//! discovery event re-derives which characteristic carries notifications
//! and which carries writes. Selection is a pure function with the
//! previous roles as an explicit input: an established subscription must
//! not be dropped just because an unrelated service re-scan found no new
//! candidate.

use crate::ble::radio::CharacteristicInfo;

/// The notify and write roles currently in effect. At most one of each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SelectedRoles {
    pub notify: Option<CharacteristicInfo>,
    pub write: Option<CharacteristicInfo>,
}

impl SelectedRoles {
    pub fn clear(&mut self) {
        self.notify = None;
        self.write = None;
    }
}

/// Derive roles from one discovery batch, falling back to `previous`
/// selections where the batch offers no dedicated candidate.
///
/// Priority, first match wins:
/// 1. a dedicated notify characteristic and a dedicated write
///    characteristic: use both;
/// 2. a single characteristic supporting both: use it for both;
/// 3. a notify-only characteristic: notify role only;
/// 4. a write-only characteristic: write role only.
pub(crate) fn select_roles(
    discovered: &[CharacteristicInfo],
    previous: &SelectedRoles,
) -> SelectedRoles {
    let mut combined: Option<&CharacteristicInfo> = None;
    let mut notify_only: Option<&CharacteristicInfo> = None;
    let mut write_only: Option<&CharacteristicInfo> = None;

    for characteristic in discovered {
        let notify = characteristic.props.supports_notify();
        let write = characteristic.props.supports_write();
        if notify && write {
            // Later combined candidates win.
            combined = Some(characteristic);
        } else if notify && notify_only.is_none() {
            notify_only = Some(characteristic);
        } else if write && !notify && write_only.is_none() {
            write_only = Some(characteristic);
        }
    }

    let notify_candidate = notify_only.cloned().or_else(|| previous.notify.clone());
    let write_candidate = write_only.cloned().or_else(|| previous.write.clone());

    if let (Some(notify), Some(write)) = (notify_candidate.clone(), write_candidate.clone()) {
        return SelectedRoles {
            notify: Some(notify),
            write: Some(write),
        };
    }
    if let Some(combined) = combined {
        return SelectedRoles {
            notify: Some(combined.clone()),
            write: Some(combined.clone()),
        };
    }
    if let Some(notify) = notify_candidate {
        return SelectedRoles {
            notify: Some(notify),
            write: None,
        };
    }
    if let Some(write) = write_candidate {
        return SelectedRoles {
            notify: None,
            write: Some(write),
        };
    }
    SelectedRoles::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::radio::{CharacteristicId, CharacteristicProps};
    use uuid::Uuid;

    fn characteristic(n: u128, props: CharacteristicProps) -> CharacteristicInfo {
        CharacteristicInfo {
            id: CharacteristicId::new(Uuid::from_u128(0xFFF0), Uuid::from_u128(n)),
            props,
        }
    }

    fn notify_only(n: u128) -> CharacteristicInfo {
        characteristic(
            n,
            CharacteristicProps {
                notify: true,
                ..Default::default()
            },
        )
    }

    fn write_only(n: u128) -> CharacteristicInfo {
        characteristic(
            n,
            CharacteristicProps {
                write: true,
                ..Default::default()
            },
        )
    }

    fn combined(n: u128) -> CharacteristicInfo {
        characteristic(
            n,
            CharacteristicProps {
                notify: true,
                write_without_response: true,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_dedicated_pair_wins() {
        let a = notify_only(1);
        let b = write_only(2);
        let roles = select_roles(&[a.clone(), b.clone()], &SelectedRoles::default());
        assert_eq!(roles.notify, Some(a));
        assert_eq!(roles.write, Some(b));
    }

    #[test]
    fn test_combined_serves_both_roles() {
        let c = combined(3);
        let roles = select_roles(&[c.clone()], &SelectedRoles::default());
        assert_eq!(roles.notify, Some(c.clone()));
        assert_eq!(roles.write, Some(c));
    }

    #[test]
    fn test_notify_only_leaves_write_absent() {
        let a = notify_only(4);
        let roles = select_roles(&[a.clone()], &SelectedRoles::default());
        assert_eq!(roles.notify, Some(a));
        assert_eq!(roles.write, None);
    }

    #[test]
    fn test_write_only_leaves_notify_absent() {
        let b = write_only(5);
        let roles = select_roles(&[b.clone()], &SelectedRoles::default());
        assert_eq!(roles.notify, None);
        assert_eq!(roles.write, Some(b));
    }

    #[test]
    fn test_dedicated_pair_beats_combined() {
        let a = notify_only(6);
        let b = write_only(7);
        let c = combined(8);
        let roles = select_roles(&[c, a.clone(), b.clone()], &SelectedRoles::default());
        assert_eq!(roles.notify, Some(a));
        assert_eq!(roles.write, Some(b));
    }

    #[test]
    fn test_previous_roles_survive_unrelated_discovery() {
        let a = notify_only(9);
        let b = write_only(10);
        let previous = SelectedRoles {
            notify: Some(a.clone()),
            write: Some(b.clone()),
        };
        // A re-scan of a read-only service offers no candidates.
        let read_only = characteristic(
            11,
            CharacteristicProps {
                read: true,
                ..Default::default()
            },
        );
        let roles = select_roles(&[read_only], &previous);
        assert_eq!(roles, previous);
    }

    #[test]
    fn test_new_dedicated_candidate_replaces_previous() {
        let previous = SelectedRoles {
            notify: Some(notify_only(12)),
            write: Some(write_only(13)),
        };
        let fresh_notify = notify_only(14);
        let roles = select_roles(&[fresh_notify.clone()], &previous);
        assert_eq!(roles.notify, Some(fresh_notify));
        assert_eq!(roles.write, previous.write);
    }

    #[test]
    fn test_nothing_discovered_nothing_previous() {
        let roles = select_roles(&[], &SelectedRoles::default());
        assert_eq!(roles, SelectedRoles::default());
    }
}
