//! Merges the static inventory with the identifiers seen on the broker.
//!
//! Inventory entries are matched against live identifiers by exact name,
//! then by the name with spaces turned into hyphens (the MQTT naming
//! convention of the firmware). Inventory entries that never published are
//! left out of the result; live identifiers without an inventory entry are
//! listed with unknown metadata.

use crate::models::{DeviceId, DevicesMap, ReconciledDevice, RosterEntry, UNKNOWN};
use std::collections::HashSet;

/// MQTT identifier form of an inventory name.
pub fn mqtt_name(name: &str) -> String {
    name.replace(' ', "-")
}

/// Display form of an MQTT identifier.
pub fn humanize(id: &str) -> String {
    id.replace('-', " ")
}

fn find_live<'a>(name: &str, live: &'a DevicesMap) -> Option<&'a DeviceId> {
    live.get_key_value(name)
        .or_else(|| live.get_key_value(mqtt_name(name).as_str()))
        .map(|(id, _)| id)
}

pub fn reconcile(roster: &[RosterEntry], live: &DevicesMap) -> Vec<ReconciledDevice> {
    let mut claimed: HashSet<&str> = HashSet::new();
    let mut devices = Vec::with_capacity(live.len());

    for entry in roster {
        let Some(id) = find_live(&entry.name, live) else {
            continue;
        };
        claimed.insert(id.as_str());
        devices.push(ReconciledDevice {
            name: entry.name.clone(),
            chip_id: entry.chip_id.clone(),
            platform: entry.platform.clone(),
            display: entry.display.clone(),
            ip: entry.ip.clone(),
            status: entry.status.clone(),
            last_update: entry.last_update.clone(),
            in_roster: true,
            mqtt_name: id.clone(),
            online: true,
            mqtt_state: live.get(id).cloned(),
        });
    }

    for (id, state) in live.iter().filter(|(id, _)| !claimed.contains(id.as_str())) {
        devices.push(ReconciledDevice {
            name: humanize(id),
            chip_id: UNKNOWN.into(),
            platform: UNKNOWN.into(),
            display: UNKNOWN.into(),
            ip: UNKNOWN.into(),
            status: UNKNOWN.into(),
            last_update: UNKNOWN.into(),
            in_roster: false,
            mqtt_name: id.clone(),
            online: true,
            mqtt_state: Some(state.clone()),
        });
    }

    sort_devices(&mut devices);
    devices
}

/// Online devices first, then by display name. Stable.
pub fn sort_devices(devices: &mut [ReconciledDevice]) {
    devices.sort_by(|a, b| b.online.cmp(&a.online).then_with(|| a.name.cmp(&b.name)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceState;
    use time::macros::datetime;

    fn entry(name: &str) -> RosterEntry {
        RosterEntry {
            name: name.into(),
            chip_id: "a1b2c3".into(),
            platform: "ESP32".into(),
            display: "SSD1306".into(),
            ip: "192.168.1.40".into(),
            status: "Deployed".into(),
            last_update: "2026-01-02".into(),
        }
    }

    fn live(ids: &[&str]) -> DevicesMap {
        ids.iter()
            .map(|id| (id.to_string(), DeviceState::new(datetime!(2026-05-01 08:00 UTC))))
            .collect()
    }

    #[test]
    fn test_hyphenated_variant_matches() {
        let devices = reconcile(&[entry("Pump House")], &live(&["Pump-House"]));
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Pump House");
        assert_eq!(devices[0].mqtt_name, "Pump-House");
        assert!(devices[0].online);
        assert!(devices[0].in_roster);
        assert!(devices[0].mqtt_state.is_some());
    }

    #[test]
    fn test_exact_match_wins_over_hyphenated() {
        let devices = reconcile(&[entry("Pump House")], &live(&["Pump House", "Pump-House"]));
        assert_eq!(devices[0].mqtt_name, "Pump House");
        // the hyphenated identifier is unclaimed, so it shows up on its own
        assert_eq!(devices.len(), 2);
        assert!(!devices[1].in_roster);
    }

    #[test]
    fn test_silent_roster_entries_are_dropped() {
        let devices = reconcile(&[entry("Attic")], &live(&[]));
        assert!(devices.is_empty());

        let devices = reconcile(&[entry("Attic"), entry("Shed")], &live(&["Shed"]));
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Shed");
    }

    #[test]
    fn test_unknown_identifier_is_synthesized() {
        let devices = reconcile(&[], &live(&["garage-cam"]));
        assert_eq!(devices.len(), 1);
        let device = &devices[0];
        assert_eq!(device.name, "garage cam");
        assert_eq!(device.mqtt_name, "garage-cam");
        assert_eq!(device.chip_id, UNKNOWN);
        assert_eq!(device.platform, UNKNOWN);
        assert_eq!(device.ip, UNKNOWN);
        assert!(!device.in_roster);
        assert!(device.online);
    }

    #[test]
    fn test_sorted_by_name_and_deterministic() {
        let roster = [entry("Zeta"), entry("Kitchen")];
        let states = live(&["Zeta", "Kitchen", "attic-sensor"]);
        let first = reconcile(&roster, &states);
        let names: Vec<_> = first.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Kitchen", "Zeta", "attic sensor"]);
        assert_eq!(first, reconcile(&roster, &states));
    }

    #[test]
    fn test_online_sorts_before_offline() {
        let mut devices = reconcile(&[entry("Z"), entry("A")], &live(&["Z", "A"]));
        devices.iter_mut().find(|d| d.name == "A").unwrap().online = false;
        sort_devices(&mut devices);
        assert_eq!(devices[0].name, "Z");
        assert_eq!(devices[1].name, "A");
    }
}
