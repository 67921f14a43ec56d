//! Fleet registry: carries worker devices across poll cycles.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::state::Device;

/// Merge this cycle's fleet fetch into the previously published devices.
///
/// `observed` is `None` when the fleet fetch failed; every known device is
/// then kept and marked stale without counting a miss. A device missing
/// from a successful fetch is kept as stale until it has been missed more
/// than `grace_cycles` times in a row.
pub fn merge_devices(
    previous: &BTreeMap<String, Device>,
    observed: Option<Vec<Device>>,
    grace_cycles: u32,
) -> BTreeMap<String, Device> {
    let Some(observed) = observed else {
        return previous
            .iter()
            .map(|(id, device)| {
                let mut device = device.clone();
                device.stale = true;
                (id.clone(), device)
            })
            .collect();
    };

    let mut merged: BTreeMap<String, Device> = BTreeMap::new();
    for mut device in observed {
        device.missed_cycles = 0;
        match merged.entry(device.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(device);
            }
            Entry::Occupied(mut slot) => {
                tracing::warn!(device = %device.id, "duplicate device in fleet response");
                if device.last_heartbeat > slot.get().last_heartbeat {
                    slot.insert(device);
                }
            }
        }
    }

    for (id, device) in previous {
        if merged.contains_key(id) {
            continue;
        }
        let missed = device.missed_cycles + 1;
        if missed > grace_cycles {
            tracing::debug!(device = %id, missed, "dropping device");
            continue;
        }
        let mut device = device.clone();
        device.missed_cycles = missed;
        device.stale = true;
        merged.insert(id.clone(), device);
    }

    merged
}

/// Devices that are online, fresh and advertise `tool`.
pub fn devices_with_tool<'a>(
    devices: &'a BTreeMap<String, Device>,
    tool: &'a str,
) -> impl Iterator<Item = &'a Device> + 'a {
    devices
        .values()
        .filter(move |d| d.online && !d.stale && d.has_tool(tool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    fn device(id: &str) -> Device {
        let mut device = Device::new(id, id);
        device.online = true;
        device.last_heartbeat = Some(Utc::now());
        device
    }

    fn by_id(devices: Vec<Device>) -> BTreeMap<String, Device> {
        devices.into_iter().map(|d| (d.id.clone(), d)).collect()
    }

    #[test]
    fn missing_devices_survive_the_grace_period() {
        let mut known = by_id(vec![device("a"), device("b")]);

        for expected_missed in 1..=2 {
            known = merge_devices(&known, Some(vec![device("a")]), 2);
            let b = &known["b"];
            assert!(b.stale);
            assert_eq!(b.missed_cycles, expected_missed);
        }

        known = merge_devices(&known, Some(vec![device("a")]), 2);
        assert!(!known.contains_key("b"));
        assert!(!known["a"].stale);
    }

    #[test]
    fn failed_fetch_keeps_everything_without_counting() {
        let known = by_id(vec![device("a")]);
        let after_failure = merge_devices(&known, None, 0);

        assert!(after_failure["a"].stale);
        assert_eq!(after_failure["a"].missed_cycles, 0);

        let recovered = merge_devices(&after_failure, Some(vec![device("a")]), 0);
        assert!(!recovered["a"].stale);
    }

    #[test]
    fn duplicates_keep_the_latest_heartbeat() {
        let mut old = device("a");
        old.last_heartbeat = Some(Utc::now() - Duration::minutes(10));
        old.name = "old".to_string();
        let mut new = device("a");
        new.name = "new".to_string();

        let merged = merge_devices(&BTreeMap::new(), Some(vec![new, old]), 2);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["a"].name, "new");
    }

    #[test]
    fn tool_lookup_skips_offline_devices() {
        let mut online = device("on");
        online.tools.insert("Gemini CLI");
        let mut offline = device("off");
        offline.tools.insert("gemini");
        offline.online = false;

        let devices = by_id(vec![online, offline]);
        let ids: Vec<&str> = devices_with_tool(&devices, "gemini").map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["on"]);
    }
}
