//! Device domain entity and the device-list reducer.
//!
//! The vendor transport reports devices in two uncoordinated ways: a periodic
//! "known devices" snapshot and per-device status callbacks.  Neither is
//! authoritative, and status callbacks are known to carry a blank display name
//! when a watch reconnects.  The reducer in this module folds both sources into
//! one list with these invariants:
//!
//! - Exactly one entry per [`DeviceId`].
//! - A poll snapshot only adds and removes entries: the next list is
//!   `(previous − removed) ∪ added`, previous order kept, new devices appended.
//! - A status event always applies its status, and applies its name only if
//!   the name is non-blank.
//! - A blank name never replaces a name learned earlier, even after the
//!   device dropped out of the list in between ([`KnownNames`]).
//!
//! Every function returns a fresh `Vec`; the previous list is never mutated,
//! so a published snapshot can be shared freely.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Stable, transport-assigned identifier of one physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vendor-reported connection status.  Informational, not authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceStatus {
    #[default]
    Unknown,
    Available,
    Connected,
    NotConnected,
}

/// A wearable device as last reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Display name; may be blank when the transport has not resolved it.
    pub name: String,
    pub status: DeviceStatus,
}

impl Device {
    pub fn new(id: DeviceId, name: impl Into<String>, status: DeviceStatus) -> Self {
        Self {
            id,
            name: name.into(),
            status,
        }
    }

    /// Returns `true` if the display name contains anything besides whitespace.
    pub fn has_name(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

/// An immutable, shareable device-list snapshot as published to observers.
pub type DeviceList = Arc<Vec<Device>>;

/// An input to the device-list reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// The transport's full known-device snapshot from one poll tick.
    Snapshot(Vec<Device>),
    /// A status callback for a single device.
    StatusChanged(Device),
}

/// The result of applying one [`RegistryEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduction {
    /// The list to publish.
    pub next: Vec<Device>,
    /// Devices that were not in the previous list.
    pub added: Vec<Device>,
    /// Identifiers that were in the previous list and are gone now.
    pub removed: Vec<DeviceId>,
    /// `false` if `next` is identical to the previous list.
    pub changed: bool,
}

/// The last non-blank display name seen for each device.
///
/// Outlives list membership: a watch that drops out of one poll and comes
/// back with a blank name gets its old name back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownNames {
    names: HashMap<DeviceId, String>,
}

impl KnownNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: DeviceId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Records the name of every entry in `devices` that has one.
    pub fn learn(&mut self, devices: &[Device]) {
        for device in devices.iter().filter(|d| d.has_name()) {
            self.names.insert(device.id, device.name.clone());
        }
    }

    /// Fills a blank name from the book.
    pub fn restore(&self, device: &mut Device) {
        if device.has_name() {
            return;
        }
        if let Some(name) = self.names.get(&device.id) {
            device.name = name.clone();
        }
    }
}

/// Applies `event` to `previous` and returns the next list plus the diff.
///
/// Newly added entries with a blank name take their name from `names`, and
/// `names` then learns every named entry of the result.
pub fn reduce(previous: &[Device], names: &mut KnownNames, event: RegistryEvent) -> Reduction {
    let mut reduction = match event {
        RegistryEvent::Snapshot(snapshot) => apply_snapshot(previous, &snapshot),
        RegistryEvent::StatusChanged(update) => apply_status_event(previous, update),
    };

    let added: HashSet<DeviceId> = reduction.added.iter().map(|d| d.id).collect();
    for device in &mut reduction.added {
        names.restore(device);
    }
    for device in reduction.next.iter_mut().filter(|d| added.contains(&d.id)) {
        names.restore(device);
    }

    names.learn(&reduction.next);
    reduction
}

/// Diffs a poll snapshot against `previous`.
///
/// Entries already present keep their current name and status: only status
/// events update existing devices.  If the snapshot repeats an identifier,
/// its first occurrence wins.
pub fn apply_snapshot(previous: &[Device], snapshot: &[Device]) -> Reduction {
    let snapshot_ids: HashSet<DeviceId> = snapshot.iter().map(|d| d.id).collect();
    let previous_ids: HashSet<DeviceId> = previous.iter().map(|d| d.id).collect();

    let removed: Vec<DeviceId> = previous
        .iter()
        .filter(|d| !snapshot_ids.contains(&d.id))
        .map(|d| d.id)
        .collect();

    let mut seen = HashSet::new();
    let added: Vec<Device> = snapshot
        .iter()
        .filter(|d| !previous_ids.contains(&d.id) && seen.insert(d.id))
        .cloned()
        .collect();

    let mut next: Vec<Device> = previous
        .iter()
        .filter(|d| snapshot_ids.contains(&d.id))
        .cloned()
        .collect();
    next.extend(added.iter().cloned());

    let changed = !removed.is_empty() || !added.is_empty();
    Reduction {
        next,
        added,
        removed,
        changed,
    }
}

/// Folds a single status event into `previous`.
///
/// The merged entry replaces any entry with the same identifier and is
/// appended at the end of the list.  An event that changes nothing leaves the
/// list (including its order) untouched.
pub fn apply_status_event(previous: &[Device], update: Device) -> Reduction {
    let old = previous.iter().find(|d| d.id == update.id);
    let merged = merge_device(old, update);

    if old == Some(&merged) {
        return Reduction {
            next: previous.to_vec(),
            added: Vec::new(),
            removed: Vec::new(),
            changed: false,
        };
    }

    let added = if old.is_none() {
        vec![merged.clone()]
    } else {
        Vec::new()
    };

    let mut next: Vec<Device> = previous
        .iter()
        .filter(|d| d.id != merged.id)
        .cloned()
        .collect();
    next.push(merged);

    Reduction {
        next,
        added,
        removed: Vec::new(),
        changed: true,
    }
}

/// Merges a status update into the previously known entry for the same device.
///
/// Status always comes from `update`.  The name comes from `update` unless it
/// is blank, in which case the old name survives.
pub fn merge_device(old: Option<&Device>, update: Device) -> Device {
    match old {
        Some(old) if !update.has_name() => Device {
            id: update.id,
            name: old.name.clone(),
            status: update.status,
        },
        _ => update,
    }
}

/// Picks the device commands should go to.
///
/// The `preferred` device wins when it is still listed; otherwise the first
/// connected device; otherwise nothing.
pub fn pick_current_device(list: &[Device], preferred: Option<DeviceId>) -> Option<Device> {
    if let Some(id) = preferred {
        if let Some(device) = list.iter().find(|d| d.id == id) {
            return Some(device.clone());
        }
    }
    list.iter()
        .find(|d| d.status == DeviceStatus::Connected)
        .cloned()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
