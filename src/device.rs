//! Device hierarchy
//!
//! Devices form a forest: each device has at most one parent and following
//! parents always ends at a root. A "Plankton Tow" parent groups a
//! "Zooplankton Tow" child, for example. Parents are grouping nodes and
//! by convention carry no events of their own.

use crate::db::Device;
use std::collections::{HashMap, HashSet};

/// All known devices indexed by id
#[derive(Debug, Clone, Default)]
pub struct DeviceForest {
    by_id: HashMap<i32, Device>,
}

impl DeviceForest {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            by_id: devices.into_iter().map(|d| (d.id, d)).collect(),
        }
    }

    pub fn get(&self, id: i32) -> Option<&Device> {
        self.by_id.get(&id)
    }

    pub fn parent_of(&self, device: &Device) -> Option<&Device> {
        device.parent_id.and_then(|p| self.by_id.get(&p))
    }

    /// Ancestors of a device, root first, ending with its direct parent
    pub fn lineage(&self, device: &Device) -> Vec<&Device> {
        let mut lineage = Vec::new();
        let mut seen = HashSet::from([device.id]);
        let mut current = self.parent_of(device);
        while let Some(parent) = current {
            if !seen.insert(parent.id) {
                break;
            }
            lineage.push(parent);
            current = self.parent_of(parent);
        }
        lineage.reverse();
        lineage
    }

    /// Topmost ancestor, or the device itself when it has no parent
    pub fn root_of<'a>(&'a self, device: &'a Device) -> &'a Device {
        self.lineage(device).first().copied().unwrap_or(device)
    }

    /// True if making `parent_id` the parent of `device_id` would close a loop
    pub fn would_create_cycle(&self, device_id: i32, parent_id: i32) -> bool {
        if device_id == parent_id {
            return true;
        }
        let mut seen = HashSet::new();
        let mut current = Some(parent_id);
        while let Some(id) = current {
            if id == device_id {
                return true;
            }
            if !seen.insert(id) {
                // already looping without passing through device_id
                return false;
            }
            current = self.by_id.get(&id).and_then(|d| d.parent_id);
        }
        false
    }

    /// Unique top-level devices for a set of configured devices, in
    /// configuration order. Parentless devices are listed first, then the
    /// roots reached from devices that have parents.
    pub fn top_level_parents<'a>(&'a self, configured: &'a [Device]) -> Vec<&'a Device> {
        let mut roots: Vec<&Device> = configured.iter().filter(|d| d.parent_id.is_none()).collect();
        for device in configured.iter().filter(|d| d.parent_id.is_some()) {
            let root = self.root_of(device);
            if !roots.iter().any(|r| r.id == root.id) {
                roots.push(root);
            }
        }
        roots
    }

    /// Configured devices whose direct parent is `parent_id`
    pub fn child_devices<'a>(&self, parent_id: i32, configured: &'a [Device]) -> Vec<&'a Device> {
        configured
            .iter()
            .filter(|d| d.parent_id == Some(parent_id))
            .collect()
    }

    /// Children of `parent_id` among all known devices, sorted by name
    pub fn all_children(&self, parent_id: i32) -> Vec<&Device> {
        let mut children: Vec<&Device> = self
            .by_id
            .values()
            .filter(|d| d.parent_id == Some(parent_id))
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        children
    }

    /// Devices without a parent, sorted by name
    pub fn roots(&self) -> Vec<&Device> {
        let mut roots: Vec<&Device> = self.by_id.values().filter(|d| d.parent_id.is_none()).collect();
        roots.sort_by(|a, b| a.name.cmp(&b.name));
        roots
    }
}
