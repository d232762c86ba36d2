use crate::types::DeviceState;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Process-wide collection of per-device state snapshots.
///
/// Exactly one session writes a given slot; observers read it from any task
/// or thread. `get` clones the whole record under the lock, so a reader never
/// sees a `voltages` list from one update paired with a `total` or timestamp
/// from another.
#[derive(Clone, Default)]
pub struct DeviceStateStore {
    slots: Arc<RwLock<HashMap<String, DeviceState>>>,
}

impl DeviceStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the slot for a device, keeping an existing one untouched
    pub fn register(&self, name: &str) {
        self.write().entry(name.into()).or_default();
    }

    /// Atomic snapshot of one device's latest state
    pub fn get(&self, name: &str) -> Option<DeviceState> {
        self.read().get(name).cloned()
    }

    /// Snapshots of every registered device, sorted by name
    pub fn all(&self) -> Vec<(String, DeviceState)> {
        let mut snapshots: Vec<_> = self
            .read()
            .iter()
            .map(|(name, state)| (name.clone(), state.clone()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }

    /// Apply one mutation to a slot; the record changes as a whole under the
    /// lock. Only the owning session may call this for its device.
    pub fn update(&self, name: &str, mutate: impl FnOnce(&mut DeviceState)) {
        if let Some(state) = self.write().get_mut(name) {
            mutate(state);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, DeviceState>> {
        self.slots.read().unwrap_or_else(|poison| poison.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, DeviceState>> {
        self.slots
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CellVoltages;

    #[test]
    fn register_and_get() {
        let store = DeviceStateStore::new();
        assert_eq!(store.get("akku-1"), None);
        store.register("akku-1");
        assert_eq!(store.get("akku-1"), Some(DeviceState::default()));
    }

    #[test]
    fn update_is_visible_as_a_whole() {
        let store = DeviceStateStore::new();
        store.register("akku-1");
        store.update("akku-1", |state| {
            state.cells = CellVoltages {
                voltages: vec![3.3, 3.3],
                total: 6.6,
            };
            state.last_update = "12:00:00".into();
        });
        let snapshot = store.get("akku-1").unwrap();
        assert_eq!(snapshot.cells.total, 6.6);
        assert_eq!(snapshot.last_update, "12:00:00");
    }

    #[test]
    fn update_of_unknown_slot_is_ignored() {
        let store = DeviceStateStore::new();
        store.update("ghost", |state| state.connected = true);
        assert_eq!(store.get("ghost"), None);
    }

    #[test]
    fn all_is_sorted() {
        let store = DeviceStateStore::new();
        store.register("b");
        store.register("a");
        let names: Vec<_> = store.all().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
