// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::controller::ControllerInner;
use crate::name::ServiceName;

/// The concurrent name → controller map backing a container.
///
/// Reads share the lock; writes are per-name atomic. A name's slot stays
/// occupied until its controller's removal fully commits, so re-installing a
/// name races against removal and loses with a duplicate-name error rather
/// than silently replacing a controller that is still shutting down.
pub(crate) struct Registry {
    map: RwLock<HashMap<ServiceName, Arc<ControllerInner>>>,
}

pub(crate) enum RemoveOutcome {
    Removed,
    /// The slot holds a different controller than the one being removed.
    Mismatch,
    Absent,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, name: &ServiceName) -> Option<Arc<ControllerInner>> {
        self.map.read().get(name).cloned()
    }

    /// Inserts if the slot is free; returns whether the insert happened.
    pub(crate) fn put_if_absent(
        &self,
        name: &ServiceName,
        controller: &Arc<ControllerInner>,
    ) -> bool {
        match self.map.write().entry(name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(controller));
                true
            }
        }
    }

    /// Removes the slot only if it still holds exactly `controller`.
    pub(crate) fn remove_if(
        &self,
        name: &ServiceName,
        controller: &Arc<ControllerInner>,
    ) -> RemoveOutcome {
        let mut map = self.map.write();
        match map.get(name) {
            Some(current) if Arc::ptr_eq(current, controller) => {
                map.remove(name);
                RemoveOutcome::Removed
            }
            Some(_) => RemoveOutcome::Mismatch,
            None => RemoveOutcome::Absent,
        }
    }

    pub(crate) fn controllers(&self) -> Vec<Arc<ControllerInner>> {
        self.map.read().values().cloned().collect()
    }
}
