// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The batch installer: an iterative, stack-safe dependency walker.
//!
//! Entries are indices into the batch arena; descent along unresolved
//! dependency edges is recorded with an explicit `prev` back-link and
//! unwound in a loop, so a dependency chain of any length resolves without
//! growing the call stack. `visited` marks the active path for cycle
//! detection; `processed` marks entries already installed.

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Weak};

use tracing::{debug, error};

use crate::batch::BatchEntry;
use crate::container::{ContainerInner, ServiceContainer};
use crate::controller::{ControllerInner, ControllerSettings, LinkSnapshot, ServiceController};
use crate::error::InstallError;
use crate::listener::ServiceListener;
use crate::name::ServiceName;
use crate::registry::RemoveOutcome;
use crate::service::ServiceSlot;

#[derive(Default)]
struct Walk {
    processed: bool,
    visited: bool,
    prev: Option<usize>,
    /// Index of the next dependency to examine.
    i: usize,
    /// Controllers resolved so far, in declaration order, deduplicated.
    resolved: Vec<Arc<ControllerInner>>,
}

pub(crate) fn install(
    container: &ServiceContainer,
    batch_listeners: Vec<Arc<dyn ServiceListener>>,
    mut entries: Vec<BatchEntry>,
    index: &HashMap<ServiceName, usize>,
) -> Result<(), InstallError> {
    let inner = container.inner();
    let mut walk: Vec<Walk> = (0..entries.len()).map(|_| Walk::default()).collect();
    let mut installed: Vec<(ServiceName, Arc<ControllerInner>)> = Vec::new();

    let mut resolve = || -> Result<(), InstallError> {
        for first in 0..entries.len() {
            if walk[first].processed {
                continue;
            }
            let mut current = first;
            loop {
                // Resolve dependencies left to right against the live
                // registry; controllers installed earlier in this batch are
                // already published there.
                let mut descend = None;
                while walk[current].i < entries[current].dependencies.len() {
                    let dependency_name = entries[current].dependencies[walk[current].i].clone();
                    if let Some(dependency) = inner.registry.get(&dependency_name) {
                        if !walk[current]
                            .resolved
                            .iter()
                            .any(|known| Arc::ptr_eq(known, &dependency))
                        {
                            walk[current].resolved.push(dependency);
                        }
                        walk[current].i += 1;
                        continue;
                    }
                    let Some(&dependency_index) = index.get(&dependency_name) else {
                        return Err(InstallError::MissingDependency {
                            dependent: entries[current].name.clone(),
                            dependency: dependency_name,
                        });
                    };
                    descend = Some(dependency_index);
                    break;
                }

                if let Some(next) = descend {
                    walk[current].visited = true;
                    let from = current;
                    current = next;
                    if walk[current].visited {
                        return Err(InstallError::CircularDependency {
                            path: cycle_path(current, from, &walk, &entries),
                        });
                    }
                    debug_assert!(walk[current].prev.is_none());
                    walk[current].prev = Some(from);
                    continue;
                }

                // All dependencies resolved: create, publish, unwind.
                let dependencies = mem::take(&mut walk[current].resolved);
                let controller =
                    create_controller(inner, &mut entries[current], dependencies, &batch_listeners);
                if !inner.registry.put_if_absent(&entries[current].name, &controller) {
                    controller.discard();
                    return Err(InstallError::DuplicateService {
                        name: entries[current].name.clone(),
                    });
                }
                installed.push((entries[current].name.clone(), controller));

                walk[current].processed = true;
                walk[current].visited = false;
                match walk[current].prev.take() {
                    Some(prev) => current = prev,
                    None => break,
                }
            }
        }
        Ok(())
    };

    match resolve() {
        Ok(()) => {
            debug!(services = installed.len(), "service batch committed");
            for (_, controller) in &installed {
                controller.commit();
            }
            Ok(())
        }
        Err(install_error) => {
            // Nothing has started (every controller is still gated), so the
            // rollback is silent: unpublish and unlink in reverse order.
            for (name, controller) in installed.iter().rev() {
                inner.registry.remove_if(name, controller);
                controller.discard();
            }
            Err(install_error)
        }
    }
}

/// Reconstructs the cycle by following the back-links from the entry that
/// attempted the descent up to the re-entered entry.
fn cycle_path(
    reentered: usize,
    from: usize,
    walk: &[Walk],
    entries: &[BatchEntry],
) -> Vec<ServiceName> {
    let mut path = vec![entries[reentered].name.clone()];
    let mut at = Some(from);
    while let Some(position) = at {
        path.push(entries[position].name.clone());
        if position == reentered {
            break;
        }
        at = walk[position].prev;
    }
    path.reverse();
    path
}

fn create_controller(
    container: &Arc<ContainerInner>,
    entry: &mut BatchEntry,
    dependencies: Vec<Arc<ControllerInner>>,
    batch_listeners: &[Arc<dyn ServiceListener>],
) -> Arc<ControllerInner> {
    // Attachment order: the installer's unregister listener first, then
    // batch-wide listeners, then per-service listeners. All are in place
    // before the controller can observe any event.
    let mut listeners: Vec<Arc<dyn ServiceListener>> =
        Vec::with_capacity(1 + batch_listeners.len() + entry.listeners.len());
    listeners.push(Arc::new(UnregisterListener {
        name: entry.name.clone(),
        container: Arc::downgrade(container),
    }));
    listeners.extend(batch_listeners.iter().cloned());
    listeners.append(&mut entry.listeners);

    let controller = ControllerInner::create(ControllerSettings {
        name: entry.name.clone(),
        executor: container.executor.clone(),
        mode: entry.mode,
        dependencies,
        injections: mem::take(&mut entry.injections),
        provided: mem::take(&mut entry.provided),
        listeners,
        service: mem::replace(&mut entry.service, ServiceSlot::Engaged),
    });

    // Subscribe to each dependency. The snapshot returned by the link keeps
    // the pending counter consistent with every event delivered afterward.
    for dependency in controller.dependencies() {
        match dependency.link_dependent(&controller) {
            LinkSnapshot::Up => controller.dependency_up(),
            LinkSnapshot::Retiring => controller.note_linked_retiring(),
            LinkSnapshot::NotUp => {}
        }
    }

    controller
}

/// Attached by the installer to every controller it creates: when the
/// service is removed, its registry slot is released. The slot staying
/// occupied until this fires is what prevents a re-install from racing an
/// in-progress removal.
struct UnregisterListener {
    name: ServiceName,
    container: Weak<ContainerInner>,
}

impl ServiceListener for UnregisterListener {
    fn service_removed(&self, controller: &ServiceController) {
        let Some(container) = self.container.upgrade() else {
            return;
        };
        match container.registry.remove_if(&self.name, controller.inner_ref()) {
            RemoveOutcome::Removed => {}
            RemoveOutcome::Mismatch | RemoveOutcome::Absent => {
                error!(service = %self.name, "removed service was not the registered controller");
            }
        }
    }
}
