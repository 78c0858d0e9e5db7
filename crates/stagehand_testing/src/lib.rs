// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test support for the stagehand service container.
//!
//! Lifecycle progress is asynchronous, so tests need a way to wait for it
//! without hanging a run when something goes wrong. Everything here is
//! bounded: [`TransitionLog`] waits on a condition variable fed by listener
//! notifications, [`wait_until`] polls an arbitrary predicate, and both give
//! up after their timeout instead of blocking forever.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use stagehand::{ServiceController, ServiceListener, ServiceName, State};

/// If something (whatever) does not happen in a test within this time, the
/// test should fail. Generous on purpose: this exists to break out of a
/// wedged container, not to assert on timing.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Polls `condition` until it holds or `timeout` elapses; returns the final
/// evaluation.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// One observed state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub service: ServiceName,
    pub from: State,
    pub to: State,
}

/// A listener that records every transition it observes, in order, and
/// supports bounded waiting for a particular one.
///
/// The log is cheap to clone; clones share the same storage, so one log can
/// be registered batch-wide and queried from the test body.
///
/// # Examples
///
/// ```
/// use stagehand::{ServiceContainer, ServiceName, State, service_fn};
/// use stagehand_testing::{TEST_TIMEOUT, TransitionLog};
///
/// let container = ServiceContainer::new();
/// let log = TransitionLog::new();
///
/// let mut batch = container.batch_builder();
/// batch.add_listener(log.clone());
/// batch.add_service(ServiceName::of("svc"), service_fn(|_| Ok(()), |_| ()))?;
/// batch.install()?;
///
/// assert!(log.await_transition(&ServiceName::of("svc"), State::Up, TEST_TIMEOUT));
/// # Ok::<(), stagehand::InstallError>(())
/// ```
#[derive(Clone, Default)]
pub struct TransitionLog {
    shared: Arc<LogShared>,
}

#[derive(Default)]
struct LogShared {
    entries: Mutex<Vec<Transition>>,
    changed: Condvar,
}

impl TransitionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything observed so far, in observation order.
    #[must_use]
    pub fn history(&self) -> Vec<Transition> {
        self.shared.entries.lock().clone()
    }

    /// The services that entered `state`, in the order they did.
    #[must_use]
    pub fn entering(&self, state: State) -> Vec<ServiceName> {
        self.shared
            .entries
            .lock()
            .iter()
            .filter(|transition| transition.to == state)
            .map(|transition| transition.service.clone())
            .collect()
    }

    /// Waits until `service` has been observed entering `to`, or `timeout`
    /// elapses. Returns whether the transition was observed.
    ///
    /// Only entries that arrived since the last wakeup are examined, so
    /// waiting stays cheap even when thousands of services are transitioning.
    pub fn await_transition(&self, service: &ServiceName, to: State, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut entries = self.shared.entries.lock();
        let mut scanned = 0;
        loop {
            if scanned > entries.len() {
                // The log was cleared under us; start over.
                scanned = 0;
            }
            while scanned < entries.len() {
                let transition = &entries[scanned];
                scanned += 1;
                if transition.to == to && transition.service == *service {
                    return true;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let _ = self.shared.changed.wait_for(&mut entries, deadline - now);
        }
    }

    /// The position of the first observation of `service` entering `to`, if
    /// any. Useful for cross-service ordering assertions.
    #[must_use]
    pub fn position_of(&self, service: &ServiceName, to: State) -> Option<usize> {
        self.shared
            .entries
            .lock()
            .iter()
            .position(|transition| transition.service == *service && transition.to == to)
    }

    /// Forgets everything observed so far.
    pub fn clear(&self) {
        self.shared.entries.lock().clear();
    }
}

impl ServiceListener for TransitionLog {
    fn transition(&self, controller: &ServiceController, old: State, new: State) {
        let mut entries = self.shared.entries.lock();
        entries.push(Transition {
            service: controller.name().clone(),
            from: old,
            to: new,
        });
        self.shared.changed.notify_all();
    }
}
