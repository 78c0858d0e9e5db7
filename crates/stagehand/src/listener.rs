// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::controller::{ServiceController, State};
use crate::error::StartError;

/// Observer of a controller's lifecycle.
///
/// Every method has a default no-op implementation; implementors override
/// only the transitions they care about. For each state change the
/// controller first invokes [`transition`][ServiceListener::transition] and
/// then the matching convenience method, in transition order for that
/// controller.
///
/// Listeners run on the thread performing the transition (an executor thread,
/// or whichever thread completed an asynchronous context) and should not
/// block for long. A panicking listener is caught and logged; it never
/// affects controller state.
#[allow(unused_variables)]
pub trait ServiceListener: Send + Sync + 'static {
    /// Called on every state change.
    fn transition(&self, controller: &ServiceController, old: State, new: State) {}

    /// The controller left `Down` and scheduled its start.
    fn service_starting(&self, controller: &ServiceController) {}

    /// The controller reached `Up`.
    fn service_started(&self, controller: &ServiceController) {}

    /// The start failed; `error` is also retained on the controller.
    fn service_failed(&self, controller: &ServiceController, error: &StartError) {}

    /// The controller left `Up` and scheduled its stop.
    fn service_stopping(&self, controller: &ServiceController) {}

    /// The controller reached `Down` after stopping.
    fn service_stopped(&self, controller: &ServiceController) {}

    /// The controller was removed; its registry slot is released.
    fn service_removed(&self, controller: &ServiceController) {}
}
