// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use crate::batch::BatchBuilder;
use crate::controller::{Mode, ServiceController};
use crate::error::ServiceNotFound;
use crate::executor::Executor;
use crate::name::ServiceName;
use crate::registry::Registry;

pub(crate) struct ContainerInner {
    pub(crate) registry: Registry,
    pub(crate) executor: Executor,
}

/// A population of named services with dependency-ordered lifecycles.
///
/// Services are added in atomically-installed batches; each installed
/// service is driven through its lifecycle by a per-service controller,
/// starting only when every dependency is up and stopping before any
/// dependency does. The container is a cheap handle; clones share the same
/// registry and executor.
///
/// # Examples
///
/// ```
/// use stagehand::{ServiceContainer, ServiceName, State, service_fn};
///
/// let container = ServiceContainer::new();
/// let mut batch = container.batch_builder();
/// batch.add_service(ServiceName::of("db"), service_fn(|_| Ok(()), |_| ()))?;
/// batch.install()?;
///
/// let controller = container.required_service(&ServiceName::of("db")).unwrap();
/// assert_ne!(controller.state(), State::Removed);
/// # Ok::<(), stagehand::InstallError>(())
/// ```
#[derive(Clone)]
pub struct ServiceContainer {
    inner: Arc<ContainerInner>,
}

impl ServiceContainer {
    /// Creates a container with its own default [`Executor`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_executor(Executor::new())
    }

    /// Creates a container running lifecycle work on `executor`. Executors
    /// may be shared between containers.
    #[must_use]
    pub fn with_executor(executor: Executor) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                registry: Registry::new(),
                executor,
            }),
        }
    }

    /// Starts a new batch of service definitions.
    #[must_use]
    pub fn batch_builder(&self) -> BatchBuilder {
        BatchBuilder::new(self.clone())
    }

    /// Looks up an installed service. Non-blocking; `None` when the name is
    /// not registered.
    #[must_use]
    pub fn service(&self, name: &ServiceName) -> Option<ServiceController> {
        self.inner
            .registry
            .get(name)
            .map(ServiceController::from_inner)
    }

    /// Looks up an installed service that is required to exist.
    ///
    /// # Errors
    ///
    /// [`ServiceNotFound`] when the name is not registered.
    pub fn required_service(
        &self,
        name: &ServiceName,
    ) -> Result<ServiceController, ServiceNotFound> {
        self.service(name).ok_or_else(|| ServiceNotFound {
            name: name.clone(),
        })
    }

    /// Asks every installed service to stop by setting its mode to
    /// [`Mode::Never`]. Best effort and non-blocking: services drain in
    /// dependency order on the executor.
    pub fn shutdown(&self) {
        for controller in self.inner.registry.controllers() {
            ServiceController::from_inner(controller).set_mode(Mode::Never);
        }
    }

    pub(crate) fn inner(&self) -> &Arc<ContainerInner> {
        &self.inner
    }
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("services", &self.inner.registry.controllers().len())
            .finish()
    }
}
