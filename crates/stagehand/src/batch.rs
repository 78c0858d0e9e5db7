// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::container::ServiceContainer;
use crate::controller::Mode;
use crate::error::{InstallError, ValueError};
use crate::inject::{Injection, Injector, ProvidedInjection};
use crate::listener::ServiceListener;
use crate::name::ServiceName;
use crate::resolver;
use crate::service::{DynService, Service, ServiceSlot};
use crate::value::Value;

/// Staging area for a group of service definitions installed atomically.
///
/// A batch accumulates services, their dependencies, listeners, and
/// injections, then commits them all with [`install`][BatchBuilder::install].
/// Either every service in the batch is installed or none is. The builder is
/// single-use: `install` consumes it.
///
/// # Examples
///
/// ```
/// use stagehand::{ServiceContainer, ServiceName, service_fn};
///
/// let container = ServiceContainer::new();
/// let mut batch = container.batch_builder();
///
/// batch
///     .add_service(ServiceName::of("worker"), service_fn(|_| Ok(()), |_| ()))?
///     .add_dependency(ServiceName::of("queue"));
/// batch.add_service(ServiceName::of("queue"), service_fn(|_| Ok(()), |_| ()))?;
///
/// batch.install()?;
/// # Ok::<(), stagehand::InstallError>(())
/// ```
pub struct BatchBuilder {
    container: ServiceContainer,
    listeners: Vec<Arc<dyn ServiceListener>>,
    entries: Vec<BatchEntry>,
    index: HashMap<ServiceName, usize>,
}

pub(crate) struct BatchEntry {
    pub(crate) name: ServiceName,
    pub(crate) service: ServiceSlot,
    pub(crate) dependencies: Vec<ServiceName>,
    pub(crate) listeners: Vec<Arc<dyn ServiceListener>>,
    pub(crate) injections: Vec<Injection>,
    pub(crate) provided: Vec<ProvidedInjection>,
    pub(crate) mode: Mode,
}

impl BatchBuilder {
    pub(crate) fn new(container: ServiceContainer) -> Self {
        Self {
            container,
            listeners: Vec::new(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Adds a service under `name`, returning its builder for further
    /// configuration.
    ///
    /// # Errors
    ///
    /// [`InstallError::DuplicateService`] when the batch already contains
    /// `name`. (A clash with an already-installed service is detected at
    /// [`install`][BatchBuilder::install].)
    pub fn add_service<S: Service>(
        &mut self,
        name: ServiceName,
        service: S,
    ) -> Result<ServiceBuilder<'_, S>, InstallError> {
        self.add_entry(name, ServiceSlot::Ready(Box::new(service)))
    }

    /// Adds a service whose object is built by `factory` on the executor
    /// thread during the first start attempt.
    ///
    /// Deferred construction lets the factory participate in the
    /// thread-local construction protocol of
    /// [`Value::constructed`][crate::Value::constructed]; a factory failure
    /// fails the start and is retried on the next start attempt.
    pub fn add_service_lazy<S, F>(
        &mut self,
        name: ServiceName,
        factory: F,
    ) -> Result<ServiceBuilder<'_, S>, InstallError>
    where
        S: Service,
        F: FnMut() -> Result<S, ValueError> + Send + 'static,
    {
        let mut factory = factory;
        self.add_entry(
            name,
            ServiceSlot::Lazy(Box::new(move || {
                factory().map(|service| Box::new(service) as Box<dyn DynService>)
            })),
        )
    }

    /// Adds a listener attached to every service in the batch, before any
    /// per-service listener.
    pub fn add_listener(&mut self, listener: impl ServiceListener) {
        self.listeners.push(Arc::new(listener));
    }

    /// Commits the batch.
    ///
    /// Services are resolved against the live registry and each other,
    /// installed in dependency order, and released to start. On any error
    /// the registry is left exactly as it was before the call.
    ///
    /// # Errors
    ///
    /// [`InstallError::MissingDependency`],
    /// [`InstallError::CircularDependency`], or
    /// [`InstallError::DuplicateService`]; see each variant.
    pub fn install(self) -> Result<(), InstallError> {
        let Self {
            container,
            listeners,
            entries,
            index,
        } = self;
        resolver::install(&container, listeners, entries, &index)
    }

    fn add_entry<S: Service>(
        &mut self,
        name: ServiceName,
        service: ServiceSlot,
    ) -> Result<ServiceBuilder<'_, S>, InstallError> {
        if self.index.contains_key(&name) {
            return Err(InstallError::DuplicateService { name });
        }
        let position = self.entries.len();
        self.index.insert(name.clone(), position);
        self.entries.push(BatchEntry {
            name,
            service,
            dependencies: Vec::new(),
            listeners: Vec::new(),
            injections: Vec::new(),
            provided: Vec::new(),
            mode: Mode::default(),
        });
        Ok(ServiceBuilder {
            entry: &mut self.entries[position],
            _service: PhantomData,
        })
    }
}

impl fmt::Debug for BatchBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchBuilder")
            .field("services", &self.entries.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Configures one service within a batch.
///
/// Obtained from [`BatchBuilder::add_service`]; all methods chain.
pub struct ServiceBuilder<'a, S: Service> {
    entry: &'a mut BatchEntry,
    _service: PhantomData<fn() -> S>,
}

impl<S: Service> ServiceBuilder<'_, S> {
    /// Declares a dependency on `name`.
    ///
    /// Dependencies are attached in declaration order; duplicate
    /// declarations are permitted and ignored. The service will only run
    /// while every dependency is up.
    pub fn add_dependency(&mut self, name: ServiceName) -> &mut Self {
        self.entry.dependencies.push(name);
        self
    }

    /// Attaches a listener to this service only.
    pub fn add_listener(&mut self, listener: impl ServiceListener) -> &mut Self {
        self.entry.listeners.push(Arc::new(listener));
        self
    }

    /// Declares a value transfer performed while this service starts.
    ///
    /// `source` is read and fed to `destination` before the start callback
    /// runs, so the callback observes the injected state; a read or
    /// injection failure fails the start. The transfer is reverted, in
    /// reverse declaration order, after the service stops.
    pub fn add_injection<T: Clone + Send + Sync + 'static>(
        &mut self,
        source: Value<T>,
        destination: Injector<T>,
    ) -> &mut Self {
        self.entry.injections.push(Injection::new(source, destination));
        self
    }

    /// Exposes this service's own value through `destination`.
    ///
    /// The transfer runs after the start callback completes and before the
    /// service reports up, so dependents that wait on this service always
    /// observe the populated destination. Reverted when the service stops.
    pub fn provides(&mut self, destination: Injector<S::Value>) -> &mut Self {
        self.entry
            .provided
            .push(ProvidedInjection::new::<S::Value>(destination));
        self
    }

    /// Sets the mode the service is installed with. Defaults to
    /// [`Mode::Automatic`].
    pub fn initial_mode(&mut self, mode: Mode) -> &mut Self {
        self.entry.mode = mode;
        self
    }
}

impl<S: Service> fmt::Debug for ServiceBuilder<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("name", &self.entry.name)
            .field("dependencies", &self.entry.dependencies)
            .finish()
    }
}
