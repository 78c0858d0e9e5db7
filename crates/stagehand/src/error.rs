// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::name::ServiceName;

/// An error aborting a batch install.
///
/// Any of these leaves the registry exactly as it was before the batch was
/// committed; partially installed controllers are rolled back.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InstallError {
    /// A declared dependency exists neither in the registry nor in the batch.
    #[error("missing dependency: `{dependent}` depends on `{dependency}`, which cannot be found")]
    MissingDependency {
        /// The service declaring the dependency.
        dependent: ServiceName,
        /// The name that could not be resolved.
        dependency: ServiceName,
    },

    /// The dependency walk re-entered a service already on the active path.
    #[error("circular dependency discovered: {path:?}")]
    CircularDependency {
        /// The cycle, starting and ending with the re-entered service.
        path: Vec<ServiceName>,
    },

    /// A service name is already taken, either within the batch or by an
    /// installed controller.
    #[error("duplicate service name `{name}`")]
    DuplicateService {
        /// The contested name.
        name: ServiceName,
    },

    /// The batch could not be resolved for a reason not covered by the more
    /// specific variants.
    #[error("batch resolution failed: {0}")]
    Resolution(String),
}

/// Returned by [`ServiceContainer::required_service`][crate::ServiceContainer::required_service]
/// when no controller is registered under the requested name.
#[derive(Debug, Error)]
#[error("service `{name}` not found")]
pub struct ServiceNotFound {
    pub(crate) name: ServiceName,
}

impl ServiceNotFound {
    /// The name that was looked up.
    #[must_use]
    pub fn name(&self) -> &ServiceName {
        &self.name
    }
}

/// An error reading a [`Value`][crate::Value].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ValueError {
    /// The value has not been populated (or has been uninjected, or no value
    /// is bound on the current thread).
    #[error("value is not available for reading")]
    Invalid,

    /// A value translation failed; the underlying cause is attached.
    #[error("value translation failed")]
    Translation(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// An injector rejected a value.
#[derive(Debug, Error)]
#[error("injection rejected: {reason}")]
pub struct InjectionError {
    reason: String,
}

impl InjectionError {
    /// Creates a rejection with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A failed start transition.
///
/// Carried by the start context's `failed` call, produced when a `start`
/// callback returns an error or panics, and produced internally when value
/// injection fails. The error is retained by the controller while it is in
/// the `StartFailed` state and handed to every listener observing the failed
/// transition, so it is cheaply cloneable.
#[derive(Debug, Clone)]
pub struct StartError {
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl StartError {
    /// Creates a start failure with a message and no underlying cause.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a start failure wrapping an underlying cause.
    #[must_use]
    pub fn caused_by(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn std::error::Error + 'static))
    }
}

impl From<ContextError> for StartError {
    /// Lets a start callback propagate context misuse as a start failure
    /// with `?`.
    fn from(error: ContextError) -> Self {
        Self::caused_by("lifecycle context misuse", error)
    }
}

/// Misuse of a lifecycle context.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContextError {
    /// The action was already completed (or failed); the context is spent.
    #[error("the lifecycle action has already been completed")]
    AlreadyCompleted,

    /// `failed` was called on an action that never declared itself
    /// asynchronous.
    #[error("`failed` requires `asynchronous` to be called first")]
    NotAsynchronous,
}
