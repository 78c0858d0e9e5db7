// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A modular service container with dependency-ordered lifecycle management.
//!
//! This crate hosts a population of named services, tracks the dependencies
//! between them, and drives each one through its lifecycle (down → starting
//! → up → stopping → down → removed) while preserving dependency order: a
//! service starts only after everything it depends on is up, and stops
//! before anything it depends on does. Listeners observe every transition,
//! and values flow between services as a side effect of coming up.
//!
//! # Overview
//!
//! - [`ServiceContainer`] - The registry of installed services and the entry
//!   point for installing more.
//! - [`BatchBuilder`] / [`ServiceBuilder`] - Stage a group of service
//!   definitions and commit them atomically; the installer verifies that
//!   every dependency exists and that the graph is acyclic before anything
//!   is published.
//! - [`Service`] - The user-supplied capability: `start`, `stop`, and the
//!   value the service exposes while up. [`service_fn`] and [`provider`]
//!   cover the common shapes.
//! - [`ServiceController`] - Handle to one installed service: state, mode,
//!   retained start failure, removal.
//! - [`StartContext`] / [`StopContext`] - Completion handles that let a
//!   lifecycle action finish asynchronously on any thread.
//! - [`ServiceListener`] - Observer of lifecycle transitions.
//! - [`Value`] / [`Injector`] / [`InjectedValue`] - Lazy value handles and
//!   the sinks that feed them; the mechanism behind cross-service wiring.
//! - [`Executor`] - Where lifecycle callbacks run; a shared thread pool by
//!   default, pluggable for hosts with their own scheduling.
//!
//! # Example
//!
//! ```
//! use stagehand::{
//!     InjectedValue, ServiceContainer, ServiceName, State, provider, service_fn,
//! };
//!
//! let container = ServiceContainer::new();
//! let endpoint = InjectedValue::new();
//!
//! let mut batch = container.batch_builder();
//!
//! // A configuration service that exposes an endpoint string.
//! batch
//!     .add_service(ServiceName::of("config"), provider("127.0.0.1:9000"))?
//!     .provides(endpoint.injector());
//!
//! // A worker that reads the endpoint during start, once config is up.
//! let reader = endpoint.value();
//! batch
//!     .add_service(
//!         ServiceName::of("worker"),
//!         service_fn(
//!             move |_start| {
//!                 let endpoint = reader.get().expect("config is up before worker starts");
//!                 assert_eq!(endpoint, "127.0.0.1:9000");
//!                 Ok(())
//!             },
//!             |_stop| (),
//!         ),
//!     )?
//!     .add_dependency(ServiceName::of("config"));
//!
//! batch.install()?;
//! # Ok::<(), stagehand::InstallError>(())
//! ```
//!
//! # Concurrency model
//!
//! Lifecycle callbacks run on the container's [`Executor`]; independent
//! services start and stop in parallel, constrained only by the dependency
//! order. For a single service, transitions are totally ordered and its
//! listeners observe exactly that order. A start or stop may declare itself
//! asynchronous and complete later from any thread; nothing times out on its
//! own - a host wanting deadlines calls
//! [`failed`][StartContext::failed] from a watchdog.

mod batch;
mod container;
mod context;
mod controller;
mod error;
mod executor;
mod inject;
mod listener;
mod name;
mod registry;
mod resolver;
mod service;
mod value;

pub use batch::{BatchBuilder, ServiceBuilder};
pub use container::ServiceContainer;
pub use context::{StartContext, StopContext};
pub use controller::{Mode, ServiceController, State};
pub use error::{
    ContextError, InjectionError, InstallError, ServiceNotFound, StartError, ValueError,
};
pub use executor::{Executor, Job};
pub use inject::Injector;
pub use listener::ServiceListener;
pub use name::ServiceName;
pub use service::{FnService, Service, ValueService, provider, service_fn};
pub use value::{InjectedValue, Value};
