// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;

use crate::context::{StartContext, StopContext};
use crate::error::{StartError, ValueError};

/// A unit of work hosted by the container.
///
/// The container drives a service through its lifecycle on executor threads:
/// `start` when all dependencies are up, `stop` when the service must come
/// down. Both callbacks complete synchronously by returning, or
/// asynchronously after calling [`asynchronous`][StartContext::asynchronous]
/// on their context.
///
/// `value()` exposes the data this service provides to others (connection
/// handles, configuration, whatever the service exists to produce). The
/// container calls it only between successful start completion and stop, to
/// satisfy [`provides`][crate::ServiceBuilder::provides] declarations.
/// Services with nothing to expose use `Value = ()`.
///
/// # Examples
///
/// ```
/// use stagehand::{Service, StartContext, StartError, StopContext};
///
/// struct Listener {
///     port: u16,
/// }
///
/// impl Service for Listener {
///     type Value = u16;
///
///     fn start(&mut self, _context: &StartContext) -> Result<(), StartError> {
///         // bind sockets, spawn workers, ...
///         Ok(())
///     }
///
///     fn stop(&mut self, _context: &StopContext) {
///         // close sockets, drain workers, ...
///     }
///
///     fn value(&self) -> u16 {
///         self.port
///     }
/// }
/// ```
pub trait Service: Send + 'static {
    /// The data this service exposes while it is up.
    type Value: Clone + Send + Sync + 'static;

    /// Starts the service.
    ///
    /// Returning `Ok(())` without having called
    /// [`asynchronous`][StartContext::asynchronous] completes the start;
    /// returning `Err` fails it. A panic is treated as a failed start.
    fn start(&mut self, context: &StartContext) -> Result<(), StartError>;

    /// Stops the service.
    ///
    /// Returning without having called
    /// [`asynchronous`][StopContext::asynchronous] completes the stop. Stops
    /// cannot fail; a panic is logged and treated as completed.
    fn stop(&mut self, context: &StopContext);

    /// The value this service provides.
    fn value(&self) -> Self::Value;
}

/// Creates a [`Service`] from a pair of closures, with `Value = ()`.
///
/// # Examples
///
/// ```
/// use stagehand::service_fn;
///
/// let service = service_fn(
///     |_start| {
///         println!("up");
///         Ok(())
///     },
///     |_stop| println!("down"),
/// );
/// # let _ = service;
/// ```
pub fn service_fn<F, G>(start: F, stop: G) -> FnService<F, G>
where
    F: FnMut(&StartContext) -> Result<(), StartError> + Send + 'static,
    G: FnMut(&StopContext) + Send + 'static,
{
    FnService { start, stop }
}

/// The service type returned by [`service_fn`].
pub struct FnService<F, G> {
    start: F,
    stop: G,
}

impl<F, G> Service for FnService<F, G>
where
    F: FnMut(&StartContext) -> Result<(), StartError> + Send + 'static,
    G: FnMut(&StopContext) + Send + 'static,
{
    type Value = ();

    fn start(&mut self, context: &StartContext) -> Result<(), StartError> {
        (self.start)(context)
    }

    fn stop(&mut self, context: &StopContext) {
        (self.stop)(context);
    }

    fn value(&self) -> Self::Value {}
}

/// Creates a [`Service`] that exists only to expose a value.
///
/// Start and stop are no-ops; the value is available to
/// [`provides`][crate::ServiceBuilder::provides] declarations whenever the
/// service is up.
pub fn provider<V: Clone + Send + Sync + 'static>(value: V) -> ValueService<V> {
    ValueService { value }
}

/// The service type returned by [`provider`].
pub struct ValueService<V> {
    value: V,
}

impl<V: Clone + Send + Sync + 'static> Service for ValueService<V> {
    type Value = V;

    fn start(&mut self, _context: &StartContext) -> Result<(), StartError> {
        Ok(())
    }

    fn stop(&mut self, _context: &StopContext) {}

    fn value(&self) -> V {
        self.value.clone()
    }
}

/// Object-safe view of a [`Service`], used by controllers.
pub(crate) trait DynService: Send {
    fn start_dyn(&mut self, context: &StartContext) -> Result<(), StartError>;
    fn stop_dyn(&mut self, context: &StopContext);
    fn value_any(&self) -> Box<dyn Any + Send>;
}

impl<S: Service> DynService for S {
    fn start_dyn(&mut self, context: &StartContext) -> Result<(), StartError> {
        self.start(context)
    }

    fn stop_dyn(&mut self, context: &StopContext) {
        self.stop(context);
    }

    fn value_any(&self) -> Box<dyn Any + Send> {
        Box::new(self.value())
    }
}

/// Holds a controller's service object: either a not-yet-built factory, the
/// built instance, or nothing while a lifecycle callback owns the instance.
pub(crate) enum ServiceSlot {
    Lazy(Box<dyn FnMut() -> Result<Box<dyn DynService>, ValueError> + Send>),
    Ready(Box<dyn DynService>),
    Engaged,
}
