// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{InjectionError, StartError};
use crate::service::DynService;
use crate::value::{InjectedValue, Value};

/// A write sink for a `T`: the dual of a [`Value`].
///
/// Controllers drive injectors as a side effect of the lifecycle: each
/// declared `(source, destination)` pair is injected while a service comes
/// up and uninjected, in reverse order, when it goes down.
///
/// The slot-backed variant pairs with an [`InjectedValue`]; the
/// closure-backed variant ([`Injector::from_fns`]) adapts arbitrary sinks.
pub struct Injector<T> {
    kind: InjectorKind<T>,
}

enum InjectorKind<T> {
    Slot(Arc<RwLock<Option<T>>>),
    Custom(Arc<CustomInjector<T>>),
}

struct CustomInjector<T> {
    inject: Box<dyn Fn(T) -> Result<(), InjectionError> + Send + Sync>,
    uninject: Box<dyn Fn() + Send + Sync>,
}

impl<T> Injector<T> {
    /// Creates an injector from a pair of closures.
    ///
    /// `inject` may reject the value; `uninject` clears whatever `inject`
    /// populated and must tolerate being called when nothing was injected.
    #[must_use]
    pub fn from_fns<I, U>(inject: I, uninject: U) -> Self
    where
        I: Fn(T) -> Result<(), InjectionError> + Send + Sync + 'static,
        U: Fn() + Send + Sync + 'static,
    {
        Self {
            kind: InjectorKind::Custom(Arc::new(CustomInjector {
                inject: Box::new(inject),
                uninject: Box::new(uninject),
            })),
        }
    }

    /// Populates the destination.
    ///
    /// The new value is observed atomically by any subsequent read of a
    /// paired [`Value`].
    ///
    /// # Errors
    ///
    /// [`InjectionError`] when the destination rejects the value.
    pub fn inject(&self, value: T) -> Result<(), InjectionError> {
        match &self.kind {
            InjectorKind::Slot(slot) => {
                *slot.write() = Some(value);
                Ok(())
            }
            InjectorKind::Custom(custom) => (custom.inject)(value),
        }
    }

    /// Clears the destination; subsequent reads of a paired [`Value`] fail.
    pub fn uninject(&self) {
        match &self.kind {
            InjectorKind::Slot(slot) => *slot.write() = None,
            InjectorKind::Custom(custom) => (custom.uninject)(),
        }
    }
}

impl<T> InjectedValue<T> {
    /// The write end of the slot.
    #[must_use]
    pub fn injector(&self) -> Injector<T> {
        Injector {
            kind: InjectorKind::Slot(self.slot()),
        }
    }
}

impl<T> Clone for Injector<T> {
    fn clone(&self) -> Self {
        let kind = match &self.kind {
            InjectorKind::Slot(slot) => InjectorKind::Slot(Arc::clone(slot)),
            InjectorKind::Custom(custom) => InjectorKind::Custom(Arc::clone(custom)),
        };
        Self { kind }
    }
}

impl<T> fmt::Debug for Injector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            InjectorKind::Slot(_) => "slot",
            InjectorKind::Custom(_) => "custom",
        };
        f.debug_tuple("Injector").field(&kind).finish()
    }
}

/// A type-erased `(source, destination)` pair, executed before the start
/// callback and reverted after stop (or after a failed start).
pub(crate) struct Injection {
    apply: Box<dyn Fn() -> Result<(), StartError> + Send + Sync>,
    revert: Box<dyn Fn() + Send + Sync>,
}

impl Injection {
    pub(crate) fn new<T: Clone + Send + Sync + 'static>(
        source: Value<T>,
        destination: Injector<T>,
    ) -> Self {
        let revert_end = destination.clone();
        Self {
            apply: Box::new(move || {
                let value = source
                    .get()
                    .map_err(|e| StartError::caused_by("failed to read injection source", e))?;
                destination
                    .inject(value)
                    .map_err(|e| StartError::caused_by("injection destination rejected value", e))
            }),
            revert: Box::new(move || revert_end.uninject()),
        }
    }

    pub(crate) fn inject(&self) -> Result<(), StartError> {
        (self.apply)()
    }

    pub(crate) fn uninject(&self) {
        (self.revert)();
    }
}

/// A type-erased transfer of the service's own value into a destination,
/// executed after the start callback completes and reverted on stop.
pub(crate) struct ProvidedInjection {
    apply: Box<dyn Fn(&dyn DynService) -> Result<(), StartError> + Send + Sync>,
    revert: Box<dyn Fn() + Send + Sync>,
}

impl ProvidedInjection {
    pub(crate) fn new<V: Clone + Send + Sync + 'static>(destination: Injector<V>) -> Self {
        let revert_end = destination.clone();
        Self {
            apply: Box::new(move |service| match service.value_any().downcast::<V>() {
                Ok(value) => destination
                    .inject(*value)
                    .map_err(|e| StartError::caused_by("injection destination rejected value", e)),
                Err(_) => Err(StartError::new(
                    "service value type does not match the declared injection",
                )),
            }),
            revert: Box::new(move || revert_end.uninject()),
        }
    }

    pub(crate) fn inject(&self, service: &dyn DynService) -> Result<(), StartError> {
        (self.apply)(service)
    }

    pub(crate) fn uninject(&self) {
        (self.revert)();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::error::ValueError;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Injector<u32>: Send, Sync, Clone);
    }

    #[test]
    fn custom_injector_can_reject() {
        let cleared = Arc::new(AtomicBool::new(false));
        let cleared_by_uninject = Arc::clone(&cleared);

        let injector = Injector::from_fns(
            |n: u32| {
                if n == 0 {
                    Err(InjectionError::new("zero is not a port"))
                } else {
                    Ok(())
                }
            },
            move || cleared_by_uninject.store(true, Ordering::Release),
        );

        assert!(injector.inject(0).is_err());
        assert!(injector.inject(8080).is_ok());
        injector.uninject();
        assert!(cleared.load(Ordering::Acquire));
    }

    #[test]
    fn injection_pair_moves_the_value() {
        let source = InjectedValue::new();
        let destination = InjectedValue::new();
        let injection = Injection::new(source.value(), destination.injector());

        // Source unpopulated: the transfer fails with the value error attached.
        let error = injection.inject().unwrap_err();
        assert!(error.to_string().contains("injection source"));

        source.injector().inject("payload").unwrap();
        injection.inject().unwrap();
        assert_eq!(destination.value().get().unwrap(), "payload");

        injection.uninject();
        assert!(matches!(
            destination.value().get(),
            Err(ValueError::Invalid)
        ));
    }
}
