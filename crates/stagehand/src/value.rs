// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Lazy, shareable value handles and the write sinks that feed them.
//!
//! A [`Value<T>`] is a read-only handle that may or may not be able to
//! produce a `T` yet; its dual, [`Injector<T>`][crate::Injector], populates
//! or clears the underlying storage. Controllers move data between services
//! by reading a source value and feeding a destination injector at the right
//! points of the lifecycle.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::ValueError;

/// A lazy, read-only handle to a `T`.
///
/// Reading with [`get`][Value::get] either produces an owned `T` or fails
/// with [`ValueError::Invalid`] when the value is not (or no longer)
/// available. Handles are cheap to clone and share the underlying storage.
///
/// # Variants
///
/// | Constructor | Behavior of `get()` |
/// |---|---|
/// | [`Value::immediate`] | always returns a clone of the captured value |
/// | [`InjectedValue::value`] | the last injected value, if any |
/// | [`Value::thread_local`] | the value bound on the current thread during construction |
/// | [`Value::translated`] / [`Value::mapped`] | a function of another value |
/// | [`Value::constructed`] | runs a factory with its input bound on the thread slot |
///
/// # Examples
///
/// ```
/// use stagehand::Value;
///
/// let port = Value::immediate(8080u16);
/// let display = Value::mapped(port.clone(), |p| format!("127.0.0.1:{p}"));
///
/// assert_eq!(port.get().unwrap(), 8080);
/// assert_eq!(display.get().unwrap(), "127.0.0.1:8080");
/// ```
pub struct Value<T> {
    kind: Arc<ValueKind<T>>,
}

enum ValueKind<T> {
    Immediate(T),
    Injected(Arc<RwLock<Option<T>>>),
    ThreadLocal,
    Translated(Box<dyn Fn() -> Result<T, ValueError> + Send + Sync>),
    Constructed(Box<dyn Fn() -> Result<T, ValueError> + Send + Sync>),
}

impl<T> Clone for Value<T> {
    fn clone(&self) -> Self {
        Self {
            kind: Arc::clone(&self.kind),
        }
    }
}

impl<T> fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &*self.kind {
            ValueKind::Immediate(_) => "immediate",
            ValueKind::Injected(_) => "injected",
            ValueKind::ThreadLocal => "thread-local",
            ValueKind::Translated(_) => "translated",
            ValueKind::Constructed(_) => "constructed",
        };
        f.debug_tuple("Value").field(&kind).finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Value<T> {
    /// A value that is always available.
    #[must_use]
    pub fn immediate(value: T) -> Self {
        Self::from_kind(ValueKind::Immediate(value))
    }

    /// The value bound on the current thread's construction slot.
    ///
    /// The slot is populated only for the duration of a
    /// [`constructed`][Value::constructed] factory call; reading it anywhere
    /// else, or reading it as a different type than was bound, fails with
    /// [`ValueError::Invalid`].
    #[must_use]
    pub fn thread_local() -> Self {
        Self::from_kind(ValueKind::ThreadLocal)
    }

    /// A value computed from `source` by a fallible translator.
    ///
    /// `get()` reads `source` first, propagating its failure unchanged;
    /// translator errors are wrapped in [`ValueError::Translation`].
    #[must_use]
    pub fn translated<S, F>(source: Value<S>, translator: F) -> Self
    where
        S: Clone + Send + Sync + 'static,
        F: Fn(S) -> Result<T, Box<dyn std::error::Error + Send + Sync>> + Send + Sync + 'static,
    {
        Self::from_kind(ValueKind::Translated(Box::new(move || {
            translator(source.get()?).map_err(ValueError::Translation)
        })))
    }

    /// A value computed from `source` by an infallible function.
    #[must_use]
    pub fn mapped<S, F>(source: Value<S>, map: F) -> Self
    where
        S: Clone + Send + Sync + 'static,
        F: Fn(S) -> T + Send + Sync + 'static,
    {
        Self::from_kind(ValueKind::Translated(Box::new(move || {
            Ok(map(source.get()?))
        })))
    }

    /// A value produced by running `factory` with `input` bound on the
    /// current thread's construction slot.
    ///
    /// On every `get()`, `input` is read first (its failure propagates), the
    /// result is bound on the thread slot, and `factory` runs with the
    /// binding in place; the factory can reach the input through
    /// [`Value::thread_local`]. The prior binding is restored on every exit
    /// path, including panics, so constructions nest.
    ///
    /// # Examples
    ///
    /// ```
    /// use stagehand::Value;
    ///
    /// let input = Value::immediate(7i32);
    /// let product = Value::constructed(input, || {
    ///     let seven = Value::<i32>::thread_local().get()?;
    ///     Ok(seven * 6)
    /// });
    ///
    /// assert_eq!(product.get().unwrap(), 42);
    /// ```
    #[must_use]
    pub fn constructed<I, F>(input: Value<I>, factory: F) -> Self
    where
        I: Clone + Send + Sync + 'static,
        F: Fn() -> Result<T, ValueError> + Send + Sync + 'static,
    {
        Self::from_kind(ValueKind::Constructed(Box::new(move || {
            let bound = input.get()?;
            let _binding = bind_construction_input(Box::new(bound));
            factory()
        })))
    }

    /// Reads the value.
    ///
    /// # Errors
    ///
    /// [`ValueError::Invalid`] when the value is not currently available;
    /// [`ValueError::Translation`] when a translator failed.
    pub fn get(&self) -> Result<T, ValueError> {
        match &*self.kind {
            ValueKind::Immediate(value) => Ok(value.clone()),
            ValueKind::Injected(slot) => slot.read().clone().ok_or(ValueError::Invalid),
            ValueKind::ThreadLocal => read_construction_slot(),
            ValueKind::Translated(produce) | ValueKind::Constructed(produce) => produce(),
        }
    }

    fn from_kind(kind: ValueKind<T>) -> Self {
        Self {
            kind: Arc::new(kind),
        }
    }

    pub(crate) fn from_slot(slot: Arc<RwLock<Option<T>>>) -> Self {
        Self::from_kind(ValueKind::Injected(slot))
    }
}

/// A slot that is readable only after an injector has populated it.
///
/// The slot hands out paired ends: [`value`][InjectedValue::value] for
/// readers and [`injector`][InjectedValue::injector] for the writer. Reads
/// fail with [`ValueError::Invalid`] until `inject` runs and again after
/// `uninject`. An injection is observed atomically by subsequent reads.
///
/// # Examples
///
/// ```
/// use stagehand::InjectedValue;
///
/// let slot = InjectedValue::new();
/// assert!(slot.value().get().is_err());
///
/// slot.injector().inject("ready").unwrap();
/// assert_eq!(slot.value().get().unwrap(), "ready");
///
/// slot.injector().uninject();
/// assert!(slot.value().get().is_err());
/// ```
pub struct InjectedValue<T> {
    slot: Arc<RwLock<Option<T>>>,
}

impl<T> InjectedValue<T> {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
        }
    }

    pub(crate) fn slot(&self) -> Arc<RwLock<Option<T>>> {
        Arc::clone(&self.slot)
    }
}

impl<T: Clone + Send + Sync + 'static> InjectedValue<T> {
    /// The read end of the slot.
    #[must_use]
    pub fn value(&self) -> Value<T> {
        Value::from_slot(self.slot())
    }
}

impl<T> Default for InjectedValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for InjectedValue<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for InjectedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectedValue")
            .field("populated", &self.slot.read().is_some())
            .finish()
    }
}

thread_local! {
    static CONSTRUCTION_SLOT: RefCell<Option<Box<dyn Any + Send>>> = const { RefCell::new(None) };
}

/// Restores the prior slot contents when dropped, so bindings nest and
/// survive panics in the factory.
struct SlotBinding {
    prior: Option<Box<dyn Any + Send>>,
}

impl Drop for SlotBinding {
    fn drop(&mut self) {
        let prior = self.prior.take();
        CONSTRUCTION_SLOT.with(|slot| *slot.borrow_mut() = prior);
    }
}

fn bind_construction_input(value: Box<dyn Any + Send>) -> SlotBinding {
    let prior = CONSTRUCTION_SLOT.with(|slot| slot.borrow_mut().replace(value));
    SlotBinding { prior }
}

fn read_construction_slot<T: Clone + 'static>() -> Result<T, ValueError> {
    CONSTRUCTION_SLOT.with(|slot| {
        slot.borrow()
            .as_ref()
            .and_then(|bound| bound.downcast_ref::<T>())
            .cloned()
            .ok_or(ValueError::Invalid)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Value<u32>: Send, Sync, Clone);
        static_assertions::assert_impl_all!(InjectedValue<u32>: Send, Sync, Clone);
    }

    #[test]
    fn immediate_returns_clones() {
        let value = Value::immediate(vec![1, 2, 3]);
        assert_eq!(value.get().unwrap(), vec![1, 2, 3]);
        assert_eq!(value.get().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn injected_slot_round_trip() {
        let slot = InjectedValue::new();
        let reader = slot.value();

        assert!(matches!(reader.get(), Err(ValueError::Invalid)));
        slot.injector().inject(11).unwrap();
        assert_eq!(reader.get().unwrap(), 11);
        slot.injector().uninject();
        assert!(matches!(reader.get(), Err(ValueError::Invalid)));
    }

    #[test]
    fn translated_propagates_source_failure() {
        let slot = InjectedValue::<u32>::new();
        let doubled = Value::mapped(slot.value(), |n| n * 2);

        assert!(matches!(doubled.get(), Err(ValueError::Invalid)));
        slot.injector().inject(21).unwrap();
        assert_eq!(doubled.get().unwrap(), 42);
    }

    #[test]
    fn translated_wraps_translator_errors() {
        let value: Value<u32> = Value::translated(Value::immediate("nope"), |text| {
            text.parse::<u32>().map_err(Into::into)
        });
        assert!(matches!(value.get(), Err(ValueError::Translation(_))));

        let value: Value<u32> = Value::translated(Value::immediate("42"), |text| {
            text.parse::<u32>().map_err(Into::into)
        });
        assert_eq!(value.get().unwrap(), 42);
    }

    #[test]
    fn thread_local_is_unbound_outside_construction() {
        assert!(matches!(
            Value::<i32>::thread_local().get(),
            Err(ValueError::Invalid)
        ));
    }

    #[test]
    fn constructed_binds_and_restores() {
        let product = Value::constructed(Value::immediate(6i32), || {
            let input = Value::<i32>::thread_local().get()?;
            Ok(input * 7)
        });

        assert_eq!(product.get().unwrap(), 42);
        // The binding does not leak past the construction.
        assert!(matches!(
            Value::<i32>::thread_local().get(),
            Err(ValueError::Invalid)
        ));
    }

    #[test]
    fn constructions_nest() {
        let inner = Value::constructed(Value::immediate("inner"), || {
            Value::<&str>::thread_local().get()
        });
        let outer = Value::constructed(Value::immediate("outer"), move || {
            let nested = inner.get()?;
            let own = Value::<&str>::thread_local().get()?;
            Ok(format!("{own}/{nested}"))
        });

        assert_eq!(outer.get().unwrap(), "outer/inner");
    }

    #[test]
    fn wrong_type_reads_as_unbound() {
        let value = Value::constructed(Value::immediate(1u8), || {
            // Bound as u8, read as u64: treated the same as no binding.
            Value::<u64>::thread_local().get()
        });
        assert!(matches!(value.get(), Err(ValueError::Invalid)));
    }

    #[test]
    fn binding_is_restored_when_the_factory_panics() {
        let explosive = Value::<i32>::constructed(Value::immediate(1i32), || panic!("boom"));
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| explosive.get()));
        assert!(result.is_err());
        assert!(matches!(
            Value::<i32>::thread_local().get(),
            Err(ValueError::Invalid)
        ));
    }
}
