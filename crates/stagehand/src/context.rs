// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::controller::{ControllerInner, LifecycleOutcome, ServiceController};
use crate::error::{ContextError, StartError};

/// One-shot completion state shared by both context kinds.
///
/// The transition it belongs to stays pending until the context is spent;
/// the outcome is delivered to the controller outside the completion lock.
pub(crate) struct ContextCore {
    controller: Arc<ControllerInner>,
    completion: Mutex<Completion>,
}

enum Completion {
    Pending { asynchronous: bool },
    Done,
}

impl ContextCore {
    fn new(controller: Arc<ControllerInner>) -> Arc<Self> {
        Arc::new(Self {
            controller,
            completion: Mutex::new(Completion::Pending {
                asynchronous: false,
            }),
        })
    }

    fn asynchronous(&self) -> Result<(), ContextError> {
        match &mut *self.completion.lock() {
            Completion::Pending { asynchronous } => {
                *asynchronous = true;
                Ok(())
            }
            Completion::Done => Err(ContextError::AlreadyCompleted),
        }
    }

    /// Pending → Done; errors when the context is already spent.
    fn finish(&self) -> Result<(), ContextError> {
        let mut completion = self.completion.lock();
        match *completion {
            Completion::Pending { .. } => {
                *completion = Completion::Done;
                Ok(())
            }
            Completion::Done => Err(ContextError::AlreadyCompleted),
        }
    }

    /// Pending and not asynchronous → Done. Used on synchronous callback
    /// return; a context held open by `asynchronous()` stays pending.
    fn finish_if_synchronous(&self) -> bool {
        let mut completion = self.completion.lock();
        match *completion {
            Completion::Pending {
                asynchronous: false,
            } => {
                *completion = Completion::Done;
                true
            }
            _ => false,
        }
    }

    /// Pending → Done regardless of the asynchronous flag.
    fn finish_forcibly(&self) -> bool {
        let mut completion = self.completion.lock();
        match *completion {
            Completion::Pending { .. } => {
                *completion = Completion::Done;
                true
            }
            Completion::Done => false,
        }
    }
}

/// The context passed to [`Service::start`][crate::Service::start].
///
/// A start completes in one of three ways:
///
/// - the callback returns `Ok(())` without calling
///   [`asynchronous`][StartContext::asynchronous]: complete;
/// - the callback returns `Err`: failed;
/// - the callback calls `asynchronous()` and returns: the transition stays
///   pending until [`complete`][StartContext::complete] or
///   [`failed`][StartContext::failed] is called, from any thread.
///
/// Contexts are one-shot: at most one of `complete`/`failed` may ever
/// succeed, and every later attempt reports
/// [`ContextError::AlreadyCompleted`] to its caller.
#[derive(Clone)]
pub struct StartContext {
    core: Arc<ContextCore>,
}

impl StartContext {
    pub(crate) fn new(controller: Arc<ControllerInner>) -> Self {
        Self {
            core: ContextCore::new(controller),
        }
    }

    /// Declares that this start finishes later, on some other thread.
    ///
    /// Must be called before the callback returns for the deferral to take
    /// effect. Idempotent while the action is pending.
    ///
    /// # Errors
    ///
    /// [`ContextError::AlreadyCompleted`] once the action has completed.
    pub fn asynchronous(&self) -> Result<(), ContextError> {
        self.core.asynchronous()
    }

    /// Completes the start; the controller proceeds to `Up`.
    ///
    /// # Errors
    ///
    /// [`ContextError::AlreadyCompleted`] if the action already completed or
    /// failed.
    pub fn complete(&self) -> Result<(), ContextError> {
        self.core.finish()?;
        self.core
            .controller
            .lifecycle_outcome(LifecycleOutcome::StartCompleted);
        Ok(())
    }

    /// Fails the start; the controller proceeds to `StartFailed` and retains
    /// `reason`.
    ///
    /// # Errors
    ///
    /// [`ContextError::NotAsynchronous`] unless
    /// [`asynchronous`][StartContext::asynchronous] was called first;
    /// [`ContextError::AlreadyCompleted`] if the action already completed or
    /// failed.
    pub fn failed(&self, reason: StartError) -> Result<(), ContextError> {
        {
            let mut completion = self.core.completion.lock();
            match *completion {
                Completion::Pending { asynchronous: true } => *completion = Completion::Done,
                Completion::Pending {
                    asynchronous: false,
                } => return Err(ContextError::NotAsynchronous),
                Completion::Done => return Err(ContextError::AlreadyCompleted),
            }
        }
        self.core
            .controller
            .lifecycle_outcome(LifecycleOutcome::StartFailed(reason));
        Ok(())
    }

    /// The controller whose start this context belongs to.
    #[must_use]
    pub fn controller(&self) -> ServiceController {
        ServiceController::from_inner(Arc::clone(&self.core.controller))
    }

    /// Applies the callback's synchronous result: `Ok` completes unless the
    /// context was deferred or already spent; `Err` fails the start even if
    /// `asynchronous()` had been called.
    pub(crate) fn finish_sync(&self, result: Result<(), StartError>) {
        match result {
            Ok(()) => {
                if self.core.finish_if_synchronous() {
                    self.core
                        .controller
                        .lifecycle_outcome(LifecycleOutcome::StartCompleted);
                }
            }
            Err(error) => {
                if self.core.finish_forcibly() {
                    self.core
                        .controller
                        .lifecycle_outcome(LifecycleOutcome::StartFailed(error));
                } else {
                    warn!(
                        service = %self.core.controller.name(),
                        %error,
                        "start callback returned an error after its context was completed"
                    );
                }
            }
        }
    }
}

impl fmt::Debug for StartContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartContext")
            .field("service", self.core.controller.name())
            .finish()
    }
}

/// The context passed to [`Service::stop`][crate::Service::stop].
///
/// Stops cannot fail; the only deferral is
/// [`asynchronous`][StopContext::asynchronous] followed by a later
/// [`complete`][StopContext::complete].
#[derive(Clone)]
pub struct StopContext {
    core: Arc<ContextCore>,
}

impl StopContext {
    pub(crate) fn new(controller: Arc<ControllerInner>) -> Self {
        Self {
            core: ContextCore::new(controller),
        }
    }

    /// Declares that this stop finishes later, on some other thread.
    ///
    /// # Errors
    ///
    /// [`ContextError::AlreadyCompleted`] once the action has completed.
    pub fn asynchronous(&self) -> Result<(), ContextError> {
        self.core.asynchronous()
    }

    /// Completes the stop; the controller proceeds to `Down`.
    ///
    /// # Errors
    ///
    /// [`ContextError::AlreadyCompleted`] if the action already completed.
    pub fn complete(&self) -> Result<(), ContextError> {
        self.core.finish()?;
        self.core
            .controller
            .lifecycle_outcome(LifecycleOutcome::StopCompleted);
        Ok(())
    }

    /// The controller whose stop this context belongs to.
    #[must_use]
    pub fn controller(&self) -> ServiceController {
        ServiceController::from_inner(Arc::clone(&self.core.controller))
    }

    pub(crate) fn finish_sync(&self) {
        if self.core.finish_if_synchronous() {
            self.core
                .controller
                .lifecycle_outcome(LifecycleOutcome::StopCompleted);
        }
    }

    /// Completes the stop even if it was deferred; used when the callback
    /// panicked and can no longer be trusted to complete it.
    pub(crate) fn finish_forcibly(&self) {
        if self.core.finish_forcibly() {
            self.core
                .controller
                .lifecycle_outcome(LifecycleOutcome::StopCompleted);
        }
    }
}

impl fmt::Debug for StopContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopContext")
            .field("service", self.core.controller.name())
            .finish()
    }
}
