// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-service state machine.
//!
//! Each controller guards its mutable state with one monitor. Transitions
//! are decided and applied under the lock, but every effect of a transition
//! (listener notification, signals to dependents and dependencies, executor
//! scheduling) runs afterward as an ordered task batch. While a batch is in
//! flight no further transition is taken, which is what makes listener
//! invocation order equal transition order for a single controller without
//! ever holding two controller monitors at once.
//!
//! Stopping is drained through acknowledgements: a dependency that must
//! leave `Up` first announces retirement to a snapshot of its dependents and
//! stays `Up` until each has acknowledged from a resting state. A dependent
//! that already committed to starting acknowledges only once it is back at
//! rest, so a dependency can never leave `Up` underneath a dependent that is
//! starting or running.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::context::{StartContext, StopContext};
use crate::error::StartError;
use crate::executor::Executor;
use crate::inject::{Injection, ProvidedInjection};
use crate::listener::ServiceListener;
use crate::name::ServiceName;
use crate::service::ServiceSlot;

/// The lifecycle state of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Not running. The initial state, and the resting state between runs.
    Down,
    /// The start callback has been scheduled or is pending completion.
    Starting,
    /// Running; all dependencies are up.
    Up,
    /// The stop callback has been scheduled or is pending completion.
    Stopping,
    /// The last start attempt failed; the error is retained.
    StartFailed,
    /// Removed from the registry. Terminal.
    Removed,
}

/// Policy governing whether a controller attempts to start.
///
/// "Demand" is an internal protocol between dependents and dependencies: a
/// controller that demands its dependencies is asking `OnDemand` services
/// below it to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// Never starts; setting this mode stops a running service.
    Never,
    /// Starts only while at least one dependent demands it, and relays that
    /// demand to its own dependencies.
    OnDemand,
    /// Starts once all dependencies are up; never demands, so an `OnDemand`
    /// dependency will not run on this service's behalf.
    Passive,
    /// Demands its dependencies unconditionally and starts once they are up.
    Active,
    /// The default: starts once all dependencies are up, originates no
    /// demand, but relays demand placed on it downward.
    #[default]
    Automatic,
}

/// How a lifecycle action ended; delivered by the contexts.
pub(crate) enum LifecycleOutcome {
    StartCompleted,
    StartFailed(StartError),
    StopCompleted,
}

/// Snapshot of a dependency's availability taken while linking a new
/// dependent, so the dependent's counters agree with every event the
/// dependency will deliver afterward.
pub(crate) enum LinkSnapshot {
    Up,
    Retiring,
    NotUp,
}

pub(crate) struct ControllerSettings {
    pub(crate) name: ServiceName,
    pub(crate) executor: Executor,
    pub(crate) mode: Mode,
    pub(crate) dependencies: Vec<Arc<ControllerInner>>,
    pub(crate) injections: Vec<Injection>,
    pub(crate) provided: Vec<ProvidedInjection>,
    pub(crate) listeners: Vec<Arc<dyn ServiceListener>>,
    pub(crate) service: ServiceSlot,
}

pub(crate) struct ControllerInner {
    name: ServiceName,
    executor: Executor,
    /// Strong references, declaration order. A controller keeps its
    /// dependencies alive; dependents hold only weak back references.
    dependencies: Vec<Arc<ControllerInner>>,
    injections: Vec<Injection>,
    provided: Vec<ProvidedInjection>,
    /// The service object, guarded separately so lifecycle callbacks run
    /// without the state monitor. Never held together with `state`.
    service: Mutex<ServiceSlot>,
    state: Mutex<InnerState>,
}

struct InnerState {
    state: State,
    mode: Mode,
    /// Dependencies not currently `Up`. Zero iff every dependency is up.
    pending_deps: usize,
    /// Dependencies still `Up` but committed to stopping. Starting is
    /// blocked while nonzero.
    retiring_deps: usize,
    demanded_by: usize,
    demanding: bool,
    /// Dependents installed and not yet removed; removal waits for zero.
    live_dependents: usize,
    /// Outstanding retirement acknowledgements; the controller stays `Up`
    /// until every dependent from the announcement snapshot has acked.
    awaiting_acks: usize,
    /// Retiring dependencies owed an acknowledgement once this controller
    /// is back at rest.
    pending_acks: Vec<Arc<ControllerInner>>,
    stop_requested: bool,
    remove_requested: bool,
    /// Set while the controller belongs to an uncommitted batch.
    gated: bool,
    retry_requested: bool,
    callback_in_progress: bool,
    effects_in_flight: bool,
    staged_outcome: Option<LifecycleOutcome>,
    pending_start: Option<Result<(), StartError>>,
    pending_stop: bool,
    listeners: Vec<Arc<dyn ServiceListener>>,
    dependents: Vec<Weak<ControllerInner>>,
    start_error: Option<StartError>,
}

impl InnerState {
    fn at_rest(&self) -> bool {
        matches!(
            self.state,
            State::Down | State::StartFailed | State::Removed
        )
    }
}

enum Task {
    Notify {
        old: State,
        new: State,
        error: Option<StartError>,
        listeners: Vec<Arc<dyn ServiceListener>>,
    },
    DependentsEvent {
        targets: Vec<Arc<ControllerInner>>,
        event: DependencyEvent,
    },
    /// Acknowledge these retiring dependencies now that this controller is
    /// at rest.
    AckRetirements(Vec<Arc<ControllerInner>>),
    /// Tell every dependency this controller has been removed.
    Unlink,
    Demand {
        demand: bool,
    },
    ScheduleStart,
    ScheduleStop,
}

#[derive(Clone, Copy)]
enum DependencyEvent {
    Up,
    Down,
    Retiring,
}

thread_local! {
    /// The drain loop of the outermost `run_tasks` frame on this thread.
    /// `Some` while a drain is active; nested batches enqueue here.
    static EFFECT_QUEUE: RefCell<Option<VecDeque<(Arc<ControllerInner>, Vec<Task>)>>> =
        const { RefCell::new(None) };
}

fn mode_admits_start(st: &InnerState) -> bool {
    match st.mode {
        Mode::Never => false,
        Mode::OnDemand => st.demanded_by > 0,
        Mode::Passive | Mode::Active | Mode::Automatic => true,
    }
}

fn live_dependent_refs(st: &mut InnerState) -> Vec<Arc<ControllerInner>> {
    st.dependents.retain(|weak| weak.strong_count() > 0);
    st.dependents.iter().filter_map(Weak::upgrade).collect()
}

fn panic_message(action: &str, payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("{action} callback panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("{action} callback panicked: {message}")
    } else {
        format!("{action} callback panicked")
    }
}

impl ControllerInner {
    pub(crate) fn create(settings: ControllerSettings) -> Arc<Self> {
        let pending_deps = settings.dependencies.len();
        Arc::new(Self {
            name: settings.name,
            executor: settings.executor,
            dependencies: settings.dependencies,
            injections: settings.injections,
            provided: settings.provided,
            service: Mutex::new(settings.service),
            state: Mutex::new(InnerState {
                state: State::Down,
                mode: settings.mode,
                pending_deps,
                retiring_deps: 0,
                demanded_by: 0,
                demanding: false,
                live_dependents: 0,
                awaiting_acks: 0,
                pending_acks: Vec::new(),
                stop_requested: false,
                remove_requested: false,
                gated: true,
                retry_requested: false,
                callback_in_progress: false,
                effects_in_flight: false,
                staged_outcome: None,
                pending_start: None,
                pending_stop: false,
                listeners: settings.listeners,
                dependents: Vec::new(),
                start_error: None,
            }),
        })
    }

    pub(crate) fn name(&self) -> &ServiceName {
        &self.name
    }

    pub(crate) fn dependencies(&self) -> &[Arc<ControllerInner>] {
        &self.dependencies
    }

    /// Registers `dependent` for notifications and reports how the
    /// dependency currently counts toward the dependent's bookkeeping.
    pub(crate) fn link_dependent(&self, dependent: &Arc<ControllerInner>) -> LinkSnapshot {
        let mut st = self.state.lock();
        st.dependents.push(Arc::downgrade(dependent));
        st.live_dependents += 1;
        match st.state {
            State::Up if st.stop_requested => LinkSnapshot::Retiring,
            State::Up => LinkSnapshot::Up,
            _ => LinkSnapshot::NotUp,
        }
    }

    /// Releases the install gate; from here on the controller evaluates its
    /// start rule and participates in the demand protocol.
    pub(crate) fn commit(self: &Arc<Self>) {
        self.update(|st| st.gated = false);
    }

    /// Silently unwinds a controller whose batch failed. No listener has
    /// observed anything (the controller was gated), so there is nothing to
    /// notify; the dependency links are severed and the controller is left
    /// inert for any stray references.
    pub(crate) fn discard(self: &Arc<Self>) {
        {
            let mut st = self.state.lock();
            st.state = State::Removed;
            st.remove_requested = true;
        }
        for dependency in &self.dependencies {
            dependency.dependent_removed(self);
        }
    }

    // Event intake. Each event adjusts the counters and lets the evaluator
    // decide whether a transition follows. Removed controllers freeze their
    // counters; late events from in-flight batches are ignored.

    pub(crate) fn dependency_up(self: &Arc<Self>) {
        self.update(|st| {
            if st.state != State::Removed {
                debug_assert!(st.pending_deps > 0);
                st.pending_deps -= 1;
            }
        });
    }

    pub(crate) fn dependency_down(self: &Arc<Self>) {
        self.update(|st| {
            if st.state != State::Removed {
                st.pending_deps += 1;
                debug_assert!(st.retiring_deps > 0);
                st.retiring_deps -= 1;
            }
        });
    }

    /// A dependency announced retirement. The acknowledgement is immediate
    /// when this controller is at rest; otherwise it is owed, and delivered
    /// when the controller next reaches rest. Deciding this under the same
    /// lock that takes the start decision is what keeps a retiring
    /// dependency `Up` under any dependent that already committed to start.
    pub(crate) fn dependency_retiring(self: &Arc<Self>, announcer: Arc<ControllerInner>) {
        let ack_now = {
            let mut st = self.state.lock();
            if st.state == State::Removed {
                true
            } else {
                st.retiring_deps += 1;
                if st.at_rest() {
                    true
                } else {
                    st.pending_acks.push(Arc::clone(&announcer));
                    false
                }
            }
        };
        if ack_now {
            announcer.retirement_acked();
        }
        self.update(|_| {});
    }

    /// Link-time variant of [`dependency_retiring`][Self::dependency_retiring]:
    /// the dependency's acknowledgement snapshot predates this dependent, so
    /// no ack is owed. The dependency is still `Up` (it counts as not
    /// pending) but its retirement blocks this controller from starting
    /// until the matching down event arrives.
    pub(crate) fn note_linked_retiring(self: &Arc<Self>) {
        self.update(|st| {
            if st.state != State::Removed {
                debug_assert!(st.pending_deps > 0);
                st.pending_deps -= 1;
                st.retiring_deps += 1;
            }
        });
    }

    fn retirement_acked(self: &Arc<Self>) {
        self.update(|st| {
            if st.state != State::Removed {
                debug_assert!(st.awaiting_acks > 0);
                st.awaiting_acks -= 1;
            }
        });
    }

    fn dependent_removed(self: &Arc<Self>, dependent: &ControllerInner) {
        self.update(|st| {
            st.dependents
                .retain(|weak| !std::ptr::eq(weak.as_ptr(), std::ptr::from_ref(dependent)));
            if st.state != State::Removed {
                debug_assert!(st.live_dependents > 0);
                st.live_dependents -= 1;
            }
        });
    }

    fn demand(self: &Arc<Self>) {
        self.update(|st| {
            if st.state != State::Removed {
                st.demanded_by += 1;
            }
        });
    }

    fn undemand(self: &Arc<Self>) {
        self.update(|st| {
            if st.state != State::Removed {
                debug_assert!(st.demanded_by > 0);
                st.demanded_by -= 1;
            }
        });
    }

    /// Entry point for context completions. If the lifecycle callback is
    /// still on its executor thread (it may complete its own context before
    /// returning), the outcome is staged and finished by that thread once
    /// it has returned the service instance.
    pub(crate) fn lifecycle_outcome(self: &Arc<Self>, outcome: LifecycleOutcome) {
        {
            let mut st = self.state.lock();
            if st.callback_in_progress {
                st.staged_outcome = Some(outcome);
                return;
            }
        }
        self.finish_outcome(outcome);
    }

    fn finish_outcome(self: &Arc<Self>, outcome: LifecycleOutcome) {
        match outcome {
            LifecycleOutcome::StartCompleted => match self.run_provided() {
                Ok(()) => self.update(|st| st.pending_start = Some(Ok(()))),
                Err(error) => {
                    self.uninject_inputs();
                    self.update(|st| st.pending_start = Some(Err(error)));
                }
            },
            LifecycleOutcome::StartFailed(error) => {
                self.uninject_inputs();
                self.update(|st| st.pending_start = Some(Err(error)));
            }
            LifecycleOutcome::StopCompleted => {
                self.uninject_all();
                self.update(|st| st.pending_stop = true);
            }
        }
    }

    // The engine.

    fn update(self: &Arc<Self>, mutate: impl FnOnce(&mut InnerState)) {
        let tasks = {
            let mut st = self.state.lock();
            mutate(&mut st);
            self.evaluate(&mut st)
        };
        if !tasks.is_empty() {
            self.run_tasks(tasks);
        }
    }

    /// Decides the next transition, applies it to `st`, and returns the
    /// ordered effects. Returns nothing while a previous batch of effects is
    /// still in flight; the batch's completion re-enters the evaluator.
    fn evaluate(&self, st: &mut InnerState) -> Vec<Task> {
        if st.effects_in_flight {
            return Vec::new();
        }
        let mut tasks = Vec::new();

        let should_demand = !st.gated
            && st.state != State::Removed
            && match st.mode {
                Mode::Active => true,
                Mode::OnDemand | Mode::Automatic => st.demanded_by > 0,
                Mode::Passive | Mode::Never => false,
            };
        if should_demand != st.demanding {
            st.demanding = should_demand;
            if !self.dependencies.is_empty() {
                tasks.push(Task::Demand {
                    demand: should_demand,
                });
            }
        }

        match st.state {
            State::Down => {
                if st.remove_requested && st.live_dependents == 0 {
                    st.state = State::Removed;
                    tasks.push(self.notify_task(st, State::Down, State::Removed, None));
                    tasks.push(Task::Unlink);
                } else if !st.gated
                    && !st.remove_requested
                    && st.pending_deps == 0
                    && st.retiring_deps == 0
                    && mode_admits_start(st)
                {
                    st.state = State::Starting;
                    tasks.push(self.notify_task(st, State::Down, State::Starting, None));
                    tasks.push(Task::ScheduleStart);
                }
            }
            State::Starting => {
                if !st.callback_in_progress
                    && let Some(outcome) = st.pending_start.take()
                {
                    match outcome {
                        Ok(()) => {
                            st.state = State::Up;
                            tasks.push(self.notify_task(st, State::Starting, State::Up, None));
                            tasks.push(Task::DependentsEvent {
                                targets: live_dependent_refs(st),
                                event: DependencyEvent::Up,
                            });
                        }
                        Err(error) => {
                            st.state = State::StartFailed;
                            st.start_error = Some(error.clone());
                            tasks.push(self.notify_task(
                                st,
                                State::Starting,
                                State::StartFailed,
                                Some(error),
                            ));
                            if !st.pending_acks.is_empty() {
                                tasks.push(Task::AckRetirements(mem::take(&mut st.pending_acks)));
                            }
                        }
                    }
                }
            }
            State::Up => {
                let should_stay_up = !st.remove_requested
                    && st.pending_deps == 0
                    && st.retiring_deps == 0
                    && mode_admits_start(st);
                if st.stop_requested || !should_stay_up {
                    if !st.stop_requested {
                        // Announce retirement; dependents must drain first.
                        st.stop_requested = true;
                        let targets = live_dependent_refs(st);
                        st.awaiting_acks = targets.len();
                        if !targets.is_empty() {
                            tasks.push(Task::DependentsEvent {
                                targets,
                                event: DependencyEvent::Retiring,
                            });
                        }
                    }
                    if st.awaiting_acks == 0 {
                        st.state = State::Stopping;
                        tasks.push(self.notify_task(st, State::Up, State::Stopping, None));
                        tasks.push(Task::DependentsEvent {
                            targets: live_dependent_refs(st),
                            event: DependencyEvent::Down,
                        });
                        tasks.push(Task::ScheduleStop);
                    }
                }
            }
            State::Stopping => {
                if st.pending_stop && !st.callback_in_progress {
                    st.pending_stop = false;
                    st.stop_requested = false;
                    st.state = State::Down;
                    tasks.push(self.notify_task(st, State::Stopping, State::Down, None));
                    if !st.pending_acks.is_empty() {
                        tasks.push(Task::AckRetirements(mem::take(&mut st.pending_acks)));
                    }
                }
            }
            State::StartFailed => {
                if st.remove_requested && st.live_dependents == 0 {
                    st.state = State::Removed;
                    tasks.push(self.notify_task(st, State::StartFailed, State::Removed, None));
                    tasks.push(Task::Unlink);
                } else if st.retry_requested {
                    st.retry_requested = false;
                    st.start_error = None;
                    st.state = State::Down;
                    tasks.push(self.notify_task(st, State::StartFailed, State::Down, None));
                }
            }
            State::Removed => {}
        }

        if !tasks.is_empty() {
            st.effects_in_flight = true;
        }
        tasks
    }

    fn notify_task(
        &self,
        st: &InnerState,
        old: State,
        new: State,
        error: Option<StartError>,
    ) -> Task {
        Task::Notify {
            old,
            new,
            error,
            listeners: st.listeners.clone(),
        }
    }

    /// Hands an effect batch to the current thread's drain loop.
    ///
    /// Effect batches fan out to other controllers, whose own batches fan
    /// out further; on a long dependency chain that cascade would otherwise
    /// recurse once per service. Batches are queued FIFO per thread instead,
    /// and the outermost frame drains the queue. Counter mutations are not
    /// deferred by this (they happen inside the event calls), so event
    /// ordering is unaffected.
    fn run_tasks(self: &Arc<Self>, tasks: Vec<Task>) {
        let nested = EFFECT_QUEUE.with(|queue| {
            let mut queue = queue.borrow_mut();
            match &mut *queue {
                Some(pending) => {
                    pending.push_back((Arc::clone(self), tasks));
                    true
                }
                None => {
                    *queue = Some(VecDeque::from([(Arc::clone(self), tasks)]));
                    false
                }
            }
        });
        if nested {
            return;
        }
        loop {
            let next = EFFECT_QUEUE.with(|queue| {
                queue
                    .borrow_mut()
                    .as_mut()
                    .and_then(VecDeque::pop_front)
            });
            match next {
                Some((controller, batch)) => controller.run_batch(batch),
                None => break,
            }
        }
        EFFECT_QUEUE.with(|queue| *queue.borrow_mut() = None);
    }

    fn run_batch(self: &Arc<Self>, tasks: Vec<Task>) {
        for task in tasks {
            match task {
                Task::Notify {
                    old,
                    new,
                    error,
                    listeners,
                } => self.notify(old, new, error.as_ref(), &listeners),
                Task::DependentsEvent { targets, event } => {
                    for dependent in targets {
                        match event {
                            DependencyEvent::Up => dependent.dependency_up(),
                            DependencyEvent::Down => dependent.dependency_down(),
                            DependencyEvent::Retiring => {
                                dependent.dependency_retiring(Arc::clone(self));
                            }
                        }
                    }
                }
                Task::AckRetirements(announcers) => {
                    for announcer in announcers {
                        announcer.retirement_acked();
                    }
                }
                Task::Unlink => {
                    for dependency in &self.dependencies {
                        dependency.dependent_removed(self);
                    }
                }
                Task::Demand { demand } => {
                    for dependency in &self.dependencies {
                        if demand {
                            dependency.demand();
                        } else {
                            dependency.undemand();
                        }
                    }
                }
                Task::ScheduleStart => {
                    let controller = Arc::clone(self);
                    self.executor.execute(move || controller.run_start_task());
                }
                Task::ScheduleStop => {
                    let controller = Arc::clone(self);
                    self.executor.execute(move || controller.run_stop_task());
                }
            }
        }
        self.update(|st| {
            debug_assert!(st.effects_in_flight);
            st.effects_in_flight = false;
        });
    }

    fn notify(
        self: &Arc<Self>,
        old: State,
        new: State,
        error: Option<&StartError>,
        listeners: &[Arc<dyn ServiceListener>],
    ) {
        let handle = ServiceController::from_inner(Arc::clone(self));
        for listener in listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                listener.transition(&handle, old, new);
                match new {
                    State::Starting => listener.service_starting(&handle),
                    State::Up => listener.service_started(&handle),
                    State::StartFailed => {
                        if let Some(error) = error {
                            listener.service_failed(&handle, error);
                        }
                    }
                    State::Stopping => listener.service_stopping(&handle),
                    State::Down => {
                        if old == State::Stopping {
                            listener.service_stopped(&handle);
                        }
                    }
                    State::Removed => listener.service_removed(&handle),
                }
            }));
            if outcome.is_err() {
                warn!(
                    service = %self.name,
                    from = ?old,
                    to = ?new,
                    "listener panicked during transition notification"
                );
            }
        }
    }

    // Lifecycle tasks, run on executor threads.

    fn run_start_task(self: Arc<Self>) {
        // Materialize the service object, building it on first start.
        let instance = {
            let mut slot = self.service.lock();
            match mem::replace(&mut *slot, ServiceSlot::Engaged) {
                ServiceSlot::Ready(instance) => instance,
                ServiceSlot::Lazy(mut build) => match build() {
                    Ok(instance) => instance,
                    Err(error) => {
                        // Keep the factory for a later retry.
                        *slot = ServiceSlot::Lazy(build);
                        drop(slot);
                        self.update(|st| {
                            st.pending_start =
                                Some(Err(StartError::caused_by("service factory failed", error)));
                        });
                        return;
                    }
                },
                ServiceSlot::Engaged => unreachable!("overlapping lifecycle tasks"),
            }
        };

        let mut injected = 0;
        let mut failure = None;
        for injection in &self.injections {
            match injection.inject() {
                Ok(()) => injected += 1,
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }
        if let Some(error) = failure {
            for injection in self.injections[..injected].iter().rev() {
                injection.uninject();
            }
            *self.service.lock() = ServiceSlot::Ready(instance);
            self.update(|st| st.pending_start = Some(Err(error)));
            return;
        }

        self.state.lock().callback_in_progress = true;
        let context = StartContext::new(Arc::clone(&self));
        let mut instance = instance;
        let result = catch_unwind(AssertUnwindSafe(|| instance.start_dyn(&context)));
        *self.service.lock() = ServiceSlot::Ready(instance);
        let staged = {
            let mut st = self.state.lock();
            st.callback_in_progress = false;
            st.staged_outcome.take()
        };
        match result {
            Ok(sync_result) => context.finish_sync(sync_result),
            Err(payload) => {
                context.finish_sync(Err(StartError::new(panic_message("start", &*payload))));
            }
        }
        if let Some(outcome) = staged {
            self.finish_outcome(outcome);
        }
    }

    fn run_stop_task(self: Arc<Self>) {
        let instance = {
            let mut slot = self.service.lock();
            match mem::replace(&mut *slot, ServiceSlot::Engaged) {
                ServiceSlot::Ready(instance) => instance,
                _ => unreachable!("stop scheduled without a ready service instance"),
            }
        };

        self.state.lock().callback_in_progress = true;
        let context = StopContext::new(Arc::clone(&self));
        let mut instance = instance;
        let result = catch_unwind(AssertUnwindSafe(|| instance.stop_dyn(&context)));
        *self.service.lock() = ServiceSlot::Ready(instance);
        let staged = {
            let mut st = self.state.lock();
            st.callback_in_progress = false;
            st.staged_outcome.take()
        };
        match result {
            Ok(()) => context.finish_sync(),
            Err(_payload) => {
                warn!(service = %self.name, "stop callback panicked; treating the stop as complete");
                context.finish_forcibly();
            }
        }
        if let Some(outcome) = staged {
            self.finish_outcome(outcome);
        }
    }

    /// Transfers the service's own value to `provides` destinations; part of
    /// the start sequence, so a rejection fails the start.
    fn run_provided(&self) -> Result<(), StartError> {
        if self.provided.is_empty() {
            return Ok(());
        }
        let slot = self.service.lock();
        let ServiceSlot::Ready(instance) = &*slot else {
            return Err(StartError::new(
                "service instance unavailable for value injection",
            ));
        };
        let mut injected = 0;
        for provided in &self.provided {
            match provided.inject(instance.as_ref()) {
                Ok(()) => injected += 1,
                Err(error) => {
                    for applied in self.provided[..injected].iter().rev() {
                        applied.uninject();
                    }
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    fn uninject_inputs(&self) {
        for injection in self.injections.iter().rev() {
            injection.uninject();
        }
    }

    fn uninject_all(&self) {
        for provided in self.provided.iter().rev() {
            provided.uninject();
        }
        self.uninject_inputs();
    }

    // Accessors used by the public handle.

    fn current_state(&self) -> State {
        self.state.lock().state
    }

    fn current_mode(&self) -> Mode {
        self.state.lock().mode
    }

    fn current_start_error(&self) -> Option<StartError> {
        self.state.lock().start_error.clone()
    }

    fn current_pending_deps(&self) -> usize {
        self.state.lock().pending_deps
    }
}

/// A handle to an installed service.
///
/// Handles are cheap to clone and remain valid after removal (reporting
/// [`State::Removed`]). They are obtained from
/// [`ServiceContainer::service`][crate::ServiceContainer::service] or inside
/// listener and context callbacks.
#[derive(Clone)]
pub struct ServiceController {
    inner: Arc<ControllerInner>,
}

impl ServiceController {
    pub(crate) fn from_inner(inner: Arc<ControllerInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner_ref(&self) -> &Arc<ControllerInner> {
        &self.inner
    }

    /// The service's name.
    #[must_use]
    pub fn name(&self) -> &ServiceName {
        self.inner.name()
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.inner.current_state()
    }

    /// The current mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.inner.current_mode()
    }

    /// Changes the mode, re-evaluating whether the service should run.
    ///
    /// Setting a mode on a [`StartFailed`][State::StartFailed] controller
    /// clears the retained failure and returns it to `Down`, from where a
    /// permitting mode will retry the start. Has no effect on a removed
    /// controller.
    pub fn set_mode(&self, mode: Mode) {
        self.inner.update(|st| {
            if st.state == State::Removed || st.mode == mode {
                return;
            }
            st.mode = mode;
            if st.state == State::StartFailed {
                st.retry_requested = true;
            }
        });
    }

    /// Requests removal.
    ///
    /// A running service is stopped first (its dependents drain before it
    /// does); removal then waits until no installed dependent remains, after
    /// which the controller leaves the registry and listeners observe the
    /// `Removed` transition.
    pub fn remove(&self) {
        self.inner.update(|st| {
            if st.state != State::Removed {
                st.remove_requested = true;
            }
        });
    }

    /// The failure retained from the last start attempt, while the
    /// controller is in [`State::StartFailed`].
    #[must_use]
    pub fn start_error(&self) -> Option<StartError> {
        self.inner.current_start_error()
    }

    /// How many of this service's dependencies are not currently up.
    #[must_use]
    pub fn pending_dependency_count(&self) -> usize {
        self.inner.current_pending_deps()
    }
}

impl fmt::Debug for ServiceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceController")
            .field("name", self.name())
            .field("state", &self.state())
            .finish()
    }
}
