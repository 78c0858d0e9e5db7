// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Lifecycle contexts, asynchronous completion, failure retention, and
//! dependency-ordered stopping.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use stagehand::{
    ContextError, Mode, ServiceContainer, ServiceName, StartContext, StartError, State, service_fn,
};
use stagehand_testing::{TEST_TIMEOUT, TransitionLog, wait_until};

type ContextSlot = Arc<Mutex<Option<StartContext>>>;

/// A service whose start stays pending until the test completes its context.
fn held_open(slot: &ContextSlot) -> impl stagehand::Service<Value = ()> {
    let slot = Arc::clone(slot);
    service_fn(
        move |context| {
            context.asynchronous().expect("context is pending");
            *slot.lock() = Some(context.clone());
            Ok(())
        },
        |_| (),
    )
}

fn noop() -> impl stagehand::Service<Value = ()> {
    service_fn(|_| Ok(()), |_| ())
}

fn grab(slot: &ContextSlot) -> StartContext {
    assert!(
        wait_until(TEST_TIMEOUT, || slot.lock().is_some()),
        "start callback never ran"
    );
    slot.lock().take().expect("context stashed")
}

#[test]
fn asynchronous_start_holds_dependents_down_until_completed() {
    let container = ServiceContainer::new();
    let log = TransitionLog::new();
    let a = ServiceName::of("a");
    let b = ServiceName::of("b");
    let slot: ContextSlot = Arc::default();

    let mut batch = container.batch_builder();
    batch.add_listener(log.clone());
    batch.add_service(a.clone(), held_open(&slot)).unwrap();
    batch
        .add_service(b.clone(), noop())
        .unwrap()
        .add_dependency(a.clone());
    batch.install().unwrap();

    let context = grab(&slot);
    assert!(log.await_transition(&a, State::Starting, TEST_TIMEOUT));

    // A stays starting, so B stays down with one unsatisfied dependency.
    std::thread::sleep(Duration::from_millis(100));
    let a_controller = container.service(&a).unwrap();
    let b_controller = container.service(&b).unwrap();
    assert_eq!(a_controller.state(), State::Starting);
    assert_eq!(b_controller.state(), State::Down);
    assert_eq!(b_controller.pending_dependency_count(), 1);

    context.complete().unwrap();
    assert!(log.await_transition(&b, State::Up, TEST_TIMEOUT));
    assert_eq!(a_controller.state(), State::Up);
    assert_eq!(b_controller.pending_dependency_count(), 0);

    // B's rise is ordered after A's.
    let a_up = log.position_of(&a, State::Up).unwrap();
    let b_starting = log.position_of(&b, State::Starting).unwrap();
    assert!(a_up < b_starting);
}

#[test]
fn asynchronous_failure_is_retained_and_contexts_are_one_shot() {
    let container = ServiceContainer::new();
    let log = TransitionLog::new();
    let a = ServiceName::of("a");
    let b = ServiceName::of("b");
    let slot: ContextSlot = Arc::default();

    let mut batch = container.batch_builder();
    batch.add_listener(log.clone());
    batch.add_service(a.clone(), held_open(&slot)).unwrap();
    batch
        .add_service(b.clone(), noop())
        .unwrap()
        .add_dependency(a.clone());
    batch.install().unwrap();

    let context = grab(&slot);
    context.failed(StartError::new("flux capacitor offline")).unwrap();

    assert!(log.await_transition(&a, State::StartFailed, TEST_TIMEOUT));
    let a_controller = container.service(&a).unwrap();
    let error = a_controller.start_error().expect("failure retained");
    assert_eq!(error.message(), "flux capacitor offline");

    // Dependents never move.
    assert_eq!(container.service(&b).unwrap().state(), State::Down);

    // The context is spent.
    assert_eq!(context.complete(), Err(ContextError::AlreadyCompleted));
    assert_eq!(
        context.failed(StartError::new("again")),
        Err(ContextError::AlreadyCompleted)
    );
}

#[test]
fn failed_before_asynchronous_is_rejected() {
    let container = ServiceContainer::new();
    let log = TransitionLog::new();
    let a = ServiceName::of("a");

    let mut batch = container.batch_builder();
    batch.add_listener(log.clone());
    batch
        .add_service(
            a.clone(),
            service_fn(
                |context| {
                    // Synchronous starts report failure by returning Err;
                    // failed() is reserved for deferred completions.
                    assert_eq!(
                        context.failed(StartError::new("too early")),
                        Err(ContextError::NotAsynchronous)
                    );
                    Ok(())
                },
                |_| (),
            ),
        )
        .unwrap();
    batch.install().unwrap();

    assert!(log.await_transition(&a, State::Up, TEST_TIMEOUT));
}

#[test]
fn synchronous_error_fails_the_start_and_mode_change_retries() {
    let container = ServiceContainer::new();
    let log = TransitionLog::new();
    let a = ServiceName::of("a");
    let attempts = Arc::new(AtomicUsize::new(0));

    let counting = {
        let attempts = Arc::clone(&attempts);
        service_fn(
            move |_| {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(StartError::new("cold start"))
                } else {
                    Ok(())
                }
            },
            |_| (),
        )
    };

    let mut batch = container.batch_builder();
    batch.add_listener(log.clone());
    batch.add_service(a.clone(), counting).unwrap();
    batch.install().unwrap();

    assert!(log.await_transition(&a, State::StartFailed, TEST_TIMEOUT));
    let controller = container.service(&a).unwrap();
    assert_eq!(controller.start_error().unwrap().message(), "cold start");

    // Changing the mode clears the failure and retries.
    controller.set_mode(Mode::Active);
    assert!(log.await_transition(&a, State::Up, TEST_TIMEOUT));
    assert!(controller.start_error().is_none());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn panicking_start_becomes_a_start_failure() {
    let container = ServiceContainer::new();
    let log = TransitionLog::new();
    let a = ServiceName::of("a");

    let mut batch = container.batch_builder();
    batch.add_listener(log.clone());
    batch
        .add_service(a.clone(), service_fn(|_| panic!("wires crossed"), |_| ()))
        .unwrap();
    batch.install().unwrap();

    assert!(log.await_transition(&a, State::StartFailed, TEST_TIMEOUT));
    let error = container.service(&a).unwrap().start_error().unwrap();
    assert!(error.message().contains("wires crossed"));
}

#[test]
fn dependents_stop_before_their_dependency() {
    let container = ServiceContainer::new();
    let log = TransitionLog::new();
    let db = ServiceName::of("db");
    let web = ServiceName::of("web");

    let mut batch = container.batch_builder();
    batch.add_listener(log.clone());
    batch.add_service(db.clone(), noop()).unwrap();
    batch
        .add_service(web.clone(), noop())
        .unwrap()
        .add_dependency(db.clone());
    batch.install().unwrap();
    assert!(log.await_transition(&web, State::Up, TEST_TIMEOUT));

    // Stop the dependency; the dependent must drain first.
    container.service(&db).unwrap().set_mode(Mode::Never);
    assert!(log.await_transition(&db, State::Down, TEST_TIMEOUT));

    let web_down = log.position_of(&web, State::Down).unwrap();
    let db_stopping = log.position_of(&db, State::Stopping).unwrap();
    assert!(
        web_down < db_stopping,
        "web must be fully down before db begins stopping"
    );

    // With the dependency down, the dependent stays down.
    assert_eq!(container.service(&web).unwrap().state(), State::Down);
    assert_eq!(container.service(&web).unwrap().pending_dependency_count(), 1);

    // Releasing the dependency brings the whole stack back.
    log.clear();
    container.service(&db).unwrap().set_mode(Mode::Automatic);
    assert!(log.await_transition(&web, State::Up, TEST_TIMEOUT));
}

#[test]
fn asynchronous_stop_completes_later() {
    let container = ServiceContainer::new();
    let log = TransitionLog::new();
    let a = ServiceName::of("a");
    let stop_slot: Arc<Mutex<Option<stagehand::StopContext>>> = Arc::default();

    let service = {
        let stop_slot = Arc::clone(&stop_slot);
        service_fn(
            |_| Ok(()),
            move |context| {
                context.asynchronous().expect("context is pending");
                *stop_slot.lock() = Some(context.clone());
            },
        )
    };

    let mut batch = container.batch_builder();
    batch.add_listener(log.clone());
    batch.add_service(a.clone(), service).unwrap();
    batch.install().unwrap();
    assert!(log.await_transition(&a, State::Up, TEST_TIMEOUT));

    let controller = container.service(&a).unwrap();
    controller.set_mode(Mode::Never);
    assert!(log.await_transition(&a, State::Stopping, TEST_TIMEOUT));

    // Held open by the stop context.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(controller.state(), State::Stopping);

    let context = stop_slot.lock().take().expect("stop context stashed");
    context.complete().unwrap();
    assert!(log.await_transition(&a, State::Down, TEST_TIMEOUT));
    assert_eq!(context.complete(), Err(ContextError::AlreadyCompleted));
}

#[test]
fn panicking_stop_still_reaches_down() {
    let container = ServiceContainer::new();
    let log = TransitionLog::new();
    let a = ServiceName::of("a");

    let mut batch = container.batch_builder();
    batch.add_listener(log.clone());
    batch
        .add_service(a.clone(), service_fn(|_| Ok(()), |_| panic!("stuck valve")))
        .unwrap();
    batch.install().unwrap();
    assert!(log.await_transition(&a, State::Up, TEST_TIMEOUT));

    container.service(&a).unwrap().set_mode(Mode::Never);
    assert!(log.await_transition(&a, State::Down, TEST_TIMEOUT));
}

#[test]
fn removal_frees_the_name_for_reinstall() {
    let container = ServiceContainer::new();
    let log = TransitionLog::new();
    let a = ServiceName::of("a");

    let mut batch = container.batch_builder();
    batch.add_listener(log.clone());
    batch.add_service(a.clone(), noop()).unwrap();
    batch.install().unwrap();
    assert!(log.await_transition(&a, State::Up, TEST_TIMEOUT));

    let first = container.service(&a).unwrap();
    first.remove();
    assert!(log.await_transition(&a, State::Removed, TEST_TIMEOUT));
    assert_eq!(first.state(), State::Removed);
    assert!(container.service(&a).is_none());

    // A fresh controller can take the name.
    let mut batch = container.batch_builder();
    batch.add_listener(log.clone());
    batch.add_service(a.clone(), noop()).unwrap();
    batch.install().unwrap();
    assert!(wait_until(TEST_TIMEOUT, || {
        container
            .service(&a)
            .is_some_and(|c| c.state() == State::Up)
    }));
    // The old handle still reports its own removal.
    assert_eq!(first.state(), State::Removed);
}

#[test]
fn listener_panics_never_affect_the_controller() {
    let container = ServiceContainer::new();
    let log = TransitionLog::new();
    let a = ServiceName::of("a");

    struct Grumpy;
    impl stagehand::ServiceListener for Grumpy {
        fn service_starting(&self, _controller: &stagehand::ServiceController) {
            panic!("no thank you");
        }
    }

    let mut batch = container.batch_builder();
    batch.add_listener(Grumpy);
    batch.add_listener(log.clone());
    batch.add_service(a.clone(), noop()).unwrap();
    batch.install().unwrap();

    assert!(log.await_transition(&a, State::Up, TEST_TIMEOUT));
}
