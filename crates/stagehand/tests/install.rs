// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Batch installation: resolution order, failure atomicity, stack safety.

use std::time::Duration;

use stagehand::{InstallError, ServiceContainer, ServiceName, State, service_fn};
use stagehand_testing::{TEST_TIMEOUT, TransitionLog};

fn noop() -> impl stagehand::Service<Value = ()> {
    service_fn(|_| Ok(()), |_| ())
}

#[test]
fn dependent_starts_only_after_its_dependency_is_up() {
    let container = ServiceContainer::new();
    let log = TransitionLog::new();
    let a = ServiceName::of("a");
    let b = ServiceName::of("b");

    let mut batch = container.batch_builder();
    batch.add_listener(log.clone());
    batch
        .add_service(a.clone(), noop())
        .unwrap()
        .add_dependency(b.clone());
    batch.add_service(b.clone(), noop()).unwrap();
    batch.install().unwrap();

    assert!(log.await_transition(&a, State::Up, TEST_TIMEOUT));

    // Both present.
    assert!(container.service(&a).is_some());
    assert!(container.service(&b).is_some());

    // B reaches Up strictly before A leaves Down.
    let b_up = log.position_of(&b, State::Up).unwrap();
    let a_starting = log.position_of(&a, State::Starting).unwrap();
    assert!(b_up < a_starting, "b must be up before a starts");

    // A's own transitions are Down -> Starting -> Up, in order.
    let a_history: Vec<(State, State)> = log
        .history()
        .into_iter()
        .filter(|t| t.service == a)
        .map(|t| (t.from, t.to))
        .collect();
    assert_eq!(
        a_history,
        vec![(State::Down, State::Starting), (State::Starting, State::Up)]
    );
}

#[test]
fn circular_batches_are_rejected_and_roll_back() {
    let container = ServiceContainer::new();
    let a = ServiceName::of("a");
    let b = ServiceName::of("b");

    let mut batch = container.batch_builder();
    batch
        .add_service(a.clone(), noop())
        .unwrap()
        .add_dependency(b.clone());
    batch
        .add_service(b.clone(), noop())
        .unwrap()
        .add_dependency(a.clone());

    let error = batch.install().unwrap_err();
    let InstallError::CircularDependency { path } = &error else {
        panic!("expected a circular dependency, got {error}");
    };
    assert_eq!(path.first(), path.last());
    assert!(path.len() >= 3, "cycle should name both services: {path:?}");

    assert!(container.service(&a).is_none());
    assert!(container.service(&b).is_none());
}

#[test]
fn self_dependency_is_a_cycle() {
    let container = ServiceContainer::new();
    let a = ServiceName::of("a");

    let mut batch = container.batch_builder();
    batch
        .add_service(a.clone(), noop())
        .unwrap()
        .add_dependency(a.clone());

    assert!(matches!(
        batch.install(),
        Err(InstallError::CircularDependency { .. })
    ));
    assert!(container.service(&a).is_none());
}

#[test]
fn missing_dependencies_are_rejected_and_roll_back() {
    let container = ServiceContainer::new();
    let a = ServiceName::of("a");
    let z = ServiceName::of("z");

    let mut batch = container.batch_builder();
    batch
        .add_service(a.clone(), noop())
        .unwrap()
        .add_dependency(z.clone());

    let error = batch.install().unwrap_err();
    match error {
        InstallError::MissingDependency {
            dependent,
            dependency,
        } => {
            assert_eq!(dependent, a);
            assert_eq!(dependency, z);
        }
        other => panic!("expected a missing dependency, got {other}"),
    }
    assert!(container.service(&a).is_none());
}

#[test]
fn duplicate_names_across_batches_keep_the_first_service() {
    let container = ServiceContainer::new();
    let log = TransitionLog::new();
    let a = ServiceName::of("a");

    let mut batch = container.batch_builder();
    batch.add_listener(log.clone());
    batch.add_service(a.clone(), noop()).unwrap();
    batch.install().unwrap();
    assert!(log.await_transition(&a, State::Up, TEST_TIMEOUT));

    let mut second = container.batch_builder();
    second.add_service(a.clone(), noop()).unwrap();
    assert!(matches!(
        second.install(),
        Err(InstallError::DuplicateService { .. })
    ));

    // The first service is untouched.
    let controller = container.service(&a).expect("first service still present");
    assert_eq!(controller.state(), State::Up);
}

#[test]
fn duplicate_names_within_a_batch_are_rejected_on_add() {
    let container = ServiceContainer::new();
    let a = ServiceName::of("a");

    let mut batch = container.batch_builder();
    batch.add_service(a.clone(), noop()).unwrap();
    assert!(matches!(
        batch.add_service(a.clone(), noop()),
        Err(InstallError::DuplicateService { .. })
    ));
}

#[test]
fn failed_batches_unlink_from_preexisting_services() {
    let container = ServiceContainer::new();
    let log = TransitionLog::new();
    let base = ServiceName::of("base");

    let mut batch = container.batch_builder();
    batch.add_listener(log.clone());
    batch.add_service(base.clone(), noop()).unwrap();
    batch.install().unwrap();
    assert!(log.await_transition(&base, State::Up, TEST_TIMEOUT));

    // This batch partially installs (c is resolved first), then fails.
    let c = ServiceName::of("c");
    let mut bad = container.batch_builder();
    bad.add_service(c.clone(), noop())
        .unwrap()
        .add_dependency(base.clone());
    bad.add_service(ServiceName::of("d"), noop())
        .unwrap()
        .add_dependency(ServiceName::of("missing"));
    assert!(matches!(
        bad.install(),
        Err(InstallError::MissingDependency { .. })
    ));
    assert!(container.service(&c).is_none());

    // The rollback released its dependency link: base can still be removed.
    container.service(&base).unwrap().remove();
    assert!(log.await_transition(&base, State::Removed, TEST_TIMEOUT));
    assert!(container.service(&base).is_none());
}

#[test]
fn linear_chain_of_ten_thousand_installs_iteratively() {
    let container = ServiceContainer::new();
    let log = TransitionLog::new();
    const CHAIN: usize = 10_000;

    let names: Vec<ServiceName> = (0..CHAIN)
        .map(|i| ServiceName::of(format!("chain.{i}")))
        .collect();

    let mut batch = container.batch_builder();
    batch.add_listener(log.clone());
    // Deepest dependent first, so resolution descends the full chain and
    // must unwind it without recursing.
    for i in (0..CHAIN).rev() {
        let mut builder = batch.add_service(names[i].clone(), noop()).unwrap();
        if i > 0 {
            builder.add_dependency(names[i - 1].clone());
        }
    }
    batch.install().unwrap();

    for name in &names {
        assert!(container.service(name).is_some());
    }

    // The whole chain comes up, strictly in dependency order.
    assert!(
        log.await_transition(&names[CHAIN - 1], State::Up, Duration::from_secs(60)),
        "chain head never came up"
    );
    assert_eq!(log.entering(State::Starting), names);
}

#[test]
fn install_is_atomic_under_a_failing_tail_entry() {
    let container = ServiceContainer::new();
    let names: Vec<ServiceName> = (0..50).map(|i| ServiceName::of(format!("s.{i}"))).collect();

    let mut batch = container.batch_builder();
    for (i, name) in names.iter().enumerate() {
        let mut builder = batch.add_service(name.clone(), noop()).unwrap();
        if i > 0 {
            builder.add_dependency(names[i - 1].clone());
        }
    }
    batch
        .add_service(ServiceName::of("tail"), noop())
        .unwrap()
        .add_dependency(ServiceName::of("nowhere"));

    assert!(batch.install().is_err());
    // Nothing was released to start, so nothing shows up later either.
    std::thread::sleep(Duration::from_millis(100));
    for name in &names {
        assert!(container.service(name).is_none(), "{name} leaked");
    }
}
