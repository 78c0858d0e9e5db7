// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A start that completes later, from another thread.

use std::thread;
use std::time::Duration;

use stagehand::{ServiceContainer, ServiceName, State, service_fn};

fn main() -> Result<(), stagehand::InstallError> {
    let container = ServiceContainer::new();
    let warmup = ServiceName::of("warmup");

    let mut batch = container.batch_builder();
    batch.add_service(
        warmup.clone(),
        service_fn(
            |context| {
                // Declare deferred completion, hand the context to whatever
                // finishes the work, and return immediately.
                context.asynchronous()?;
                let context = context.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(300));
                    println!("warmup finished, completing the start");
                    let _ = context.complete();
                });
                Ok(())
            },
            |_| (),
        ),
    )?;
    batch.install()?;

    let controller = container.required_service(&warmup).expect("installed above");
    while controller.state() != State::Up {
        println!("still {:?}...", controller.state());
        thread::sleep(Duration::from_millis(100));
    }
    println!("now {:?}", controller.state());

    Ok(())
}
