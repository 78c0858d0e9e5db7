// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Two services with a dependency edge and a listener watching them rise.

use std::thread;
use std::time::Duration;

use stagehand::{
    Mode, ServiceContainer, ServiceController, ServiceListener, ServiceName, State, service_fn,
};

struct PrintListener;

impl ServiceListener for PrintListener {
    fn transition(&self, controller: &ServiceController, old: State, new: State) {
        println!("{}: {old:?} -> {new:?}", controller.name());
    }
}

fn main() -> Result<(), stagehand::InstallError> {
    let container = ServiceContainer::new();
    let database = ServiceName::of("app.database");
    let server = ServiceName::of("app.server");

    let mut batch = container.batch_builder();
    batch.add_listener(PrintListener);

    batch.add_service(
        database.clone(),
        service_fn(
            |_| {
                println!("database: opening");
                Ok(())
            },
            |_| println!("database: closing"),
        ),
    )?;

    // The server only starts once the database is up, and stops before the
    // database does.
    batch
        .add_service(
            server.clone(),
            service_fn(
                |_| {
                    println!("server: listening");
                    Ok(())
                },
                |_| println!("server: draining"),
            ),
        )?
        .add_dependency(database.clone());

    batch.install()?;
    thread::sleep(Duration::from_millis(200));

    println!("--- stopping the database bounces the server first ---");
    container
        .required_service(&database)
        .expect("installed above")
        .set_mode(Mode::Never);
    thread::sleep(Duration::from_millis(200));

    Ok(())
}
