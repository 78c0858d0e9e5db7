// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use threadpool::ThreadPool;

/// A unit of container work: a start callback, a stop callback, or the
/// notification fan-out of a transition.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs lifecycle callbacks for one or more containers.
///
/// The default executor is a shared thread pool sized to the machine. Hosts
/// that want different scheduling (serialized starts, an existing pool, a
/// test harness) plug in a closure with [`Executor::new_custom`].
///
/// # Examples
///
/// ```
/// use stagehand::{Executor, ServiceContainer};
///
/// let container = ServiceContainer::with_executor(Executor::with_threads(2));
/// # let _ = container;
/// ```
#[derive(Clone)]
pub struct Executor {
    kind: ExecutorKind,
}

#[derive(Clone)]
enum ExecutorKind {
    Pool(ThreadPool),
    Custom(Arc<dyn Fn(Job) + Send + Sync>),
}

impl Executor {
    /// A pool executor with one worker per available CPU.
    #[must_use]
    pub fn new() -> Self {
        Self {
            kind: ExecutorKind::Pool(
                threadpool::Builder::new()
                    .thread_name("stagehand-worker".to_string())
                    .build(),
            ),
        }
    }

    /// A pool executor with a fixed worker count.
    #[must_use]
    pub fn with_threads(threads: usize) -> Self {
        Self {
            kind: ExecutorKind::Pool(
                threadpool::Builder::new()
                    .num_threads(threads)
                    .thread_name("stagehand-worker".to_string())
                    .build(),
            ),
        }
    }

    /// An executor backed by a host-supplied scheduling function.
    ///
    /// The function receives each job and decides where it runs. Running
    /// jobs inline on the calling thread works for small containers but
    /// turns dependency chains into recursion; prefer handing jobs to a
    /// queue or pool when service counts are large.
    pub fn new_custom<F>(schedule: F) -> Self
    where
        F: Fn(Job) + Send + Sync + 'static,
    {
        Self {
            kind: ExecutorKind::Custom(Arc::new(schedule)),
        }
    }

    pub(crate) fn execute(&self, job: impl FnOnce() + Send + 'static) {
        match &self.kind {
            ExecutorKind::Pool(pool) => pool.execute(job),
            ExecutorKind::Custom(schedule) => schedule(Box::new(job)),
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ExecutorKind::Pool(_) => "pool",
            ExecutorKind::Custom(_) => "custom",
        };
        f.debug_tuple("Executor").field(&kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Executor: Send, Sync, Clone);
    }

    #[test]
    fn pool_runs_jobs() {
        let executor = Executor::with_threads(1);
        let (tx, rx) = mpsc::channel();
        executor.execute(move || tx.send(7).unwrap());
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(10)).unwrap(), 7);
    }

    #[test]
    fn custom_decides_where_jobs_run() {
        let executor = Executor::new_custom(|job| job());
        let (tx, rx) = mpsc::channel();
        executor.execute(move || tx.send("inline").unwrap());
        assert_eq!(rx.try_recv().unwrap(), "inline");
    }
}
