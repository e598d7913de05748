//! A recurring-job primitive: `schedule(name, period, fn)` /
//! `cancel_by_name(name)`, realized in-process with a named `JoinHandle`
//! rather than an external job queue.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Registry of named recurring jobs. `schedule` cancels any prior job under
/// the same name before starting the new one, so rescheduling under a name
/// already in use always yields exactly one running job for that name.
#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make_tick` every `period`, under the name `name`. `make_tick` is
    /// called once per firing to produce the future for that tick, so each
    /// invocation can borrow fresh state (e.g. a cloned `Arc`).
    pub fn schedule<F, Fut>(&self, name: &str, period: Duration, mut make_tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel_by_name(name);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                make_tick().await;
            }
        });

        self.jobs
            .lock()
            .expect("scheduler mutex poisoned")
            .insert(name.to_string(), handle);
    }

    /// Cancel the job registered under `name`, if any.
    pub fn cancel_by_name(&self, name: &str) {
        if let Some(handle) = self
            .jobs
            .lock()
            .expect("scheduler mutex poisoned")
            .remove(name)
        {
            handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (_, handle) in self.jobs.lock().expect("scheduler mutex poisoned").drain() {
            handle.abort();
        }
    }
}
