use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::channel::Broadcaster;
use crate::market::PriceGenerator;
use crate::store::SharedStore;

#[derive(Debug)]
pub struct Simulation {
    store: SharedStore,
    generator: Arc<PriceGenerator>,
    broadcaster: Arc<Broadcaster>,
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

// The write lock is released before the broadcast, HTTP writes can land in between.
async fn run_tick(store: &SharedStore, generator: &PriceGenerator, broadcaster: &Broadcaster) {
    let updated = {
        let mut store = store.write().await;
        generator.tick(&mut store)
    };
    debug!("Tick moved {updated} prices");
    broadcaster.tick().await;
}

impl Simulation {
    pub fn new(
        store: SharedStore,
        generator: Arc<PriceGenerator>,
        broadcaster: Arc<Broadcaster>,
        period: Duration,
    ) -> Self {
        Self {
            store,
            generator,
            broadcaster,
            period,
            task: Mutex::new(None),
        }
    }

    /// Runs a single tick inline.
    pub async fn tick(&self) {
        run_tick(&self.store, &self.generator, &self.broadcaster).await;
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Starts ticking every period. No-op while already running.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let store = self.store.clone();
        let generator = self.generator.clone();
        let broadcaster = self.broadcaster.clone();
        let period = self.period;

        *task = Some(tokio::task::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                run_tick(&store, &generator, &broadcaster).await;
            }
        }));
        info!("Simulation started, ticking every {:?}", period);
    }

    /// Stops the timer. A tick already running is cut at its next await.
    /// Safe to call any number of times.
    pub fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
            info!("Simulation stopped");
        }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.stop();
    }
}
