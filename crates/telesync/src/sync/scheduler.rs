//! Trigger sources for feature workers
//!
//! Three things start a cycle: the periodic tick of each enabled feature,
//! the boot-completed signal (after a delay) and the app coming to the
//! foreground, which drains features whose pending flag is set.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::MIN_INTERVAL;
use crate::db::models::Feature;
use crate::error::Result;
use crate::storage::Storage;

use super::capability::AppLifecycle;
use super::worker::{CycleOutcome, FeatureWorker, Trigger};

/// Shortest period a ticker is ever armed with
const TICK_FLOOR: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub boot_delay: Duration,
    /// Intervals below this are raised to it
    pub min_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            boot_delay: Duration::from_secs(60),
            min_interval: MIN_INTERVAL,
        }
    }
}

pub struct Scheduler {
    storage: Storage,
    lifecycle: Arc<AppLifecycle>,
    workers: Vec<Arc<FeatureWorker>>,
    config: SchedulerConfig,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        storage: Storage,
        lifecycle: Arc<AppLifecycle>,
        workers: Vec<Arc<FeatureWorker>>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            storage,
            lifecycle,
            workers,
            config,
            shutdown,
        }
    }

    pub fn worker(&self, feature: Feature) -> Option<&Arc<FeatureWorker>> {
        self.workers.iter().find(|w| w.feature() == feature)
    }

    /// Reset cycles a previous process left mid-flight
    pub fn recover(&self) -> Result<u32> {
        let recovered = self.storage.lock()?.recover_interrupted_cycles()?;
        if recovered > 0 {
            info!(recovered, "interrupted cycles reset to idle with pending flag");
        }
        Ok(recovered)
    }

    /// Arm the periodic ticker of every feature
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.workers
            .iter()
            .map(|worker| {
                tokio::spawn(feature_loop(
                    Arc::clone(worker),
                    self.config.min_interval,
                    self.shutdown.subscribe(),
                ))
            })
            .collect()
    }

    /// Re-arm everything once the device has finished booting
    pub async fn on_boot_completed(&self) -> Vec<(Feature, CycleOutcome)> {
        debug!(delay = ?self.config.boot_delay, "boot completed, waiting before first cycle");
        tokio::time::sleep(self.config.boot_delay).await;
        run_all(self.workers.iter().cloned(), Trigger::Boot).await
    }

    /// App came to the foreground: run each pending feature once
    pub async fn on_foreground(&self) -> Result<Vec<(Feature, CycleOutcome)>> {
        self.lifecycle.set_foreground(true);

        let pending = self.storage.lock()?.pending_features()?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        info!(?pending, "draining pending features");

        let workers = self
            .workers
            .iter()
            .filter(|w| pending.contains(&w.feature()))
            .cloned();
        Ok(run_all(workers, Trigger::Foreground).await)
    }

    pub fn on_background(&self) {
        self.lifecycle.set_foreground(false);
    }

    /// Run one cycle for a feature right away
    pub async fn tick(&self, feature: Feature) -> Option<CycleOutcome> {
        let worker = self.worker(feature)?;
        let outcome = worker.run_cycle(Trigger::Manual).await;
        log_outcome(feature, &outcome);
        Some(outcome)
    }

    /// Stop every ticker started by [`Scheduler::start`] and take down
    /// the ongoing-work notifications
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        for worker in &self.workers {
            worker.release_foreground();
        }
    }
}

/// Ticker period for a worker, floored at `min_interval`
fn effective_period(worker: &FeatureWorker, min_interval: Duration) -> Duration {
    let requested = match worker.state() {
        Ok(state) => state.interval(),
        Err(e) => {
            error!(feature = %worker.feature(), error = %e, "failed to read interval");
            worker.config().default_interval
        }
    };
    requested.max(min_interval).max(TICK_FLOOR)
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn feature_loop(
    worker: Arc<FeatureWorker>,
    min_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let feature = worker.feature();
    let mut period = effective_period(&worker, min_interval);
    let mut ticks = ticker(period);
    debug!(%feature, ?period, "ticker armed");

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                // Spawned so an overlapping tick reaches the busy guard instead of queuing
                let w = Arc::clone(&worker);
                tokio::spawn(async move {
                    let outcome = w.run_cycle(Trigger::Tick).await;
                    log_outcome(w.feature(), &outcome);
                });

                let current = effective_period(&worker, min_interval);
                if current != period {
                    info!(%feature, from = ?period, to = ?current, "interval changed, re-arming");
                    period = current;
                    ticks = ticker(period);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(%feature, "ticker stopped");
                    break;
                }
            }
        }
    }
}

async fn run_all(
    workers: impl Iterator<Item = Arc<FeatureWorker>>,
    trigger: Trigger,
) -> Vec<(Feature, CycleOutcome)> {
    let handles: Vec<_> = workers
        .map(|worker| {
            let feature = worker.feature();
            (
                feature,
                tokio::spawn(async move { worker.run_cycle(trigger).await }),
            )
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for (feature, handle) in handles {
        match handle.await {
            Ok(outcome) => {
                log_outcome(feature, &outcome);
                outcomes.push((feature, outcome));
            }
            Err(e) => error!(%feature, error = %e, "cycle task failed"),
        }
    }
    outcomes
}

fn log_outcome(feature: Feature, outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Synced(entry) => info!(%feature, day = %entry.day_key, "synced"),
        CycleOutcome::Recorded(_) => debug!(%feature, "recorded locally"),
        CycleOutcome::TimedOut => debug!(%feature, "no sample"),
        CycleOutcome::Skipped(reason) => debug!(%feature, ?reason, "skipped"),
        CycleOutcome::Failed { kind, detail } => {
            debug!(%feature, %kind, detail = %detail, "cycle failed")
        }
    }
}
