//! One sync cycle for one feature
//!
//! A cycle walks `Idle -> Starting -> Running -> (Idle | Retrying)`:
//! check the capability gate, post the foreground notification, take one
//! sample, merge it into the ledger and push the merged entry. Every failure
//! is folded into a [`CycleOutcome`]; nothing escapes as an error.
//!
//! The notification outlives the cycle that posted it. It stays up while the
//! feature keeps doing periodic work and comes down when the feature is
//! disabled, the worker is released, or a cycle fails in a way retrying
//! cannot fix.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::db::models::{CycleState, Feature, FeatureState, LedgerEntry};
use crate::error::{FailureKind, Result};
use crate::storage::{Ledger, Storage};

use super::capability::{CapabilityGate, ForegroundService};
use super::sampler::{SampleOutcome, Sampler};
use super::uploader::{PushError, Uploader};

/// What asked for a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Boot,
    /// App came to the foreground; only pending features run
    Foreground,
    Tick,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    /// Another cycle for the feature is in flight
    Busy,
    NotPending,
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Entry merged and pushed
    Synced(LedgerEntry),
    /// Sample merged locally but nothing was pushed
    Recorded(Option<LedgerEntry>),
    /// No sample arrived before the sampler timeout
    TimedOut,
    Skipped(SkipReason),
    Failed { kind: FailureKind, detail: String },
}

impl CycleOutcome {
    fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        CycleOutcome::Failed {
            kind,
            detail: detail.into(),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            CycleOutcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Timeouts and defaults for a worker
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub sample_timeout: Duration,
    pub cycle_timeout: Duration,
    pub default_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sample_timeout: Duration::from_secs(20),
            cycle_timeout: Duration::from_secs(30),
            default_interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Holds the busy flag for the lifetime of a cycle
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs sync cycles for a single feature
pub struct FeatureWorker {
    feature: Feature,
    storage: Storage,
    ledger: Ledger,
    sampler: Arc<dyn Sampler>,
    uploader: Arc<dyn Uploader>,
    gate: Arc<dyn CapabilityGate>,
    foreground: Arc<dyn ForegroundService>,
    config: WorkerConfig,
    busy: AtomicBool,
}

impl FeatureWorker {
    pub fn new(
        storage: Storage,
        sampler: Arc<dyn Sampler>,
        uploader: Arc<dyn Uploader>,
        gate: Arc<dyn CapabilityGate>,
        foreground: Arc<dyn ForegroundService>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            feature: sampler.feature(),
            ledger: storage.ledger(),
            storage,
            sampler,
            uploader,
            gate,
            foreground,
            config,
            busy: AtomicBool::new(false),
        }
    }

    pub fn feature(&self) -> Feature {
        self.feature
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Current persisted state of the feature
    pub fn state(&self) -> Result<FeatureState> {
        self.storage
            .feature_state(self.feature, self.config.default_interval)
    }

    /// Cancel the ongoing-work notification for this feature
    pub fn release_foreground(&self) {
        self.foreground.stop(self.feature);
    }

    /// Run one cycle. A trigger arriving while a cycle is active is dropped.
    pub async fn run_cycle(&self, trigger: Trigger) -> CycleOutcome {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            debug!(feature = %self.feature, ?trigger, "cycle already in flight, dropping trigger");
            return CycleOutcome::Skipped(SkipReason::Busy);
        };

        match self.cycle(trigger).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(feature = %self.feature, error = %e, "sync state unavailable");
                if let Err(e) = self.rest(CycleState::Idle) {
                    error!(feature = %self.feature, error = %e, "failed to reset cycle state");
                }
                self.release_foreground();
                CycleOutcome::failed(FailureKind::Unavailable, e.to_string())
            }
        }
    }

    async fn cycle(&self, trigger: Trigger) -> Result<CycleOutcome> {
        let feature = self.feature;
        let mut state = self.state()?;

        if !state.enabled {
            debug!(%feature, ?trigger, "feature disabled, not starting");
            self.release_foreground();
            return Ok(CycleOutcome::Skipped(SkipReason::Disabled));
        }
        if trigger == Trigger::Foreground && !state.pending {
            return Ok(CycleOutcome::Skipped(SkipReason::NotPending));
        }

        if !self.gate.can_start_foreground_work(feature) {
            return self.defer(state, "foreground work not allowed right now");
        }

        state.cycle_state = CycleState::Starting;
        self.storage.save_feature_state(&state)?;
        info!(%feature, ?trigger, "cycle starting");

        if let Err(e) = self.foreground.start(feature) {
            return self.defer(state, &e.to_string());
        }

        state.cycle_state = CycleState::Running;
        state.pending = false;
        self.storage.save_feature_state(&state)?;

        let outcome =
            match tokio::time::timeout(self.config.cycle_timeout, self.sample_and_push()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(%feature, timeout = ?self.config.cycle_timeout, "cycle timed out");
                    CycleOutcome::failed(FailureKind::NetworkError, "cycle timed out")
                }
            };

        self.finish(&outcome)?;
        Ok(outcome)
    }

    /// Gate refused: remember the trigger for the next foreground transition
    fn defer(&self, mut state: FeatureState, reason: &str) -> Result<CycleOutcome> {
        debug!(feature = %self.feature, reason, "start deferred, pending flag set");
        state.pending = true;
        state.cycle_state = CycleState::Idle;
        self.storage.save_feature_state(&state)?;
        Ok(CycleOutcome::failed(FailureKind::CapabilityDenied, reason))
    }

    async fn sample_and_push(&self) -> CycleOutcome {
        let feature = self.feature;

        let sample = match self.sampler.sample(self.config.sample_timeout).await {
            SampleOutcome::Value(sample) => sample,
            SampleOutcome::Timeout => {
                debug!(%feature, "no sample before timeout");
                return CycleOutcome::TimedOut;
            }
            SampleOutcome::Unavailable => {
                return CycleOutcome::failed(FailureKind::Unavailable, "no provider for feature")
            }
            SampleOutcome::PermissionDenied => {
                return CycleOutcome::failed(
                    FailureKind::PermissionDenied,
                    "provider permission not granted",
                )
            }
        };

        let entry = match self.ledger.merge(sample.day_key(), &sample) {
            Ok(Some(entry)) => entry,
            Ok(None) => return CycleOutcome::Recorded(None),
            Err(e) => {
                error!(%feature, error = %e, "failed to merge sample into ledger");
                return CycleOutcome::failed(FailureKind::Unavailable, e.to_string());
            }
        };

        match self.uploader.push(&entry).await {
            Ok(()) => CycleOutcome::Synced(entry),
            Err(PushError::NotSignedIn) => {
                debug!(%feature, "not signed in, keeping entry local");
                CycleOutcome::Recorded(Some(entry))
            }
            Err(PushError::Auth(msg)) => {
                warn!(%feature, error = %msg, "remote store rejected credentials, sign in again");
                CycleOutcome::failed(FailureKind::AuthError, msg)
            }
            Err(PushError::Network(msg)) => {
                warn!(%feature, error = %msg, "push failed, will retry");
                CycleOutcome::failed(FailureKind::NetworkError, msg)
            }
        }
    }

    /// Persist the resting state a cycle ended in
    fn finish(&self, outcome: &CycleOutcome) -> Result<()> {
        let mut state = self.state()?;

        match outcome {
            CycleOutcome::Synced(_) => {
                state.cycle_state = CycleState::Idle;
                state.auth_required = false;
                state.last_error = None;
                state.last_synced_at = Some(Utc::now());
            }
            CycleOutcome::Recorded(_) | CycleOutcome::TimedOut | CycleOutcome::Skipped(_) => {
                state.cycle_state = CycleState::Idle;
                state.last_error = None;
            }
            CycleOutcome::Failed { kind, detail } => {
                if kind.is_user_visible() {
                    state.auth_required = true;
                    state.last_error = Some(format!("{}: {}", kind, detail));
                } else {
                    debug!(feature = %self.feature, %kind, %detail, "cycle failed silently");
                    state.last_error = None;
                }
                state.cycle_state = if kind.is_deferred() {
                    state.pending = true;
                    CycleState::Retrying
                } else {
                    self.release_foreground();
                    CycleState::Idle
                };
            }
        }

        info!(feature = %self.feature, state = %state.cycle_state, "cycle finished");
        self.storage.save_feature_state(&state)
    }

    fn rest(&self, cycle_state: CycleState) -> Result<()> {
        self.storage.lock()?.set_cycle_state(self.feature, cycle_state)
    }
}
