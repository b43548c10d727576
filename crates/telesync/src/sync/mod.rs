//! Sync module for periodic telemetry upload
//!
//! Provides:
//! - One-shot sampling from listener-style providers
//! - A single best-effort push per cycle to the remote store
//! - The capability gate consulted before any foreground work
//! - Per-feature workers running the cycle state machine
//! - A scheduler wiring ticks, boot and foreground triggers to the workers

pub mod capability;
pub mod sampler;
pub mod scheduler;
pub mod uploader;
pub mod worker;

pub use capability::{AppLifecycle, CapabilityGate, ForegroundService};
pub use sampler::{Listener, ListenerSampler, RegistrationId, SampleOutcome, SampleSource, Sampler};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use uploader::{PushError, RemoteUploader, Uploader};
pub use worker::{CycleOutcome, FeatureWorker, SkipReason, Trigger, WorkerConfig};
