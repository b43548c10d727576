//! One-shot sampling from a listener-style provider
//!
//! Providers deliver readings through a callback. The sampler turns that into
//! a single awaited value: register one listener, take the first valid
//! reading or give up at the timeout, and unregister exactly once either way.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::db::models::{Feature, Reading, Sample};
use crate::error::Result;

/// Identifier handed out by a provider for one listener registration
pub type RegistrationId = u64;

const LISTENER_CAPACITY: usize = 16;

/// Callback end handed to a provider
#[derive(Clone, Debug)]
pub struct Listener {
    tx: mpsc::Sender<Reading>,
}

impl Listener {
    pub fn new(tx: mpsc::Sender<Reading>) -> Self {
        Self { tx }
    }

    /// Deliver a reading. Returns false once nobody is listening any more.
    pub fn deliver(&self, reading: Reading) -> bool {
        match self.tx.try_send(reading) {
            Ok(()) => true,
            // Only the first valid reading matters; a full buffer just drops extras
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// An OS-level provider of readings (a sensor, a location service)
pub trait SampleSource: Send + Sync {
    fn feature(&self) -> Feature;

    fn has_permission(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        true
    }

    fn register(&self, listener: Listener) -> Result<RegistrationId>;

    fn unregister(&self, id: RegistrationId);
}

/// Result of one sampling attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Value(Sample),
    Timeout,
    Unavailable,
    PermissionDenied,
}

#[async_trait]
pub trait Sampler: Send + Sync {
    fn feature(&self) -> Feature;

    /// Obtain at most one sample, waiting no longer than `timeout`
    async fn sample(&self, timeout: Duration) -> SampleOutcome;
}

/// Unregisters its listener exactly once: explicitly or when dropped
struct Registration<'a> {
    source: &'a dyn SampleSource,
    id: Option<RegistrationId>,
}

impl Registration<'_> {
    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.source.unregister(id);
            debug!(feature = %self.source.feature(), id, "listener unregistered");
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// [`Sampler`] over a callback-based [`SampleSource`]
pub struct ListenerSampler {
    source: Arc<dyn SampleSource>,
}

impl ListenerSampler {
    pub fn new(source: Arc<dyn SampleSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Sampler for ListenerSampler {
    fn feature(&self) -> Feature {
        self.source.feature()
    }

    async fn sample(&self, timeout: Duration) -> SampleOutcome {
        let source = self.source.as_ref();
        let feature = source.feature();

        if !source.has_permission() {
            return SampleOutcome::PermissionDenied;
        }
        if !source.is_available() {
            return SampleOutcome::Unavailable;
        }

        let (tx, mut rx) = mpsc::channel(LISTENER_CAPACITY);
        let id = match source.register(Listener::new(tx)) {
            Ok(id) => id,
            Err(e) => {
                warn!(%feature, error = %e, "failed to register listener");
                return SampleOutcome::Unavailable;
            }
        };
        debug!(%feature, id, "listener registered");
        let mut registration = Registration {
            source,
            id: Some(id),
        };

        let first_valid = tokio::time::timeout(timeout, async {
            while let Some(reading) = rx.recv().await {
                if reading.feature() == feature && reading.is_valid() {
                    return Some(reading);
                }
                debug!(%feature, ?reading, "ignoring invalid reading");
            }
            None
        })
        .await;

        registration.release();

        match first_valid {
            Ok(Some(reading)) => SampleOutcome::Value(Sample::now(reading)),
            Ok(None) => SampleOutcome::Unavailable,
            Err(_) => SampleOutcome::Timeout,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSource;
    use super::*;
    use crate::db::models::Location;

    const TIMEOUT: Duration = Duration::from_secs(20);

    #[tokio::test]
    async fn test_first_valid_value_wins() {
        let source = Arc::new(FakeSource::new(
            Feature::Steps,
            vec![
                Reading::StepCounter { raw: -4 },
                Reading::StepCounter { raw: 812 },
                Reading::StepCounter { raw: 900 },
            ],
        ));
        let sampler = ListenerSampler::new(source.clone());

        match sampler.sample(TIMEOUT).await {
            SampleOutcome::Value(sample) => {
                assert_eq!(sample.reading, Reading::StepCounter { raw: 812 })
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(source.registrations(), 1);
        assert_eq!(source.unregistrations(), 1);
        assert_eq!(source.active_listeners(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_unregisters_exactly_once() {
        let source = Arc::new(FakeSource::silent(Feature::Location));
        let sampler = ListenerSampler::new(source.clone());

        let outcome = sampler.sample(TIMEOUT).await;
        assert_eq!(outcome, SampleOutcome::Timeout);
        assert_eq!(source.registrations(), 1);
        assert_eq!(source.unregistrations(), 1);
        assert_eq!(source.active_listeners(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_arriving_later_is_taken() {
        let source = Arc::new(FakeSource::silent(Feature::Location));
        let sampler = ListenerSampler::new(source.clone());

        let emitter = {
            let source = source.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                source.emit(Reading::Location(Location {
                    latitude: 1.0,
                    longitude: 2.0,
                    accuracy: 3.0,
                }));
            })
        };

        let outcome = sampler.sample(TIMEOUT).await;
        emitter.await.unwrap();
        assert!(matches!(outcome, SampleOutcome::Value(_)));
        assert_eq!(source.unregistrations(), 1);
    }

    #[tokio::test]
    async fn test_permission_denied_skips_registration() {
        let mut source = FakeSource::silent(Feature::Location);
        source.permission = false;
        let source = Arc::new(source);
        let sampler = ListenerSampler::new(source.clone());

        assert_eq!(sampler.sample(TIMEOUT).await, SampleOutcome::PermissionDenied);
        assert_eq!(source.registrations(), 0);
        assert_eq!(source.unregistrations(), 0);
    }

    #[tokio::test]
    async fn test_missing_provider_is_unavailable() {
        let mut source = FakeSource::silent(Feature::Steps);
        source.available = false;
        let source = Arc::new(source);

        let outcome = ListenerSampler::new(source.clone()).sample(TIMEOUT).await;
        assert_eq!(outcome, SampleOutcome::Unavailable);
        assert_eq!(source.registrations(), 0);
    }

    #[tokio::test]
    async fn test_failed_registration_is_unavailable() {
        let mut source = FakeSource::silent(Feature::Steps);
        source.fail_register = true;
        let source = Arc::new(source);

        let outcome = ListenerSampler::new(source.clone()).sample(TIMEOUT).await;
        assert_eq!(outcome, SampleOutcome::Unavailable);
        assert_eq!(source.unregistrations(), 0);
    }

    #[tokio::test]
    async fn test_closed_provider_without_value_is_unavailable() {
        let mut source = FakeSource::new(Feature::Steps, vec![Reading::StepCounter { raw: -1 }]);
        source.hold_open = false;
        let source = Arc::new(source);

        let outcome = ListenerSampler::new(source.clone()).sample(TIMEOUT).await;
        assert_eq!(outcome, SampleOutcome::Unavailable);
        assert_eq!(source.unregistrations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sample_future_still_unregisters() {
        let source = Arc::new(FakeSource::silent(Feature::Steps));
        let sampler = ListenerSampler::new(source.clone());

        // Outer deadline shorter than the sampler timeout cancels the future
        let cancelled = tokio::time::timeout(Duration::from_secs(1), sampler.sample(TIMEOUT)).await;
        assert!(cancelled.is_err());
        assert_eq!(source.registrations(), 1);
        assert_eq!(source.unregistrations(), 1);
    }
}
