//! OS-level reading providers

mod command;

pub use command::{CommandSource, ReadingParser};

use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::db::models::Feature;
use crate::error::{Result, SyncError};
use crate::sync::sampler::{Listener, RegistrationId, SampleSource};

/// Stand-in for a feature with no provider configured. Always unavailable.
#[derive(Debug)]
pub struct MissingSource {
    feature: Feature,
}

impl SampleSource for MissingSource {
    fn feature(&self) -> Feature {
        self.feature
    }

    fn is_available(&self) -> bool {
        false
    }

    fn register(&self, _listener: Listener) -> Result<RegistrationId> {
        Err(SyncError::provider(format!(
            "No provider configured for {}",
            self.feature
        )))
    }

    fn unregister(&self, _id: RegistrationId) {}
}

/// Provider for a feature as configured
pub fn source_for(feature: Feature, config: &ProviderConfig) -> Arc<dyn SampleSource> {
    match config.for_feature(feature) {
        Some(command) => Arc::new(CommandSource::new(feature, command.clone())),
        None => Arc::new(MissingSource { feature }),
    }
}
