//! Command-line front end

pub mod commands;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::SessionCache;
use crate::client::RemoteStoreClient;
use crate::config::{AppConfig, CredentialStore, MIN_INTERVAL};
use crate::db::models::Feature;
use crate::error::Result;
use crate::providers;
use crate::storage::{default_storage_path, Storage};
use crate::sync::{
    AppLifecycle, FeatureWorker, ListenerSampler, RemoteUploader, Scheduler, SchedulerConfig,
    WorkerConfig,
};

/// Everything a command needs, opened for one profile
pub struct AppContext {
    pub config: AppConfig,
    pub credentials: Arc<CredentialStore>,
    pub storage: Storage,
    pub cache: Arc<SessionCache>,
}

impl AppContext {
    pub fn load(profile: Option<String>, config_path: Option<PathBuf>) -> Result<Self> {
        let config = match config_path {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::load_default()?,
        };
        let credentials = CredentialStore::new(profile)?;
        let storage = Storage::open(default_storage_path(credentials.profile())?)?;

        Ok(Self {
            config,
            credentials: Arc::new(credentials),
            storage,
            cache: Arc::new(SessionCache::new()),
        })
    }

    pub fn uploader(&self) -> Result<RemoteUploader> {
        let client = RemoteStoreClient::new(&self.config.remote_url)?;
        Ok(RemoteUploader::new(
            client,
            Arc::clone(&self.credentials),
            Arc::clone(&self.cache),
        ))
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            sample_timeout: self.config.sample_timeout,
            cycle_timeout: self.config.cycle_timeout,
            default_interval: self.config.default_interval,
        }
    }

    /// Scheduler with one worker per feature
    pub fn scheduler(&self, lifecycle: Arc<AppLifecycle>) -> Result<Scheduler> {
        let uploader = Arc::new(self.uploader()?);

        let workers = Feature::ALL
            .iter()
            .map(|&feature| {
                let source = providers::source_for(feature, &self.config.providers);
                Arc::new(FeatureWorker::new(
                    self.storage.clone(),
                    Arc::new(ListenerSampler::new(source)),
                    uploader.clone(),
                    lifecycle.clone(),
                    lifecycle.clone(),
                    self.worker_config(),
                ))
            })
            .collect();

        let min_interval = if self.config.allow_short_intervals {
            Duration::ZERO
        } else {
            MIN_INTERVAL
        };

        Ok(Scheduler::new(
            self.storage.clone(),
            lifecycle,
            workers,
            SchedulerConfig {
                boot_delay: self.config.boot_delay,
                min_interval,
            },
        ))
    }
}
