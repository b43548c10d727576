//! Foreground-work capability gate
//!
//! Platforms that restrict background starts only let a feature begin work
//! while the app is in the foreground or while that feature already shows
//! its ongoing-work notification. The gate is asked before every cycle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::db::models::Feature;
use crate::error::Result;

/// Decides whether a feature may begin foreground work right now
pub trait CapabilityGate: Send + Sync {
    fn can_start_foreground_work(&self, feature: Feature) -> bool;
}

/// Ongoing-work indicator a feature keeps up while it does periodic work
pub trait ForegroundService: Send + Sync {
    fn start(&self, feature: Feature) -> Result<()>;
    fn stop(&self, feature: Feature);
}

/// Process-level view of the app lifecycle
#[derive(Debug)]
pub struct AppLifecycle {
    foreground: AtomicBool,
    notifications: Mutex<HashSet<Feature>>,
    os_restricted: bool,
}

impl AppLifecycle {
    /// `os_restricted` is false on platforms that predate background-start restrictions
    pub fn new(os_restricted: bool) -> Self {
        Self {
            foreground: AtomicBool::new(false),
            notifications: Mutex::new(HashSet::new()),
            os_restricted,
        }
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.foreground.store(foreground, Ordering::SeqCst);
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground.load(Ordering::SeqCst)
    }

    pub fn notification_active(&self, feature: Feature) -> bool {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&feature)
    }
}

impl CapabilityGate for AppLifecycle {
    fn can_start_foreground_work(&self, feature: Feature) -> bool {
        !self.os_restricted || self.is_foreground() || self.notification_active(feature)
    }
}

impl ForegroundService for AppLifecycle {
    fn start(&self, feature: Feature) -> Result<()> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(feature);
        debug!(%feature, "foreground work notification posted");
        Ok(())
    }

    fn stop(&self, feature: Feature) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&feature);
        debug!(%feature, "foreground work notification cancelled");
    }
}
