//! Running sync cycles

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use crate::cli::AppContext;
use crate::db::models::Feature;
use crate::error::{Result, SyncError};
use crate::sync::{AppLifecycle, CycleOutcome, Scheduler, SkipReason};

use super::ledger::format_value;

fn describe(outcome: &CycleOutcome) -> String {
    match outcome {
        CycleOutcome::Synced(entry) => format!("synced {} ({})", entry.day_key, format_value(entry)),
        CycleOutcome::Recorded(Some(entry)) => format!(
            "recorded {} locally ({}), not pushed",
            entry.day_key,
            format_value(entry)
        ),
        CycleOutcome::Recorded(None) => "reading stored as baseline, nothing to push".to_string(),
        CycleOutcome::TimedOut => "no reading before the timeout".to_string(),
        CycleOutcome::Skipped(SkipReason::Disabled) => {
            "feature is disabled ('telesync feature enable')".to_string()
        }
        CycleOutcome::Skipped(SkipReason::Busy) => "a cycle is already running".to_string(),
        CycleOutcome::Skipped(SkipReason::NotPending) => "nothing pending".to_string(),
        CycleOutcome::Failed { kind, detail } => format!("{}: {}", kind, detail),
    }
}

/// App lifecycle change reported to a running scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Foreground,
    Background,
}

/// SIGUSR1 moves the app to the foreground, SIGUSR2 to the background
#[cfg(unix)]
struct Transitions {
    foreground: tokio::signal::unix::Signal,
    background: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Transitions {
    fn listen() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            foreground: signal(SignalKind::user_defined1())?,
            background: signal(SignalKind::user_defined2())?,
        })
    }

    async fn next(&mut self) -> Transition {
        tokio::select! {
            _ = self.foreground.recv() => Transition::Foreground,
            _ = self.background.recv() => Transition::Background,
        }
    }
}

#[cfg(not(unix))]
struct Transitions;

#[cfg(not(unix))]
impl Transitions {
    fn listen() -> Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> Transition {
        std::future::pending().await
    }
}

async fn apply(scheduler: &Scheduler, transition: Transition) -> Result<()> {
    match transition {
        Transition::Foreground => {
            for (feature, outcome) in scheduler.on_foreground().await? {
                println!("{}: {}", feature, describe(&outcome));
            }
        }
        Transition::Background => scheduler.on_background(),
    }
    Ok(())
}

/// Run one cycle for a feature now
pub async fn tick(
    feature: Feature,
    foreground: bool,
    profile: Option<String>,
    config: Option<PathBuf>,
) -> Result<()> {
    let ctx = AppContext::load(profile, config)?;
    let lifecycle = Arc::new(AppLifecycle::new(ctx.config.os_restricts_background_start));
    lifecycle.set_foreground(foreground);

    let scheduler = ctx.scheduler(lifecycle)?;

    let outcome = scheduler
        .tick(feature)
        .await
        .ok_or_else(|| SyncError::invalid_param(format!("No worker for {}", feature)))?;

    println!("{}: {}", feature, describe(&outcome));
    Ok(())
}

/// Run the scheduler until interrupted
pub async fn run(
    foreground: bool,
    boot: bool,
    profile: Option<String>,
    config: Option<PathBuf>,
) -> Result<()> {
    let ctx = AppContext::load(profile, config)?;
    let lifecycle = Arc::new(AppLifecycle::new(ctx.config.os_restricts_background_start));
    let scheduler = Arc::new(ctx.scheduler(lifecycle)?);

    scheduler.recover()?;
    info!(profile = ctx.credentials.profile(), "scheduler starting");

    let mut transitions = Transitions::listen()?;
    if foreground {
        apply(&scheduler, Transition::Foreground).await?;
    }

    let tickers = scheduler.start();

    let boot_task = boot.then(|| {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            for (feature, outcome) in scheduler.on_boot_completed().await {
                println!("{}: {}", feature, describe(&outcome));
            }
        })
    });

    println!("Running. Press Ctrl-C to stop.");
    loop {
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => {
                interrupted?;
                break;
            }
            transition = transitions.next() => {
                info!(?transition, "app lifecycle changed");
                if let Err(e) = apply(&scheduler, transition).await {
                    error!(error = %e, "failed to apply lifecycle change");
                }
            }
        }
    }

    info!("shutting down");
    scheduler.shutdown();
    if let Some(task) = boot_task {
        task.abort();
    }
    for ticker in tickers {
        if let Err(e) = ticker.await {
            error!(error = %e, "ticker task failed");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SessionCache;
    use crate::config::{AppConfig, CredentialStore};
    use crate::error::FailureKind;
    use crate::storage::Storage;

    #[tokio::test]
    async fn test_transitions_toggle_foreground() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = AppContext {
            config: AppConfig::default(),
            credentials: Arc::new(
                CredentialStore::with_dir("test", dir.path().to_path_buf()).unwrap(),
            ),
            storage: Storage::open_in_memory().unwrap(),
            cache: Arc::new(SessionCache::new()),
        };
        let lifecycle = Arc::new(AppLifecycle::new(true));
        let scheduler = ctx.scheduler(lifecycle.clone()).unwrap();

        apply(&scheduler, Transition::Foreground).await.unwrap();
        assert!(lifecycle.is_foreground());
        apply(&scheduler, Transition::Background).await.unwrap();
        assert!(!lifecycle.is_foreground());
    }

    #[test]
    fn test_describe_failure() {
        let outcome = CycleOutcome::Failed {
            kind: FailureKind::AuthError,
            detail: "token rejected".to_string(),
        };
        assert_eq!(describe(&outcome), "authentication error: token rejected");
    }
}
