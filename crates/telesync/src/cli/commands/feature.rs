//! Feature toggles and status

use std::path::PathBuf;

use crate::cli::AppContext;
use crate::config::{format_interval, parse_interval};
use crate::db::models::{DayKey, Feature, FeatureState};
use crate::error::Result;
use crate::sync::PushError;

use super::ledger::format_value;

/// Enable a feature, optionally changing its interval
pub async fn enable(
    feature: Feature,
    interval: Option<String>,
    profile: Option<String>,
    config: Option<PathBuf>,
) -> Result<()> {
    let ctx = AppContext::load(profile, config)?;
    let mut state = ctx
        .storage
        .feature_state(feature, ctx.config.default_interval)?;

    if let Some(raw) = interval {
        let requested = parse_interval(&raw)?;
        let effective = ctx.config.effective_interval(requested);
        if effective != requested {
            println!(
                "Interval raised to {} (shortest allowed background interval)",
                format_interval(effective)
            );
        }
        state.interval_secs = effective.as_secs();
    }
    state.enabled = true;
    ctx.storage.save_feature_state(&state)?;

    println!(
        "Enabled {} every {}",
        feature,
        format_interval(state.interval())
    );
    mirror_settings(&ctx, &state).await;
    Ok(())
}

/// Disable a feature. Its ledger is kept.
pub async fn disable(
    feature: Feature,
    profile: Option<String>,
    config: Option<PathBuf>,
) -> Result<()> {
    let ctx = AppContext::load(profile, config)?;
    let mut state = ctx
        .storage
        .feature_state(feature, ctx.config.default_interval)?;

    state.enabled = false;
    state.pending = false;
    ctx.storage.save_feature_state(&state)?;

    println!("Disabled {}", feature);
    mirror_settings(&ctx, &state).await;
    Ok(())
}

/// Show the sync state of every feature
pub async fn status(remote: bool, profile: Option<String>, config: Option<PathBuf>) -> Result<()> {
    let ctx = AppContext::load(profile, config)?;
    let uploader = if remote { Some(ctx.uploader()?) } else { None };
    let today = DayKey::today();

    println!("Profile: {}", ctx.credentials.profile());
    if !ctx.credentials.has_credentials() {
        println!("Not logged in: samples are recorded locally only");
    }

    for feature in Feature::ALL {
        let state = ctx
            .storage
            .feature_state(feature, ctx.config.default_interval)?;
        println!();
        print_state(&state);

        if let Some(entry) = ctx.storage.ledger().get(feature, today)? {
            println!("  Today:       {}", format_value(&entry));
        }

        if let Some(uploader) = &uploader {
            match uploader.fetch_settings(feature).await {
                Ok(Some(settings)) => println!(
                    "  Remote:      {} every {}m",
                    if settings.enabled { "enabled" } else { "disabled" },
                    settings.interval
                ),
                Ok(None) => println!("  Remote:      no settings stored"),
                Err(e) => println!("  Remote:      unavailable ({})", e),
            }
        }
    }

    Ok(())
}

fn print_state(state: &FeatureState) {
    println!("{}", state.feature);
    println!(
        "  Enabled:     {}",
        if state.enabled { "yes" } else { "no" }
    );
    println!("  Interval:    {}", format_interval(state.interval()));
    println!("  State:       {}", state.cycle_state);
    if state.pending {
        println!("  Pending:     yes (runs when the app is next in the foreground)");
    }
    if state.auth_required {
        println!("  Attention:   sign-in rejected, run 'telesync auth login'");
    }
    if let Some(err) = &state.last_error {
        println!("  Last error:  {}", err);
    }
    match state.last_synced_at {
        Some(at) => println!("  Last sync:   {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Last sync:   never"),
    }
}

/// Best-effort copy of the settings to the remote store
async fn mirror_settings(ctx: &AppContext, state: &FeatureState) {
    let uploader = match ctx.uploader() {
        Ok(uploader) => uploader,
        Err(e) => {
            println!("Settings not mirrored: {}", e);
            return;
        }
    };

    match uploader.push_settings(state.feature, state.settings()).await {
        Ok(()) => println!("Settings mirrored to remote store"),
        Err(PushError::NotSignedIn) => {}
        Err(e) => println!("Settings not mirrored: {}", e),
    }
}
