//! Authentication commands for telesync

use std::path::PathBuf;

use crate::cli::AppContext;
use crate::client::AuthToken;
use crate::db::models::Feature;
use crate::error::{Result, SyncError};

/// Execute the login command
pub async fn login(
    uid: String,
    token: String,
    expires_in: Option<i64>,
    profile: Option<String>,
    config: Option<PathBuf>,
) -> Result<()> {
    if uid.trim().is_empty() || token.trim().is_empty() {
        return Err(SyncError::invalid_param("uid and token must not be empty"));
    }

    let ctx = AppContext::load(profile, config)?;

    let mut auth = AuthToken::new(uid.trim(), token.trim());
    if let Some(seconds) = expires_in {
        auth = auth.expiring_in(seconds);
    }
    ctx.credentials.save_token(&auth)?;
    ctx.cache.clear();

    // A fresh sign-in resolves any earlier credential rejection
    for feature in Feature::ALL {
        let mut state = ctx
            .storage
            .feature_state(feature, ctx.config.default_interval)?;
        if state.auth_required {
            state.auth_required = false;
            state.last_error = None;
            ctx.storage.save_feature_state(&state)?;
        }
    }

    println!("Successfully logged in!");
    println!("Profile: {}", ctx.credentials.profile());
    println!("User: {}", auth.uid);

    Ok(())
}

/// Execute the logout command
pub async fn logout(profile: Option<String>, config: Option<PathBuf>) -> Result<()> {
    let ctx = AppContext::load(profile, config)?;

    if !ctx.credentials.has_credentials() {
        println!("Not logged in.");
        return Ok(());
    }

    ctx.credentials.clear()?;
    ctx.cache.clear();

    println!("Successfully logged out.");
    Ok(())
}

/// Execute the status command
pub async fn status(profile: Option<String>, config: Option<PathBuf>) -> Result<()> {
    let ctx = AppContext::load(profile, config)?;

    let token = match ctx.credentials.load_token() {
        Ok(Some(token)) => token,
        Ok(None) => {
            println!("Status: Not logged in");
            println!("Run 'telesync auth login' to authenticate.");
            return Ok(());
        }
        Err(_) => {
            println!("Status: Credentials corrupted");
            println!("Run 'telesync auth logout' then 'telesync auth login' to fix.");
            return Ok(());
        }
    };

    println!("Status: Logged in");
    println!("Profile: {}", ctx.credentials.profile());
    println!("User: {}", token.uid);
    println!("Remote: {}", ctx.config.remote_url);

    match token.expires_in() {
        None => println!("Token: Valid (no expiry)"),
        Some(_) if token.is_expired() => {
            println!("Token: Expired (run 'telesync auth login' again)")
        }
        Some(expires_in) if expires_in > 3600 => {
            println!("Token: Valid (expires in {} hours)", expires_in / 3600)
        }
        Some(expires_in) if expires_in > 60 => {
            println!("Token: Valid (expires in {} minutes)", expires_in / 60)
        }
        Some(expires_in) => println!("Token: Valid (expires in {} seconds)", expires_in),
    }

    Ok(())
}
