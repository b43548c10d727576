//! Session-scoped cache
//!
//! Holds the signed-in user's token so a run does not re-read the credential
//! file on every push. It is constructed explicitly and handed to whoever
//! needs it; `clear()` must be called on sign-out and whenever the remote
//! store rejects the cached credentials.

use std::sync::{PoisonError, RwLock};

use crate::client::AuthToken;

#[derive(Default)]
pub struct SessionCache {
    token: RwLock<Option<AuthToken>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> Option<AuthToken> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_token(&self, token: AuthToken) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    /// Drop everything tied to the current session
    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_drops_token() {
        let cache = SessionCache::new();
        assert!(cache.token().is_none());

        cache.set_token(AuthToken::new("uid", "t"));
        assert_eq!(cache.token().map(|t| t.uid), Some("uid".to_string()));

        cache.clear();
        assert!(cache.token().is_none());
    }
}
