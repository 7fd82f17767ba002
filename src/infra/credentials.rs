//! OAuth token storage and credential resolution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::sync::Cache;
use parking_lot::RwLock;
use secrecy::SecretString;

use crate::core::dispatcher::{Credential, CredentialProvider, PublishError};
use crate::core::{ExternalErrorKind, PipelineError};
use crate::util::{Platform, SharedClock};

/// Tokens closer than this to expiry are treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Stored OAuth grant for one user on one platform.
#[derive(Debug, Clone)]
pub struct OAuthToken {
    /// Owner.
    pub user_id: String,
    /// Platform.
    pub platform: Platform,
    /// Bearer token.
    pub access_token: SecretString,
    /// Refresh token, when granted.
    pub refresh_token: Option<SecretString>,
    /// Expiry, when the platform reports one.
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted scopes.
    pub scopes: Vec<String>,
}

impl OAuthToken {
    /// Whether the token is usable at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_none_or(|at| at > now + chrono::Duration::seconds(EXPIRY_MARGIN_SECS))
    }

    fn credential(&self) -> Credential {
        Credential {
            user_id: self.user_id.clone(),
            platform: self.platform,
            access_token: self.access_token.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Persistence for OAuth tokens.
pub trait TokenStore: Send + Sync {
    /// Token of `user_id` on `platform`.
    fn get_token(&self, user_id: &str, platform: Platform)
        -> Result<Option<OAuthToken>, PipelineError>;
    /// Insert or replace a token.
    fn save_token(&self, token: OAuthToken) -> Result<(), PipelineError>;
    /// Delete a token; returns whether one existed.
    fn revoke_token(&self, user_id: &str, platform: Platform) -> Result<bool, PipelineError>;
}

/// In-memory [`TokenStore`].
#[derive(Default)]
pub struct InMemoryTokenStore {
    tokens: RwLock<HashMap<(String, Platform), OAuthToken>>,
}

impl InMemoryTokenStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for InMemoryTokenStore {
    fn get_token(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<OAuthToken>, PipelineError> {
        Ok(self
            .tokens
            .read()
            .get(&(user_id.to_string(), platform))
            .cloned())
    }

    fn save_token(&self, token: OAuthToken) -> Result<(), PipelineError> {
        self.tokens
            .write()
            .insert((token.user_id.clone(), token.platform), token);
        Ok(())
    }

    fn revoke_token(&self, user_id: &str, platform: Platform) -> Result<bool, PipelineError> {
        Ok(self
            .tokens
            .write()
            .remove(&(user_id.to_string(), platform))
            .is_some())
    }
}

/// [`CredentialProvider`] backed by a [`TokenStore`] with a TTL cache.
pub struct TokenCredentialProvider {
    tokens: Arc<dyn TokenStore>,
    clock: SharedClock,
    cache: Cache<(String, Platform), Credential>,
}

impl TokenCredentialProvider {
    /// Resolved credentials are reused for at most `cache_ttl`.
    pub fn new(tokens: Arc<dyn TokenStore>, clock: SharedClock, cache_ttl: Duration) -> Self {
        Self {
            tokens,
            clock,
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(cache_ttl)
                .build(),
        }
    }

    /// Drop a cached credential after its token changed.
    pub fn invalidate(&self, user_id: &str, platform: Platform) {
        self.cache.invalidate(&(user_id.to_string(), platform));
    }
}

#[async_trait]
impl CredentialProvider for TokenCredentialProvider {
    async fn get_valid_credential(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Credential, PublishError> {
        let now = self.clock.now();
        let key = (user_id.to_string(), platform);
        let margin = chrono::Duration::seconds(EXPIRY_MARGIN_SECS);

        if let Some(cached) = self.cache.get(&key) {
            if cached.expires_at.is_none_or(|at| at > now + margin) {
                return Ok(cached);
            }
            self.cache.invalidate(&key);
        }

        let token = self
            .tokens
            .get_token(user_id, platform)
            .map_err(|e| PublishError::new(ExternalErrorKind::Transient, e.to_string()))?
            .ok_or_else(|| {
                PublishError::new(
                    ExternalErrorKind::Unauthorized,
                    format!("no {platform} credential for user {user_id}"),
                )
            })?;
        if !token.is_valid_at(now) {
            tracing::info!(user_id = user_id, platform = %platform, "stored token expired");
            return Err(PublishError::new(
                ExternalErrorKind::Unauthorized,
                format!("{platform} token for user {user_id} expired"),
            ));
        }
        let credential = token.credential();
        self.cache.insert(key, credential.clone());
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{Clock, ManualClock};

    fn token(expires_at: Option<DateTime<Utc>>) -> OAuthToken {
        OAuthToken {
            user_id: "user-1".into(),
            platform: Platform::LinkedIn,
            access_token: SecretString::from("tok".to_string()),
            refresh_token: None,
            expires_at,
            scopes: vec!["w_member_social".into()],
        }
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let provider = TokenCredentialProvider::new(
            Arc::new(InMemoryTokenStore::new()),
            Arc::new(ManualClock::starting_now()),
            Duration::from_secs(300),
        );
        let err = provider
            .get_valid_credential("user-1", Platform::LinkedIn)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExternalErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn cached_credential_expires_with_token() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryTokenStore::new());
        store
            .save_token(token(Some(clock.now() + chrono::Duration::minutes(10))))
            .unwrap();
        let provider =
            TokenCredentialProvider::new(store.clone(), clock.clone(), Duration::from_secs(3600));

        assert!(provider
            .get_valid_credential("user-1", Platform::LinkedIn)
            .await
            .is_ok());

        clock.advance(chrono::Duration::minutes(15));
        let err = provider
            .get_valid_credential("user-1", Platform::LinkedIn)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExternalErrorKind::Unauthorized);
    }
}
