//! Short-lived OAuth callback state.

use std::time::Duration;

use moka::sync::Cache;
use serde::{Deserialize, Serialize};

use crate::util::Platform;

/// An authorization started but not yet completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    /// User connecting the account.
    pub user_id: String,
    /// Platform being connected.
    pub platform: Platform,
    /// Where the platform sends the user back.
    pub redirect_uri: String,
}

/// Maps the opaque `state` parameter of an OAuth redirect to the pending
/// authorization. Entries expire after the TTL and can be taken only once.
pub struct OAuthStateCache {
    states: Cache<String, PendingAuthorization>,
}

impl OAuthStateCache {
    /// Cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            states: Cache::builder().max_capacity(100_000).time_to_live(ttl).build(),
        }
    }

    /// Remember `pending` and return the state token to send to the platform.
    pub fn issue(&self, pending: PendingAuthorization) -> String {
        let state = uuid::Uuid::new_v4().simple().to_string();
        tracing::debug!(user_id = %pending.user_id, platform = %pending.platform, "oauth state issued");
        self.states.insert(state.clone(), pending);
        state
    }

    /// Consume a state token from a callback.
    ///
    /// Unknown, expired, and already used tokens all return `None`.
    pub fn take(&self, state: &str) -> Option<PendingAuthorization> {
        self.states.remove(state)
    }
}

impl Default for OAuthStateCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(10 * 60))
    }
}
