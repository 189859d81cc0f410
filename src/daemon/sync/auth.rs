use std::{fmt::Debug, time::Duration};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{
    daemon::storage::kv::{get_typed, set_typed, KeyValueStore},
    utils::{
        clock::Clock,
        retry::{retry, RetryPolicy},
    },
};

pub const AUTH_KEY: &str = "authSession";

/// Reading the stored session races with the browser side writing it on startup.
pub const AUTH_RETRY: RetryPolicy = RetryPolicy::linear(3, Duration::from_millis(500));

/// Signed in user. Without one, sync is disabled and tracking works as usual.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user_id: String,
    pub token: String,
}

impl Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Loads the persisted session. Storage errors are retried according to `policy`; a missing
/// session is a valid answer and isn't retried.
pub async fn load_session(
    store: &impl KeyValueStore,
    clock: &dyn Clock,
    policy: &RetryPolicy,
) -> Result<Option<AuthSession>> {
    retry(policy, clock, |_| get_typed::<AuthSession>(store, AUTH_KEY)).await
}

pub async fn save_session(store: &impl KeyValueStore, session: &AuthSession) -> Result<()> {
    set_typed(store, AUTH_KEY, session).await
}

pub async fn clear_session(store: &impl KeyValueStore) -> Result<()> {
    store.remove(AUTH_KEY).await
}
