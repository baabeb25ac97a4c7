//! Per-session cycle coordination
//!
//! One mutex per venue session serializes its background cycles (a
//! try_lock miss means a cycle is already in flight and the trigger is
//! simply skipped); one cancellation token per session lets deactivation
//! stop an in-flight cycle at its next unit-of-work boundary.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct CycleRegistry {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    tokens: RwLock<HashMap<String, CancellationToken>>,
}

impl CycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cycle mutex for a session, created on first use
    pub async fn lock_for(&self, session_guid: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(session_guid) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(session_guid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// The cancellation token for a session, created on first use
    pub async fn token_for(&self, session_guid: &str) -> CancellationToken {
        {
            let tokens = self.tokens.read().await;
            if let Some(token) = tokens.get(session_guid) {
                return token.clone();
            }
        }

        let mut tokens = self.tokens.write().await;
        tokens
            .entry(session_guid.to_string())
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Cancel any in-flight cycle for a session
    ///
    /// The token is removed so a later reactivation starts fresh.
    pub async fn cancel(&self, session_guid: &str) {
        let mut tokens = self.tokens.write().await;
        if let Some(token) = tokens.remove(session_guid) {
            token.cancel();
        }
    }
}
