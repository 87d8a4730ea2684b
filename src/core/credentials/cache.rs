//! LRU cache of per-account credential slots
//!
//! Each account gets its own slot guarded by an async mutex. The index lock
//! is only held long enough to look a slot up, so a refresh in one account
//! never waits on another account.

use super::ScopedCredentials;
use crate::core::validation::AccountId;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Credentials cached for one account, with the role they were assumed from
#[derive(Debug, Clone)]
pub struct CachedCredentials {
    pub role_arn: String,
    pub credentials: ScopedCredentials,
}

pub type CredentialSlot = Arc<tokio::sync::Mutex<Option<CachedCredentials>>>;

/// LRU index of credential slots keyed by account
pub struct CredentialCache {
    slots: Mutex<LruCache<AccountId, CredentialSlot>>,
}

impl CredentialCache {
    /// Create a new cache holding at most `capacity` accounts
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        CredentialCache {
            slots: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Slot for an account, created empty on first use
    pub fn slot(&self, account: &AccountId) -> CredentialSlot {
        let mut slots = self.slots.lock();
        slots
            .get_or_insert(account.clone(), || Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    /// Drop any cached credentials for an account
    pub fn invalidate(&self, account: &AccountId) {
        self.slots.lock().pop(account);
    }

    /// Clear the cache
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
