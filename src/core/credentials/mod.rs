//! Scoped credentials for target accounts
//!
//! The broker assumes a named role in each target account and caches the
//! resulting temporary credentials until they get close to expiry.
//! Concurrent requests for the same account share a single in-flight
//! AssumeRole call; requests for different accounts never wait on each other.

mod cache;
mod retry;

pub use cache::{CachedCredentials, CredentialCache};
pub use retry::RetryPolicy;

use crate::core::api::{with_timeout, StsApi};
use crate::core::config::ScanConfig;
use crate::core::validation::{role_arn, AccountId};
use crate::error::{ApiErrorKind, ScanError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Temporary credentials returned by AssumeRole
#[derive(Clone, PartialEq, Eq)]
pub struct ScopedCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl ScopedCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
        expiration: DateTime<Utc>,
    ) -> Self {
        ScopedCredentials {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: session_token.into(),
            expiration,
        }
    }

    /// Whether at least `margin` of validity remains at `now`
    pub fn valid_for(&self, margin: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.expiration - now >= margin
    }
}

impl std::fmt::Debug for ScopedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &"** redacted **")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Obtains and caches scoped credentials per account
pub struct CredentialBroker {
    sts: Arc<dyn StsApi>,
    cache: CredentialCache,
    session_name: String,
    session_duration_secs: i32,
    refresh_margin: chrono::Duration,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl CredentialBroker {
    pub fn new(sts: Arc<dyn StsApi>, config: &ScanConfig) -> Self {
        CredentialBroker {
            sts,
            cache: CredentialCache::new(config.credential_cache_capacity),
            session_name: config.session_name.clone(),
            session_duration_secs: config.session_duration_secs,
            refresh_margin: chrono::Duration::seconds(config.refresh_margin_secs as i64),
            call_timeout: config.call_timeout(),
            retry: config.retry.clone(),
        }
    }

    /// Credentials for `account_id` obtained by assuming `assume_role_name`
    ///
    /// Reuses cached credentials while at least the refresh margin of
    /// validity remains.
    ///
    /// # Errors
    ///
    /// - `AssumeRoleDenied` when the role does not trust the caller (never retried)
    /// - `AccountUnreachable` when retries are exhausted or the call fails otherwise
    #[tracing::instrument(skip(self, account_id), fields(account = %account_id))]
    pub async fn acquire(
        &self,
        assume_role_name: &str,
        account_id: &AccountId,
    ) -> Result<ScopedCredentials, ScanError> {
        let role_arn = role_arn(account_id, assume_role_name);
        let slot = self.cache.slot(account_id);

        // Held across the assumption so concurrent callers for this account wait
        let mut cached = slot.lock().await;
        if let Some(entry) = cached.as_ref() {
            if entry.role_arn == role_arn && entry.credentials.valid_for(self.refresh_margin, Utc::now()) {
                debug!("Credential cache hit");
                return Ok(entry.credentials.clone());
            }
        }

        let credentials = self.assume(&role_arn, account_id).await?;
        *cached = Some(CachedCredentials {
            role_arn,
            credentials: credentials.clone(),
        });
        Ok(credentials)
    }

    async fn assume(&self, role_arn: &str, account_id: &AccountId) -> Result<ScopedCredentials, ScanError> {
        let mut attempts = 0u32;
        loop {
            let result = with_timeout(
                "AssumeRole",
                self.call_timeout,
                self.sts
                    .assume_role(role_arn, &self.session_name, self.session_duration_secs),
            )
            .await;
            attempts += 1;

            let err = match result {
                Ok(credentials) => {
                    debug!(attempts, expiration = %credentials.expiration, "Assumed role");
                    return Ok(credentials);
                }
                Err(err) => err,
            };

            if err.kind == ApiErrorKind::AccessDenied {
                return Err(ScanError::AssumeRoleDenied {
                    role_arn: role_arn.to_string(),
                    message: err.message,
                });
            }

            if !err.is_retryable() || !self.retry.allows_retry(attempts) {
                warn!(attempts, error = %err, "Giving up on account");
                return Err(ScanError::AccountUnreachable {
                    account_id: account_id.to_string(),
                    reason: err.to_string(),
                });
            }

            let delay = self.retry.delay_for_attempt(attempts - 1);
            warn!(attempts, delay_ms = delay.as_millis() as u64, error = %err, "Retrying AssumeRole");
            tokio::time::sleep(delay).await;
        }
    }

    /// Forget cached credentials for an account
    pub fn invalidate(&self, account_id: &AccountId) {
        self.cache.invalidate(account_id);
    }

    pub fn cached_accounts(&self) -> usize {
        self.cache.len()
    }
}
