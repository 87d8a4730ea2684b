//! Cloud API seams
//!
//! The scanner only talks to STS, IAM and Organizations through these
//! traits. The `aws-sdk` feature provides SDK-backed implementations; tests
//! use in-memory fakes.

use crate::core::credentials::ScopedCredentials;
use crate::core::model::{Warning, WarningKind};
use crate::core::validation::AccountId;
use crate::error::ApiError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One page of a list-style call
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub is_truncated: bool,
    /// Continuation token for the next page
    pub marker: Option<String>,
}

impl<T> Page<T> {
    /// A final page
    pub fn complete(items: Vec<T>) -> Self {
        Page {
            items,
            is_truncated: false,
            marker: None,
        }
    }

    /// A page followed by more under `marker`
    pub fn truncated(items: Vec<T>, marker: impl Into<String>) -> Self {
        Page {
            items,
            is_truncated: true,
            marker: Some(marker.into()),
        }
    }
}

/// Role metadata as returned by GetRole / ListRoles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleInfo {
    pub name: String,
    pub arn: String,
    pub permissions_boundary_arn: Option<String>,
}

/// Managed policy attached to a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedPolicy {
    pub name: String,
    pub arn: String,
}

/// Managed policy metadata as returned by GetPolicy / ListPolicies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPolicy {
    pub name: String,
    pub arn: String,
    pub default_version_id: String,
}

/// Which managed policies ListPolicies returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyScope {
    /// Customer-managed policies of the account
    Local,
    /// AWS-managed policies
    Aws,
}

/// Organization member account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    pub id: String,
    pub name: String,
    pub status: String,
}

impl AccountSummary {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("ACTIVE")
    }
}

#[async_trait]
pub trait StsApi: Send + Sync {
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration_secs: i32,
    ) -> Result<ScopedCredentials, ApiError>;
}

/// IAM read calls made with one account's scoped credentials
///
/// Policy documents are returned raw, as IAM hands them back.
#[async_trait]
pub trait IamApi: Send + Sync {
    async fn get_role(&self, role_name: &str) -> Result<RoleInfo, ApiError>;

    async fn list_roles(&self, marker: Option<String>) -> Result<Page<RoleInfo>, ApiError>;

    async fn list_attached_role_policies(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> Result<Page<AttachedPolicy>, ApiError>;

    async fn list_role_policies(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> Result<Page<String>, ApiError>;

    async fn get_role_policy(&self, role_name: &str, policy_name: &str) -> Result<String, ApiError>;

    async fn get_policy(&self, policy_arn: &str) -> Result<ManagedPolicy, ApiError>;

    async fn get_policy_version(&self, policy_arn: &str, version_id: &str) -> Result<String, ApiError>;

    async fn list_policies(
        &self,
        scope: PolicyScope,
        marker: Option<String>,
    ) -> Result<Page<ManagedPolicy>, ApiError>;
}

/// Builds IAM clients bound to scoped credentials
pub trait IamConnector: Send + Sync {
    fn connect(&self, credentials: &ScopedCredentials) -> Arc<dyn IamApi>;
}

#[async_trait]
pub trait OrganizationsApi: Send + Sync {
    async fn list_accounts(&self, next_token: Option<String>) -> Result<Page<AccountSummary>, ApiError>;

    async fn describe_account(&self, account_id: &AccountId) -> Result<AccountSummary, ApiError>;
}

/// Run one API call under a deadline
pub(crate) async fn with_timeout<T, F>(operation: &str, limit: Duration, call: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::timeout(operation)),
    }
}

/// Items gathered across pages plus any listing warnings
#[derive(Debug)]
pub(crate) struct Collected<T> {
    pub items: Vec<T>,
    pub warnings: Vec<Warning>,
}

/// Follow continuation markers until the listing is complete
///
/// A truncated page without a marker, a repeated marker, or hitting
/// `max_pages` stops the listing with a `PartialEnumeration` warning and
/// returns what was gathered so far.
pub(crate) async fn collect_pages<T, F, Fut>(
    operation: &str,
    limit: Duration,
    max_pages: usize,
    mut fetch: F,
) -> Result<Collected<T>, ApiError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ApiError>>,
{
    let mut items = Vec::new();
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();
    let mut marker: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = with_timeout(operation, limit, fetch(marker.take())).await?;
        pages += 1;
        items.extend(page.items);

        if !page.is_truncated {
            break;
        }

        let reason = match page.marker {
            None => Some("listing truncated without a continuation token"),
            Some(next) if !seen.insert(next.clone()) => Some("continuation token repeated"),
            Some(_) if pages >= max_pages => Some("page limit reached"),
            Some(next) => {
                marker = Some(next);
                None
            }
        };

        if let Some(reason) = reason {
            warn!(operation, pages, reason, "Partial listing");
            warnings.push(Warning::new(
                WarningKind::PartialEnumeration,
                format!("{}: {} after {} page(s)", operation, reason, pages),
            ));
            break;
        }
    }

    debug!(operation, pages, items = items.len(), "Listing complete");
    Ok(Collected { items, warnings })
}
