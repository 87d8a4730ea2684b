//! # Catrole - Cross-Account IAM Permission Resolution
//!
//! `catrole` answers "what can this role do?" across AWS accounts. From a
//! single identity it assumes a role in each target account, gathers every
//! policy attached to a principal and flattens them into permission entries:
//!
//! - **Resolve** one role or policy, by name or ARN
//! - **Search by name** for roles and customer-managed policies across an organization
//! - **Search by action** for roles granting (or denying) an action pattern
//! - **Failure isolation**: one unreachable account never aborts the scan
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "aws-sdk")]
//! # async fn run() -> catrole::Result<()> {
//! use catrole::{AccountId, CatroleBuilder};
//!
//! let catrole = CatroleBuilder::from_env()
//!     .await
//!     .assume_role("OrganizationAccountAccessRole")
//!     .build()?;
//!
//! let account = AccountId::new("123456789012")?;
//! let result = catrole.resolve_role(&account, "MyAppRole").await?;
//! for row in result.rows() {
//!     println!("{} {} {} {}", row.effect, row.action, row.resource, row.policy_name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Organization-wide search
//!
//! ```rust,no_run
//! # #[cfg(feature = "aws-sdk")]
//! # async fn run() -> catrole::Result<()> {
//! use catrole::{CatroleBuilder, ScanConfig};
//!
//! let catrole = CatroleBuilder::from_env()
//!     .await
//!     .config(ScanConfig { max_concurrency: 20, ..ScanConfig::default() })
//!     .assume_role("OrganizationAccountAccessRole")
//!     .build()?;
//!
//! // Every role in every active account that can touch S3
//! let result = catrole.search_by_action("s3:*", None).await?;
//! println!(
//!     "{} matches, {} accounts failed",
//!     result.matched_principals(),
//!     result.failed_accounts()
//! );
//! # Ok(())
//! # }
//! ```

// Core implementation
pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use crate::core::{api, config, credentials, error, fetcher, iam, model, report, scanner, validation};

// Re-export core types that users need
pub use crate::core::{
    api::{
        AccountSummary, AttachedPolicy, IamApi, IamConnector, ManagedPolicy, OrganizationsApi, Page,
        PolicyScope, RoleInfo, StsApi,
    },
    config::ScanConfig,
    credentials::{CredentialBroker, RetryPolicy, ScopedCredentials},
    error::{ApiError, ApiErrorKind, CatroleError, Result, ScanError},
    fetcher::{FetchedPolicies, ManagedDocumentCache, PolicyFetcher},
    iam::{
        CaseMode, Effect, PatternMatcher, PermissionEntry, PermissionResolver, PolicyDocument,
        PolicySource, Resolution, SourcedDocument, Statement,
    },
    model::{Account, PrincipalKind, PrincipalRef, ResolvedPrincipal, Warning, WarningKind},
    report::ReportRow,
    scanner::{
        enumerate_accounts, AccountReport, AccountSelection, AccountStatus, EnumeratedAccounts, OrgScanner,
        PrincipalOutcome, ScanMode, ScanResult,
    },
    validation::{parse_arn, AccountId},
};

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Ready-to-use scanner for the operations an operator asks for
///
/// Holds the cloud clients and the role to assume in every target account.
/// Each operation runs its own [`OrgScanner`], so assumed credentials are
/// cached for the length of one scan and never outlive it.
pub struct Catrole {
    config: ScanConfig,
    sts: Arc<dyn StsApi>,
    connector: Arc<dyn IamConnector>,
    orgs: Arc<dyn OrganizationsApi>,
    assume_role_name: String,
    cancel: Mutex<CancellationToken>,
}

impl Catrole {
    /// Resolve a role in one account
    pub async fn resolve_role(&self, account: &AccountId, role_name: &str) -> Result<ScanResult> {
        let principal = PrincipalRef::role(account.clone(), role_name);
        self.resolve(principal).await
    }

    /// Resolve a customer-managed or AWS-managed policy by name
    pub async fn resolve_policy(&self, account: &AccountId, policy_name: &str) -> Result<ScanResult> {
        let principal = PrincipalRef::policy(account.clone(), policy_name);
        self.resolve(principal).await
    }

    /// Resolve a role or policy by ARN
    ///
    /// AWS-managed policy ARNs carry no account, so `account` says where to
    /// read them from.
    pub async fn resolve_arn(&self, arn: &str, account: Option<&AccountId>) -> Result<ScanResult> {
        let principal = match account {
            Some(account) => {
                let parsed = parse_arn(arn)?;
                PrincipalRef::addressed(parsed.kind, account.clone(), parsed.name(), Some(arn))?
            }
            None => PrincipalRef::from_arn(arn)?,
        };
        self.resolve(principal).await
    }

    /// Roles and customer-managed policies whose name matches `pattern`
    ///
    /// Scans the whole organization unless `account` is given.
    pub async fn search_by_name(&self, pattern: &str, account: Option<&AccountId>) -> Result<ScanResult> {
        self.search(ScanMode::SearchByName(pattern.to_string()), account)
            .await
    }

    /// Roles with permission entries overlapping the action `pattern`
    ///
    /// Scans the whole organization unless `account` is given.
    pub async fn search_by_action(&self, pattern: &str, account: Option<&AccountId>) -> Result<ScanResult> {
        self.search(ScanMode::SearchByAction(pattern.to_string()), account)
            .await
    }

    /// Token that cancels the scans currently running on this instance
    ///
    /// Once it fires, later operations start under a fresh token, so the
    /// instance stays usable.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    /// Cancel every scan currently running on this instance
    pub fn cancel_running(&self) {
        let running = std::mem::replace(&mut *self.cancel.lock(), CancellationToken::new());
        running.cancel();
    }

    /// Child of the current token, replacing it first if it already fired
    fn scan_token(&self) -> CancellationToken {
        let mut current = self.cancel.lock();
        if current.is_cancelled() {
            *current = CancellationToken::new();
        }
        current.child_token()
    }

    /// Scanner with a credential cache scoped to one invocation
    fn scanner(&self) -> OrgScanner {
        let broker = Arc::new(CredentialBroker::new(self.sts.clone(), &self.config));
        OrgScanner::new(broker, self.connector.clone(), &self.config)
    }

    async fn resolve(&self, principal: PrincipalRef) -> Result<ScanResult> {
        info!(principal = %principal, "Resolving principal");
        let selection = AccountSelection::Single(principal.account_id.clone());
        let cancel = self.scan_token();
        self.scanner()
            .scan_selection(
                self.orgs.as_ref(),
                &selection,
                &self.assume_role_name,
                ScanMode::ResolveOne(principal),
                cancel,
            )
            .await
    }

    async fn search(&self, mode: ScanMode, account: Option<&AccountId>) -> Result<ScanResult> {
        let selection = match account {
            Some(account) => AccountSelection::Single(account.clone()),
            None => AccountSelection::Organization,
        };
        let cancel = self.scan_token();
        self.scanner()
            .scan_selection(
                self.orgs.as_ref(),
                &selection,
                &self.assume_role_name,
                mode,
                cancel,
            )
            .await
    }
}

/// Builder for [`Catrole`]
///
/// # Examples
///
/// ```rust,no_run
/// # fn wire(
/// #     sts: std::sync::Arc<dyn catrole::StsApi>,
/// #     iam: std::sync::Arc<dyn catrole::IamConnector>,
/// #     orgs: std::sync::Arc<dyn catrole::OrganizationsApi>,
/// # ) -> catrole::Result<()> {
/// use catrole::CatroleBuilder;
///
/// let catrole = CatroleBuilder::new()
///     .assume_role("AuditRole")
///     .sts(sts)
///     .iam_connector(iam)
///     .organizations(orgs)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct CatroleBuilder {
    config: ScanConfig,
    assume_role_name: Option<String>,
    sts: Option<Arc<dyn StsApi>>,
    connector: Option<Arc<dyn IamConnector>>,
    orgs: Option<Arc<dyn OrganizationsApi>>,
}

impl CatroleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder wired to the AWS SDK with the default credential chain
    #[cfg(feature = "aws-sdk")]
    pub async fn from_env() -> Self {
        let sdk = crate::core::aws::load_sdk_config().await;
        Self::new()
            .sts(Arc::new(crate::core::aws::AwsSts::new(&sdk)))
            .organizations(Arc::new(crate::core::aws::AwsOrganizations::new(&sdk)))
            .iam_connector(Arc::new(crate::core::aws::AwsIamConnector::new(sdk)))
    }

    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// Role to assume in every target account
    pub fn assume_role(mut self, name: impl Into<String>) -> Self {
        self.assume_role_name = Some(name.into());
        self
    }

    pub fn sts(mut self, sts: Arc<dyn StsApi>) -> Self {
        self.sts = Some(sts);
        self
    }

    pub fn iam_connector(mut self, connector: Arc<dyn IamConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn organizations(mut self, orgs: Arc<dyn OrganizationsApi>) -> Self {
        self.orgs = Some(orgs);
        self
    }

    /// Validate the configuration and assemble the scanner
    pub fn build(self) -> Result<Catrole> {
        self.config.check()?;

        let assume_role_name = self
            .assume_role_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| CatroleError::Config("an assume-role name is required".to_string()))?;
        let sts = self
            .sts
            .ok_or_else(|| CatroleError::Config("an STS client is required".to_string()))?;
        let connector = self
            .connector
            .ok_or_else(|| CatroleError::Config("an IAM connector is required".to_string()))?;
        let orgs = self
            .orgs
            .ok_or_else(|| CatroleError::Config("an Organizations client is required".to_string()))?;

        Ok(Catrole {
            config: self.config,
            sts,
            connector,
            orgs,
            assume_role_name,
            cancel: Mutex::new(CancellationToken::new()),
        })
    }
}
