//! Account fan-out
//!
//! Runs credential assumption, policy retrieval and resolution for every
//! target account concurrently:
//! - A shared semaphore bounds in-flight account and principal tasks
//! - Each account writes its report into its own slot exactly once
//! - Per-account and per-principal failures are recorded, never raised
//! - A cancellation token stops work at the next network call

mod accounts;
mod result;

pub use accounts::{enumerate_accounts, AccountSelection, EnumeratedAccounts};
pub use result::{AccountReport, AccountStatus, PrincipalOutcome, ScanResult};

use crate::core::api::{collect_pages, IamApi, IamConnector, OrganizationsApi, PolicyScope};
use crate::core::config::ScanConfig;
use crate::core::credentials::CredentialBroker;
use crate::core::fetcher::{FetchedPolicies, ManagedDocumentCache, PolicyFetcher};
use crate::core::iam::{PatternMatcher, PermissionResolver};
use crate::core::model::{Account, PrincipalRef, ResolvedPrincipal, SourceSummary, Warning, WarningKind};
use crate::error::{ApiError, ApiErrorKind, CatroleError, Result, ScanError};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a scan looks for in each account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanMode {
    /// Resolve one role or policy (exactly one account)
    ResolveOne(PrincipalRef),
    /// Roles and customer-managed policies whose name matches the pattern
    SearchByName(String),
    /// Roles with at least one entry whose action overlaps the pattern
    SearchByAction(String),
}

/// Scan mode with its pattern compiled
#[derive(Debug)]
enum Plan {
    ResolveOne(PrincipalRef),
    SearchByName(PatternMatcher),
    SearchByAction(PatternMatcher),
}

impl Plan {
    fn compile(mode: ScanMode) -> Result<Self> {
        Ok(match mode {
            ScanMode::ResolveOne(principal) => Plan::ResolveOne(principal),
            ScanMode::SearchByName(pattern) => Plan::SearchByName(PatternMatcher::compile(&pattern)?),
            ScanMode::SearchByAction(pattern) => {
                Plan::SearchByAction(PatternMatcher::compile_action(&pattern)?)
            }
        })
    }
}

/// Fans resolution and search out across accounts
#[derive(Clone)]
pub struct OrgScanner {
    broker: Arc<CredentialBroker>,
    connector: Arc<dyn IamConnector>,
    fetcher: PolicyFetcher,
    resolver: PermissionResolver,
    config: ScanConfig,
}

/// State shared by every task of one scan invocation
struct ScanRun {
    scanner: OrgScanner,
    plan: Plan,
    assume_role_name: String,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl OrgScanner {
    pub fn new(broker: Arc<CredentialBroker>, connector: Arc<dyn IamConnector>, config: &ScanConfig) -> Self {
        OrgScanner {
            broker,
            connector,
            fetcher: PolicyFetcher::new(config),
            resolver: PermissionResolver::new(),
            config: config.clone(),
        }
    }

    /// Enumerate the selected accounts, then scan them
    ///
    /// The pattern is compiled before any network call.
    pub async fn scan_selection(
        &self,
        orgs: &dyn OrganizationsApi,
        selection: &AccountSelection,
        assume_role_name: &str,
        mode: ScanMode,
        cancel: CancellationToken,
    ) -> Result<ScanResult> {
        let plan = Plan::compile(mode)?;
        let enumerated = enumerate_accounts(orgs, selection, &self.config).await?;
        let mut result = self
            .run(enumerated.accounts, assume_role_name, plan, cancel)
            .await?;
        result.warnings.extend(enumerated.warnings);
        Ok(result)
    }

    /// Scan the given accounts
    ///
    /// Returns exactly one [`AccountReport`] per input account, in input
    /// order, whatever happened to it.
    ///
    /// # Errors
    ///
    /// Only invocation-level problems fail the scan: an invalid pattern, an
    /// empty account list, or a `ResolveOne` scan over more than one account.
    pub async fn scan(
        &self,
        accounts: Vec<Account>,
        assume_role_name: &str,
        mode: ScanMode,
        cancel: CancellationToken,
    ) -> Result<ScanResult> {
        let plan = Plan::compile(mode)?;
        self.run(accounts, assume_role_name, plan, cancel).await
    }

    async fn run(
        &self,
        accounts: Vec<Account>,
        assume_role_name: &str,
        plan: Plan,
        cancel: CancellationToken,
    ) -> Result<ScanResult> {
        if accounts.is_empty() {
            return Err(CatroleError::NoAccounts);
        }
        if matches!(plan, Plan::ResolveOne(_)) && accounts.len() != 1 {
            return Err(CatroleError::AccountCountMismatch(accounts.len()));
        }

        info!(accounts = accounts.len(), mode = ?plan, "Starting scan");

        let run = Arc::new(ScanRun {
            scanner: self.clone(),
            plan,
            assume_role_name: assume_role_name.to_string(),
            permits: Arc::new(Semaphore::new(self.config.max_concurrency.max(1))),
            cancel,
        });

        let mut slots: Vec<Option<AccountReport>> = vec![None; accounts.len()];
        let mut tasks = JoinSet::new();
        for (index, account) in accounts.iter().cloned().enumerate() {
            let run = run.clone();
            tasks.spawn(async move { (index, run.scan_account(account).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => {
                    if slots[index].is_none() {
                        slots[index] = Some(report);
                    }
                }
                Err(e) => warn!(error = %e, "Account task aborted"),
            }
        }

        let cancelled = run.cancel.is_cancelled();
        let reports: Vec<AccountReport> = slots
            .into_iter()
            .zip(accounts)
            .map(|(slot, account)| {
                slot.unwrap_or_else(|| {
                    let error = if cancelled {
                        ScanError::Cancelled
                    } else {
                        ScanError::Internal {
                            message: "account task ended without a result".to_string(),
                        }
                    };
                    AccountReport::failed(account, error)
                })
            })
            .collect();

        let result = ScanResult {
            accounts: reports,
            warnings: Vec::new(),
            cancelled,
        };
        info!(
            succeeded = result.succeeded_accounts(),
            failed = result.failed_accounts(),
            matched = result.matched_principals(),
            cancelled,
            "Scan finished"
        );
        Ok(result)
    }
}

impl ScanRun {
    #[tracing::instrument(skip(self, account), fields(account = %account.id))]
    async fn scan_account(&self, account: Account) -> AccountReport {
        match self.try_scan_account(&account).await {
            Ok((principals, warnings)) => AccountReport::succeeded(account, principals, warnings),
            Err(error) => {
                warn!(error = %error, "Account failed");
                AccountReport::failed(account, error)
            }
        }
    }

    async fn try_scan_account(
        &self,
        account: &Account,
    ) -> std::result::Result<(Vec<PrincipalOutcome>, Vec<Warning>), ScanError> {
        // Released before fanning out to candidates, which take their own permits
        let permit = self.permit().await?;

        let credentials = self
            .guarded(self.scanner.broker.acquire(&self.assume_role_name, &account.id))
            .await?;
        let iam = self.scanner.connector.connect(&credentials);

        match &self.plan {
            Plan::ResolveOne(principal) => {
                let outcome = self.resolve(iam.as_ref(), principal.clone(), None).await;
                drop(permit);
                Ok((vec![outcome], Vec::new()))
            }
            Plan::SearchByName(pattern) => {
                let (candidates, warnings) = self.name_candidates(iam.as_ref(), account, pattern).await?;
                drop(permit);
                debug!(candidates = candidates.len(), "Name search candidates");

                let outcomes = join_all(candidates.into_iter().map(|principal| {
                    let iam = iam.clone();
                    async move {
                        match self.permit().await {
                            Ok(_permit) => self.resolve(iam.as_ref(), principal, None).await,
                            Err(error) => PrincipalOutcome::Failed { principal, error },
                        }
                    }
                }))
                .await;
                Ok((outcomes, warnings))
            }
            Plan::SearchByAction(pattern) => {
                let (candidates, warnings) = self.role_candidates(iam.as_ref(), account).await?;
                drop(permit);
                debug!(candidates = candidates.len(), "Action search candidates");

                let managed = ManagedDocumentCache::new();
                let outcomes = join_all(candidates.into_iter().map(|principal| {
                    let iam = iam.clone();
                    let managed = &managed;
                    async move {
                        match self.permit().await {
                            Ok(_permit) => self.resolve(iam.as_ref(), principal, Some(managed)).await,
                            Err(error) => PrincipalOutcome::Failed { principal, error },
                        }
                    }
                }))
                .await;

                let matched = outcomes
                    .into_iter()
                    .filter_map(|outcome| match outcome {
                        PrincipalOutcome::Resolved(mut resolved) => {
                            resolved.retain_matching_actions(pattern);
                            (!resolved.entries.is_empty()).then_some(PrincipalOutcome::Resolved(resolved))
                        }
                        failed => Some(failed),
                    })
                    .collect();
                Ok((matched, warnings))
            }
        }
    }

    /// Fetch and resolve one principal, recording failure as an outcome
    async fn resolve(
        &self,
        iam: &dyn IamApi,
        principal: PrincipalRef,
        managed: Option<&ManagedDocumentCache>,
    ) -> PrincipalOutcome {
        let fetched = self
            .guarded(self.scanner.fetcher.fetch_with_cache(iam, &principal, managed))
            .await;
        match fetched {
            Ok(fetched) => PrincipalOutcome::Resolved(self.materialize(principal, fetched)),
            Err(error) => {
                warn!(principal = %principal, error = %error, "Principal failed");
                PrincipalOutcome::Failed { principal, error }
            }
        }
    }

    fn materialize(&self, principal: PrincipalRef, fetched: FetchedPolicies) -> ResolvedPrincipal {
        let resolution = self
            .scanner
            .resolver
            .resolve(&fetched.documents, &fetched.boundary);

        let sources = fetched
            .documents
            .iter()
            .chain(fetched.boundary.iter())
            .map(|d| SourceSummary {
                name: d.name.clone(),
                source: d.source,
            })
            .collect();

        let mut warnings = fetched.warnings;
        warnings.extend(resolution.warnings);

        ResolvedPrincipal {
            principal,
            entries: resolution.entries,
            sources,
            warnings,
        }
    }

    /// Roles and customer-managed policies whose name matches
    async fn name_candidates(
        &self,
        iam: &dyn IamApi,
        account: &Account,
        pattern: &PatternMatcher,
    ) -> std::result::Result<(Vec<PrincipalRef>, Vec<Warning>), ScanError> {
        let (roles, mut warnings) = self.role_candidates(iam, account).await?;
        let mut candidates: Vec<PrincipalRef> = roles
            .into_iter()
            .filter(|role| pattern.matches(&role.name))
            .collect();

        let listed = self
            .guarded(async {
                Ok(
                    collect_pages("ListPolicies", self.call_timeout(), self.scanner.config.max_pages, move |marker| {
                        iam.list_policies(PolicyScope::Local, marker)
                    })
                    .await,
                )
            })
            .await?;

        // Role matches survive a failed policy listing
        let policies = match listed {
            Ok(policies) => policies,
            Err(e) => {
                let error = listing_error(account, e);
                warn!(error = %error, "Customer-managed policies not listed");
                warnings.push(Warning::new(
                    WarningKind::ListingFailed,
                    format!("customer-managed policies skipped: {}", error),
                ));
                return Ok((candidates, warnings));
            }
        };
        warnings.extend(policies.warnings);

        candidates.extend(
            policies
                .items
                .into_iter()
                .filter(|policy| pattern.matches(&policy.name))
                .map(|policy| {
                    let mut principal = PrincipalRef::policy(account.id.clone(), policy.name);
                    principal.arn = Some(policy.arn);
                    principal
                }),
        );
        Ok((candidates, warnings))
    }

    async fn role_candidates(
        &self,
        iam: &dyn IamApi,
        account: &Account,
    ) -> std::result::Result<(Vec<PrincipalRef>, Vec<Warning>), ScanError> {
        let roles = self
            .guarded(async {
                collect_pages("ListRoles", self.call_timeout(), self.scanner.config.max_pages, move |marker| {
                    iam.list_roles(marker)
                })
                .await
                .map_err(|e| listing_error(account, e))
            })
            .await?;

        let candidates = roles
            .items
            .into_iter()
            .map(|role| PrincipalRef::role(account.id.clone(), role.name))
            .collect();
        Ok((candidates, roles.warnings))
    }

    async fn permit(&self) -> std::result::Result<OwnedSemaphorePermit, ScanError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ScanError::Cancelled),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| ScanError::Internal {
                    message: "scan permits closed".to_string(),
                })
            }
        }
    }

    /// Run a step unless the scan is cancelled first
    async fn guarded<T, F>(&self, step: F) -> std::result::Result<T, ScanError>
    where
        F: Future<Output = std::result::Result<T, ScanError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ScanError::Cancelled),
            result = step => result,
        }
    }

    fn call_timeout(&self) -> Duration {
        self.scanner.config.call_timeout()
    }
}

/// Listing failures inside an account fail the account
fn listing_error(account: &Account, err: ApiError) -> ScanError {
    match err.kind {
        ApiErrorKind::AccessDenied => {
            ScanError::access_denied(format!("IAM listings in {}", account.id), err.message)
        }
        _ => ScanError::AccountUnreachable {
            account_id: account.id.to_string(),
            reason: err.to_string(),
        },
    }
}
