//! Scan outcomes handed to the reporting layer

use crate::core::model::{Account, PrincipalRef, ResolvedPrincipal, Warning};
use crate::error::ScanError;
use serde::Serialize;

/// Whether an account could be scanned at all
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccountStatus {
    Succeeded,
    Failed { error: ScanError },
}

/// Result for one principal inside an account
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PrincipalOutcome {
    Resolved(ResolvedPrincipal),
    Failed {
        principal: PrincipalRef,
        error: ScanError,
    },
}

impl PrincipalOutcome {
    pub fn principal(&self) -> &PrincipalRef {
        match self {
            PrincipalOutcome::Resolved(resolved) => &resolved.principal,
            PrincipalOutcome::Failed { principal, .. } => principal,
        }
    }

    pub fn resolved(&self) -> Option<&ResolvedPrincipal> {
        match self {
            PrincipalOutcome::Resolved(resolved) => Some(resolved),
            PrincipalOutcome::Failed { .. } => None,
        }
    }
}

/// Everything recorded for one account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountReport {
    pub account: Account,
    #[serde(flatten)]
    pub status: AccountStatus,
    pub principals: Vec<PrincipalOutcome>,
    pub warnings: Vec<Warning>,
}

impl AccountReport {
    pub fn succeeded(account: Account, principals: Vec<PrincipalOutcome>, warnings: Vec<Warning>) -> Self {
        AccountReport {
            account,
            status: AccountStatus::Succeeded,
            principals,
            warnings,
        }
    }

    pub fn failed(account: Account, error: ScanError) -> Self {
        AccountReport {
            account,
            status: AccountStatus::Failed { error },
            principals: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, AccountStatus::Succeeded)
    }

    pub fn error(&self) -> Option<&ScanError> {
        match &self.status {
            AccountStatus::Succeeded => None,
            AccountStatus::Failed { error } => Some(error),
        }
    }

    /// Principals that resolved successfully
    pub fn resolved(&self) -> impl Iterator<Item = &ResolvedPrincipal> {
        self.principals.iter().filter_map(PrincipalOutcome::resolved)
    }
}

/// Aggregated outcome of a scan: one report per attempted account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    pub accounts: Vec<AccountReport>,
    /// Invocation-level warnings (e.g. a partial organization listing)
    pub warnings: Vec<Warning>,
    pub cancelled: bool,
}

impl ScanResult {
    pub fn succeeded_accounts(&self) -> usize {
        self.accounts.iter().filter(|a| a.is_success()).count()
    }

    pub fn failed_accounts(&self) -> usize {
        self.accounts.len() - self.succeeded_accounts()
    }

    /// Principals resolved (or matched, in search modes) across all accounts
    pub fn matched_principals(&self) -> usize {
        self.accounts.iter().map(|a| a.resolved().count()).sum()
    }

    pub fn failed_principals(&self) -> usize {
        self.accounts
            .iter()
            .flat_map(|a| a.principals.iter())
            .filter(|p| matches!(p, PrincipalOutcome::Failed { .. }))
            .count()
    }

    pub fn report_for(&self, account_id: &str) -> Option<&AccountReport> {
        self.accounts.iter().find(|a| a.account.id.as_str() == account_id)
    }
}
