//! Target account enumeration

use crate::core::api::{collect_pages, with_timeout, OrganizationsApi};
use crate::core::config::ScanConfig;
use crate::core::model::{Account, Warning};
use crate::core::validation::AccountId;
use crate::error::{CatroleError, Result};
use futures::future::join_all;
use tracing::{debug, info, warn};

/// Which accounts a scan covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountSelection {
    Single(AccountId),
    List(Vec<AccountId>),
    /// Every ACTIVE account in the caller's organization
    Organization,
}

/// Accounts to scan plus any listing warnings
#[derive(Debug, Clone, Default)]
pub struct EnumeratedAccounts {
    pub accounts: Vec<Account>,
    pub warnings: Vec<Warning>,
}

/// Resolve a selection into concrete accounts
///
/// Explicit accounts get their organization name as alias when
/// DescribeAccount allows it and fall back to the bare id otherwise.
///
/// # Errors
///
/// - `Enumeration` when the organization listing fails
/// - `NoAccounts` when nothing is left to scan
pub async fn enumerate_accounts(
    orgs: &dyn OrganizationsApi,
    selection: &AccountSelection,
    config: &ScanConfig,
) -> Result<EnumeratedAccounts> {
    let enumerated = match selection {
        AccountSelection::Single(id) => EnumeratedAccounts {
            accounts: vec![describe(orgs, id, config).await],
            warnings: Vec::new(),
        },
        AccountSelection::List(ids) => EnumeratedAccounts {
            accounts: join_all(ids.iter().map(|id| describe(orgs, id, config))).await,
            warnings: Vec::new(),
        },
        AccountSelection::Organization => list_organization(orgs, config).await?,
    };

    if enumerated.accounts.is_empty() {
        return Err(CatroleError::NoAccounts);
    }

    info!(accounts = enumerated.accounts.len(), "Enumerated target accounts");
    Ok(enumerated)
}

async fn describe(orgs: &dyn OrganizationsApi, id: &AccountId, config: &ScanConfig) -> Account {
    match with_timeout("DescribeAccount", config.call_timeout(), orgs.describe_account(id)).await {
        Ok(summary) if !summary.name.is_empty() => Account::with_alias(id.clone(), summary.name),
        Ok(_) => Account::new(id.clone()),
        Err(e) => {
            debug!(account = %id, error = %e, "No account alias, using id");
            Account::new(id.clone())
        }
    }
}

async fn list_organization(orgs: &dyn OrganizationsApi, config: &ScanConfig) -> Result<EnumeratedAccounts> {
    let listed = collect_pages("ListAccounts", config.call_timeout(), config.max_pages, move |token| {
        orgs.list_accounts(token)
    })
    .await
    .map_err(|e| CatroleError::Enumeration(e.to_string()))?;

    let total = listed.items.len();
    let mut accounts = Vec::with_capacity(total);
    for summary in listed.items.into_iter().filter(|a| a.is_active()) {
        match AccountId::new(summary.id.as_str()) {
            Ok(id) => accounts.push(Account::with_alias(id, summary.name)),
            Err(_) => warn!(account = %summary.id, "Skipping account with malformed id"),
        }
    }

    debug!(total, active = accounts.len(), "Listed organization accounts");
    Ok(EnumeratedAccounts {
        accounts,
        warnings: listed.warnings,
    })
}
