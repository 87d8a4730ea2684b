//! Flat rows for the reporting layer
//!
//! One row per permission entry. Accounts and principals that failed, or
//! that carry no entries, still produce a row so the operator can tell
//! "nothing found" from "could not be scanned".

use crate::core::model::{Account, ResolvedPrincipal};
use crate::core::scanner::{AccountReport, PrincipalOutcome, ScanResult};
use serde::Serialize;

/// Status value for rows that carry data
pub const STATUS_OK: &str = "ok";

/// One line of tabular output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub account_id: String,
    pub account_alias: String,
    pub principal_name: String,
    pub principal_kind: String,
    pub policy_name: String,
    pub policy_source: String,
    pub sid: String,
    pub effect: String,
    pub action: String,
    pub resource: String,
    /// Condition block as compact JSON, empty when absent
    pub condition: String,
    /// `ok`, or the error kind of the failed account or principal
    pub status: String,
}

impl ReportRow {
    fn for_account(account: &Account) -> Self {
        ReportRow {
            account_id: account.id.to_string(),
            account_alias: account.display_name().to_string(),
            status: STATUS_OK.to_string(),
            ..ReportRow::default()
        }
    }
}

impl ScanResult {
    /// Flatten the result into report rows, in account order
    pub fn rows(&self) -> Vec<ReportRow> {
        self.accounts.iter().flat_map(account_rows).collect()
    }
}

fn account_rows(report: &AccountReport) -> Vec<ReportRow> {
    let base = ReportRow::for_account(&report.account);

    if let Some(error) = report.error() {
        return vec![ReportRow {
            status: error.kind().to_string(),
            ..base
        }];
    }
    if report.principals.is_empty() {
        return vec![base];
    }

    let mut rows = Vec::new();
    for outcome in &report.principals {
        match outcome {
            PrincipalOutcome::Resolved(resolved) => rows.extend(principal_rows(&base, resolved)),
            PrincipalOutcome::Failed { principal, error } => rows.push(ReportRow {
                principal_name: principal.name.clone(),
                principal_kind: principal.kind.to_string(),
                status: error.kind().to_string(),
                ..base.clone()
            }),
        }
    }
    rows
}

fn principal_rows(base: &ReportRow, resolved: &ResolvedPrincipal) -> Vec<ReportRow> {
    let base = ReportRow {
        principal_name: resolved.principal.name.clone(),
        principal_kind: resolved.principal.kind.to_string(),
        ..base.clone()
    };

    if resolved.entries.is_empty() {
        return vec![base];
    }

    resolved
        .entries
        .iter()
        .map(|entry| ReportRow {
            policy_name: entry.source.clone(),
            policy_source: entry.source_kind.to_string(),
            sid: entry.sid.clone().unwrap_or_default(),
            effect: entry.effect.to_string(),
            action: entry.action_display(),
            resource: entry.resource_display(),
            condition: entry
                .condition
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_default(),
            ..base.clone()
        })
        .collect()
}
