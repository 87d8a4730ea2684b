//! Scan data model
//!
//! Accounts and principal references are built from input parameters and
//! never change afterwards. Resolved principals are created fresh by each
//! scan and handed to the reporting layer.

use crate::core::iam::{Effect, PermissionEntry, PatternMatcher, PolicySource};
use crate::core::validation::{parse_arn, AccountId};
use crate::error::{CatroleError, Result};
use serde::Serialize;

/// Target account of a scan
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Account {
    pub id: AccountId,
    /// Display name (organization account name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Account {
    pub fn new(id: AccountId) -> Self {
        Account { id, alias: None }
    }

    pub fn with_alias(id: AccountId, alias: impl Into<String>) -> Self {
        Account {
            id,
            alias: Some(alias.into()),
        }
    }

    /// Alias if known, otherwise the account id
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(self.id.as_str())
    }
}

/// Kind of principal being inspected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    Role,
    Policy,
}

impl std::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrincipalKind::Role => write!(f, "role"),
            PrincipalKind::Policy => write!(f, "policy"),
        }
    }
}

/// Reference to a role or standalone policy in an account
///
/// A principal is addressed either by account + name or by ARN. When both
/// are supplied the ARN wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PrincipalRef {
    pub kind: PrincipalKind,
    pub account_id: AccountId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
}

impl PrincipalRef {
    pub fn role(account_id: AccountId, name: impl Into<String>) -> Self {
        PrincipalRef {
            kind: PrincipalKind::Role,
            account_id,
            name: name.into(),
            arn: None,
        }
    }

    pub fn policy(account_id: AccountId, name: impl Into<String>) -> Self {
        PrincipalRef {
            kind: PrincipalKind::Policy,
            account_id,
            name: name.into(),
            arn: None,
        }
    }

    /// Address a principal by ARN alone
    ///
    /// AWS-managed policy ARNs carry no account, so they need
    /// [`PrincipalRef::addressed`] with an explicit account.
    pub fn from_arn(arn: &str) -> Result<Self> {
        let parsed = parse_arn(arn)?;
        let account_id = parsed
            .account
            .clone()
            .ok_or_else(|| CatroleError::InvalidArn(arn.to_string()))?;
        Ok(PrincipalRef {
            kind: parsed.kind,
            account_id,
            name: parsed.name().to_string(),
            arn: Some(parsed.arn),
        })
    }

    /// Build a principal from both addressing modes
    ///
    /// The ARN, when present, takes precedence over `kind`, `account_id` and
    /// `name`. An AWS-managed policy ARN keeps the supplied account as the
    /// account to scan it from.
    pub fn addressed(
        kind: PrincipalKind,
        account_id: AccountId,
        name: impl Into<String>,
        arn: Option<&str>,
    ) -> Result<Self> {
        let Some(arn) = arn else {
            return Ok(PrincipalRef {
                kind,
                account_id,
                name: name.into(),
                arn: None,
            });
        };

        let parsed = parse_arn(arn)?;
        Ok(PrincipalRef {
            kind: parsed.kind,
            account_id: parsed.account.clone().unwrap_or(account_id),
            name: parsed.name().to_string(),
            arn: Some(parsed.arn),
        })
    }

    /// Name as IAM APIs expect it (final path segment)
    pub fn api_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

impl std::fmt::Display for PrincipalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.arn {
            Some(arn) => write!(f, "{}", arn),
            None => write!(f, "{} {}/{}", self.kind, self.account_id, self.name),
        }
    }
}

/// Category of a non-fatal finding attached to a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// A grant fell outside the permission boundary and was dropped
    RestrictedByBoundary,
    /// A listing was truncated without a continuation token
    PartialEnumeration,
    /// A statement carries a condition block that was not evaluated
    ConditionNotEvaluated,
    /// A policy document could not be parsed and was skipped
    UnreadableDocument,
    /// A listing call failed; its candidates are missing from the result
    ListingFailed,
}

/// Non-fatal finding recorded alongside a result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Warning {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// A policy consulted while resolving a principal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceSummary {
    pub name: String,
    pub source: PolicySource,
}

/// A principal together with the permission entries its policies carry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPrincipal {
    pub principal: PrincipalRef,
    pub entries: Vec<PermissionEntry>,
    /// Policies consulted, in fetch order
    pub sources: Vec<SourceSummary>,
    pub warnings: Vec<Warning>,
}

impl ResolvedPrincipal {
    /// Collapse the entries into a single verdict for one concrete action
    ///
    /// Explicit deny overrides allow. Returns `None` when no entry mentions
    /// the action at all (implicit deny). Resource scoping and conditions are
    /// not considered.
    pub fn verdict_for(&self, action: &str) -> Option<Effect> {
        let mut verdict = None;
        for entry in &self.entries {
            if !entry.applies_to_action(action) {
                continue;
            }
            match entry.effect {
                Effect::Deny => return Some(Effect::Deny),
                Effect::Allow => verdict = Some(Effect::Allow),
            }
        }
        verdict
    }

    /// Keep only entries whose action overlaps the search pattern
    ///
    /// Overlap is checked both ways: the search pattern may match the entry's
    /// action (`s3:*` finds `s3:GetObject`), or the entry's action pattern may
    /// match the search text (`s3:*` grants `s3:CreateBucket`).
    pub fn retain_matching_actions(&mut self, search: &PatternMatcher) {
        self.entries.retain(|entry| entry.action_overlaps(search));
    }
}
