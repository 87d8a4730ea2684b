//! Validation for account identifiers and IAM resource names
//!
//! Account ids and ARNs are the two addressing inputs the scanner accepts.
//! Both are validated up front so malformed input fails before any network
//! activity.

use crate::core::model::PrincipalKind;
use crate::error::{CatroleError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

static ACCOUNT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{12}$").expect("static regex"));

static IAM_ARN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^arn:aws[a-z-]*:iam::(\d{12}|aws):(role|policy)/(.+)$").expect("static regex")
});

/// A validated 12-digit account identifier
///
/// # Examples
///
/// ```
/// use catrole::AccountId;
///
/// let id = AccountId::new("123456789012").unwrap();
/// assert_eq!(id.as_str(), "123456789012");
///
/// assert!(AccountId::new("12345").is_err());
/// assert!(AccountId::new("12345678901a").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(String);

impl AccountId {
    /// Create a new validated account id
    ///
    /// # Errors
    ///
    /// Returns `InvalidAccountId` unless the input is exactly 12 ASCII digits.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if !ACCOUNT_ID.is_match(trimmed) {
            return Err(CatroleError::InvalidAccountId(id));
        }
        Ok(AccountId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AccountId {
    type Err = CatroleError;

    fn from_str(s: &str) -> Result<Self> {
        AccountId::new(s)
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AccountId::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Components of an IAM role or policy ARN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArn {
    /// Owning account; `None` for AWS-managed policies (`arn:aws:iam::aws:policy/...`)
    pub account: Option<AccountId>,
    pub kind: PrincipalKind,
    /// Everything after `role/` or `policy/`, including any path
    pub resource: String,
    pub arn: String,
}

impl ParsedArn {
    /// Final path segment, which is the name IAM APIs expect
    pub fn name(&self) -> &str {
        self.resource.rsplit('/').next().unwrap_or(&self.resource)
    }
}

/// Parse an IAM role or policy ARN
///
/// # Examples
///
/// ```
/// use catrole::{parse_arn, PrincipalKind};
///
/// let arn = parse_arn("arn:aws:iam::123456789012:role/service/MyAppRole").unwrap();
/// assert_eq!(arn.kind, PrincipalKind::Role);
/// assert_eq!(arn.name(), "MyAppRole");
///
/// let managed = parse_arn("arn:aws:iam::aws:policy/ReadOnlyAccess").unwrap();
/// assert!(managed.account.is_none());
///
/// assert!(parse_arn("arn:aws:s3:::my-bucket").is_err());
/// ```
pub fn parse_arn(arn: &str) -> Result<ParsedArn> {
    let arn = arn.trim();
    let caps = IAM_ARN
        .captures(arn)
        .ok_or_else(|| CatroleError::InvalidArn(arn.to_string()))?;

    let account = match &caps[1] {
        "aws" => None,
        id => Some(AccountId::new(id)?),
    };
    let kind = match &caps[2] {
        "role" => PrincipalKind::Role,
        _ => PrincipalKind::Policy,
    };
    // Roles always live in a customer account
    if kind == PrincipalKind::Role && account.is_none() {
        return Err(CatroleError::InvalidArn(arn.to_string()));
    }

    Ok(ParsedArn {
        account,
        kind,
        resource: caps[3].to_string(),
        arn: arn.to_string(),
    })
}

/// Build the ARN of a role in the given account
pub fn role_arn(account: &AccountId, role_name: &str) -> String {
    format!("arn:aws:iam::{}:role/{}", account, role_name)
}

/// Whether a managed policy ARN belongs to AWS rather than the customer
pub fn is_aws_managed(policy_arn: &str) -> bool {
    policy_arn.starts_with("arn:aws:iam::aws:")
}
