use serde::Serialize;
use thiserror::Error;

/// Invocation-level failures. Any of these aborts the whole scan.
#[derive(Error, Debug)]
pub enum CatroleError {
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid account id: {0} (must be exactly 12 digits)")]
    InvalidAccountId(String),

    #[error(
        "Invalid IAM ARN: {0} (expected arn:aws:iam::<12-digit-account>:role/<name> \
         or arn:aws:iam::<12-digit-account>:policy/<name>)"
    )]
    InvalidArn(String),

    #[error("Invalid policy document: {0}")]
    InvalidPolicyDocument(String),

    #[error("No accounts to scan")]
    NoAccounts,

    #[error("Failed to enumerate organization accounts: {0}")]
    Enumeration(String),

    #[error("ResolveOne scans take exactly one account, got {0}")]
    AccountCountMismatch(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

pub type Result<T> = std::result::Result<T, CatroleError>;

/// Failure of a single scan unit (one account, or one principal inside an
/// account). These are recorded in the scan result, never raised.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanError {
    #[error("Cannot assume {role_arn}: {message}")]
    AssumeRoleDenied { role_arn: String, message: String },

    #[error("Account {account_id} unreachable: {reason}")]
    AccountUnreachable { account_id: String, reason: String },

    #[error("{principal_kind} '{name}' not found in account {account_id}")]
    PrincipalNotFound {
        account_id: String,
        principal_kind: String,
        name: String,
    },

    #[error("Access denied reading {target}: {message} ({hint})")]
    AccessDenied {
        target: String,
        message: String,
        hint: String,
    },

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ScanError {
    /// Short, stable identifier of the error kind for reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::AssumeRoleDenied { .. } => "AssumeRoleDenied",
            ScanError::AccountUnreachable { .. } => "AccountUnreachable",
            ScanError::PrincipalNotFound { .. } => "PrincipalNotFound",
            ScanError::AccessDenied { .. } => "AccessDenied",
            ScanError::Cancelled => "Cancelled",
            ScanError::Internal { .. } => "Internal",
        }
    }

    pub(crate) fn access_denied(target: impl Into<String>, message: impl Into<String>) -> Self {
        ScanError::AccessDenied {
            target: target.into(),
            message: message.into(),
            hint: "grant iam:Get*/iam:List* on the target principal to the assumed role"
                .to_string(),
        }
    }

    /// The role names a permission boundary whose document could not be parsed
    pub(crate) fn unreadable_boundary(principal: impl Into<String>, boundary_arn: &str) -> Self {
        ScanError::AccessDenied {
            target: principal.into(),
            message: format!("permission boundary {} is unreadable", boundary_arn),
            hint: "fix or detach the boundary policy; grants cannot be bounded without it".to_string(),
        }
    }
}

/// Classification of an error returned by a cloud API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApiErrorKind {
    Throttling,
    AccessDenied,
    NotFound,
    Timeout,
    Transport,
    Other,
}

/// Error surfaced by the cloud API seam, already classified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Classify an error from its service error code.
    pub fn from_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let kind = match code.as_str() {
            "Throttling" | "ThrottlingException" | "TooManyRequestsException"
            | "RequestLimitExceeded" | "TooManyRequests" | "SlowDown" => ApiErrorKind::Throttling,
            "AccessDenied" | "AccessDeniedException" | "UnauthorizedOperation"
            | "AWSOrganizationsNotInUseException" => ApiErrorKind::AccessDenied,
            "NoSuchEntity" | "NoSuchEntityException" | "AccountNotFoundException" => {
                ApiErrorKind::NotFound
            }
            "RequestTimeout" | "RequestTimeoutException" => ApiErrorKind::Timeout,
            _ => ApiErrorKind::Other,
        };
        ApiError::new(kind, code, message)
    }

    pub fn timeout(operation: &str) -> Self {
        ApiError::new(
            ApiErrorKind::Timeout,
            "Timeout",
            format!("{} timed out", operation),
        )
    }

    /// Throttling and transport-class failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ApiErrorKind::Throttling | ApiErrorKind::Timeout | ApiErrorKind::Transport
        )
    }
}
