//! AWS SDK implementations of the cloud API seams
//!
//! Enabled by the `aws-sdk` feature. Base credentials come from the default
//! provider chain; per-account IAM clients use the assumed-role credentials.

use crate::core::api::{
    AccountSummary, AttachedPolicy, IamApi, IamConnector, ManagedPolicy, OrganizationsApi, Page,
    PolicyScope, RoleInfo, StsApi,
};
use crate::core::credentials::ScopedCredentials;
use crate::core::validation::AccountId;
use crate::error::{ApiError, ApiErrorKind};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_sts::error::{ProvideErrorMetadata, SdkError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::SystemTime;

/// Load the caller's base configuration from the default provider chain
pub async fn load_sdk_config() -> SdkConfig {
    aws_config::load_defaults(BehaviorVersion::latest()).await
}

/// Classify an SDK failure
fn classify<E, R>(err: SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) => ApiError::new(ApiErrorKind::Timeout, "Timeout", err.to_string()),
        SdkError::DispatchFailure(_) => {
            ApiError::new(ApiErrorKind::Transport, "DispatchFailure", err.to_string())
        }
        _ => match err.code() {
            Some(code) => ApiError::from_code(code, err.message().unwrap_or_default()),
            None => ApiError::new(ApiErrorKind::Other, "Unknown", err.to_string()),
        },
    }
}

fn missing(field: &str) -> ApiError {
    ApiError::new(
        ApiErrorKind::Other,
        "MalformedResponse",
        format!("response is missing {}", field),
    )
}

pub struct AwsSts {
    client: aws_sdk_sts::Client,
}

impl AwsSts {
    pub fn new(config: &SdkConfig) -> Self {
        AwsSts {
            client: aws_sdk_sts::Client::new(config),
        }
    }
}

#[async_trait]
impl StsApi for AwsSts {
    async fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration_secs: i32,
    ) -> Result<ScopedCredentials, ApiError> {
        let output = self
            .client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .duration_seconds(duration_secs)
            .send()
            .await
            .map_err(classify)?;

        let credentials = output.credentials().ok_or_else(|| missing("Credentials"))?;
        let expiration = credentials.expiration();
        let expiration = DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos())
            .ok_or_else(|| missing("a valid Expiration"))?;

        Ok(ScopedCredentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            credentials.session_token(),
            expiration,
        ))
    }
}

/// Builds IAM clients from assumed-role credentials
pub struct AwsIamConnector {
    base: SdkConfig,
}

impl AwsIamConnector {
    pub fn new(base: SdkConfig) -> Self {
        AwsIamConnector { base }
    }
}

impl IamConnector for AwsIamConnector {
    fn connect(&self, credentials: &ScopedCredentials) -> Arc<dyn IamApi> {
        let provider = aws_credential_types::Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            Some(credentials.session_token.clone()),
            Some(SystemTime::from(credentials.expiration)),
            "catrole-assumed-role",
        );
        let config = aws_sdk_iam::config::Builder::from(&self.base)
            .credentials_provider(provider)
            .build();
        Arc::new(AwsIam {
            client: aws_sdk_iam::Client::from_conf(config),
        })
    }
}

pub struct AwsIam {
    client: aws_sdk_iam::Client,
}

fn role_info(role: &aws_sdk_iam::types::Role) -> RoleInfo {
    RoleInfo {
        name: role.role_name().to_string(),
        arn: role.arn().to_string(),
        permissions_boundary_arn: role
            .permissions_boundary()
            .and_then(|b| b.permissions_boundary_arn())
            .map(str::to_string),
    }
}

fn managed_policy(policy: &aws_sdk_iam::types::Policy) -> Option<ManagedPolicy> {
    Some(ManagedPolicy {
        name: policy.policy_name()?.to_string(),
        arn: policy.arn()?.to_string(),
        default_version_id: policy.default_version_id()?.to_string(),
    })
}

#[async_trait]
impl IamApi for AwsIam {
    async fn get_role(&self, role_name: &str) -> Result<RoleInfo, ApiError> {
        let output = self
            .client
            .get_role()
            .role_name(role_name)
            .send()
            .await
            .map_err(classify)?;
        output.role().map(role_info).ok_or_else(|| missing("Role"))
    }

    async fn list_roles(&self, marker: Option<String>) -> Result<Page<RoleInfo>, ApiError> {
        let output = self
            .client
            .list_roles()
            .set_marker(marker)
            .send()
            .await
            .map_err(classify)?;
        Ok(Page {
            items: output.roles().iter().map(role_info).collect(),
            is_truncated: output.is_truncated(),
            marker: output.marker().map(str::to_string),
        })
    }

    async fn list_attached_role_policies(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> Result<Page<AttachedPolicy>, ApiError> {
        let output = self
            .client
            .list_attached_role_policies()
            .role_name(role_name)
            .set_marker(marker)
            .send()
            .await
            .map_err(classify)?;
        Ok(Page {
            items: output
                .attached_policies()
                .iter()
                .filter_map(|p| {
                    Some(AttachedPolicy {
                        name: p.policy_name()?.to_string(),
                        arn: p.policy_arn()?.to_string(),
                    })
                })
                .collect(),
            is_truncated: output.is_truncated(),
            marker: output.marker().map(str::to_string),
        })
    }

    async fn list_role_policies(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> Result<Page<String>, ApiError> {
        let output = self
            .client
            .list_role_policies()
            .role_name(role_name)
            .set_marker(marker)
            .send()
            .await
            .map_err(classify)?;
        Ok(Page {
            items: output.policy_names().to_vec(),
            is_truncated: output.is_truncated(),
            marker: output.marker().map(str::to_string),
        })
    }

    async fn get_role_policy(&self, role_name: &str, policy_name: &str) -> Result<String, ApiError> {
        let output = self
            .client
            .get_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(classify)?;
        Ok(output.policy_document().to_string())
    }

    async fn get_policy(&self, policy_arn: &str) -> Result<ManagedPolicy, ApiError> {
        let output = self
            .client
            .get_policy()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(classify)?;
        output
            .policy()
            .and_then(managed_policy)
            .ok_or_else(|| missing("Policy"))
    }

    async fn get_policy_version(&self, policy_arn: &str, version_id: &str) -> Result<String, ApiError> {
        let output = self
            .client
            .get_policy_version()
            .policy_arn(policy_arn)
            .version_id(version_id)
            .send()
            .await
            .map_err(classify)?;
        output
            .policy_version()
            .and_then(|v| v.document())
            .map(str::to_string)
            .ok_or_else(|| missing("PolicyVersion.Document"))
    }

    async fn list_policies(
        &self,
        scope: PolicyScope,
        marker: Option<String>,
    ) -> Result<Page<ManagedPolicy>, ApiError> {
        let scope = match scope {
            PolicyScope::Local => aws_sdk_iam::types::PolicyScopeType::Local,
            PolicyScope::Aws => aws_sdk_iam::types::PolicyScopeType::Aws,
        };
        let output = self
            .client
            .list_policies()
            .scope(scope)
            .set_marker(marker)
            .send()
            .await
            .map_err(classify)?;
        Ok(Page {
            items: output.policies().iter().filter_map(managed_policy).collect(),
            is_truncated: output.is_truncated(),
            marker: output.marker().map(str::to_string),
        })
    }
}

pub struct AwsOrganizations {
    client: aws_sdk_organizations::Client,
}

impl AwsOrganizations {
    pub fn new(config: &SdkConfig) -> Self {
        AwsOrganizations {
            client: aws_sdk_organizations::Client::new(config),
        }
    }
}

fn account_summary(account: &aws_sdk_organizations::types::Account) -> Option<AccountSummary> {
    Some(AccountSummary {
        id: account.id()?.to_string(),
        name: account.name().unwrap_or_default().to_string(),
        status: account
            .status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
    })
}

#[async_trait]
impl OrganizationsApi for AwsOrganizations {
    async fn list_accounts(&self, next_token: Option<String>) -> Result<Page<AccountSummary>, ApiError> {
        let output = self
            .client
            .list_accounts()
            .set_next_token(next_token)
            .send()
            .await
            .map_err(classify)?;
        let marker = output.next_token().map(str::to_string);
        Ok(Page {
            items: output.accounts().iter().filter_map(account_summary).collect(),
            is_truncated: marker.is_some(),
            marker,
        })
    }

    async fn describe_account(&self, account_id: &AccountId) -> Result<AccountSummary, ApiError> {
        let output = self
            .client
            .describe_account()
            .account_id(account_id.as_str())
            .send()
            .await
            .map_err(classify)?;
        output
            .account()
            .and_then(account_summary)
            .ok_or_else(|| missing("Account"))
    }
}
