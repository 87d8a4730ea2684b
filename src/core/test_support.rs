//! In-memory cloud API fakes for unit tests

use crate::core::api::{
    AccountSummary, AttachedPolicy, IamApi, IamConnector, ManagedPolicy, OrganizationsApi, Page,
    PolicyScope, RoleInfo, StsApi,
};
use crate::core::credentials::ScopedCredentials;
use crate::core::validation::{is_aws_managed, AccountId};
use crate::error::ApiError;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct FakeSts {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    failures: Mutex<VecDeque<ApiError>>,
    lifetime: chrono::Duration,
    delay: Duration,
    last_role_arn: Mutex<Option<String>>,
    denied_accounts: HashSet<String>,
}

impl FakeSts {
    pub fn new() -> Self {
        FakeSts {
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            lifetime: chrono::Duration::hours(1),
            delay: Duration::ZERO,
            last_role_arn: Mutex::new(None),
            denied_accounts: HashSet::new(),
        }
    }

    pub fn with_lifetime(mut self, lifetime: chrono::Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Errors returned by the next calls, in order
    pub fn failing_with(self, failures: Vec<ApiError>) -> Self {
        *self.failures.lock() = failures.into();
        self
    }

    /// Assuming into `account` always fails with AccessDenied
    pub fn denying(mut self, account: &str) -> Self {
        self.denied_accounts.insert(account.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn last_role_arn(&self) -> Option<String> {
        self.last_role_arn.lock().clone()
    }
}

#[async_trait]
impl StsApi for FakeSts {
    async fn assume_role(
        &self,
        role_arn: &str,
        _session_name: &str,
        _duration_secs: i32,
    ) -> Result<ScopedCredentials, ApiError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        *self.last_role_arn.lock() = Some(role_arn.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        let account = role_arn.split(':').nth(4).unwrap_or_default();
        if self.denied_accounts.contains(account) {
            return Err(ApiError::from_code(
                "AccessDenied",
                format!("not authorized to perform sts:AssumeRole on {}", role_arn),
            ));
        }
        Ok(ScopedCredentials::new(
            format!("ASIA{:08}", n),
            "secret",
            role_arn,
            Utc::now() + self.lifetime,
        ))
    }
}

#[derive(Debug, Clone, Default)]
struct FakeRole {
    boundary: Option<String>,
    attached: Vec<String>,
    inline: Vec<(String, String)>,
}

/// One account's IAM contents
#[derive(Default)]
pub struct FakeIam {
    account: String,
    roles: BTreeMap<String, FakeRole>,
    policies: BTreeMap<String, (String, String)>,
    denied: HashSet<String>,
    page_size: usize,
    drop_markers: bool,
    policy_listing_denied: bool,
    version_reads: AtomicUsize,
}

impl FakeIam {
    pub fn new(account: &str) -> Self {
        FakeIam {
            account: account.to_string(),
            page_size: 2,
            ..FakeIam::default()
        }
    }

    pub fn role(mut self, name: &str) -> Self {
        self.roles.entry(name.to_string()).or_default();
        self
    }

    pub fn inline(mut self, role: &str, policy: &str, document: serde_json::Value) -> Self {
        self.roles
            .entry(role.to_string())
            .or_default()
            .inline
            .push((policy.to_string(), urlencoding::encode(&document.to_string()).into_owned()));
        self
    }

    /// Register a managed policy; AWS-managed when `account` is `aws`
    pub fn managed(mut self, arn: &str, document: serde_json::Value) -> Self {
        let name = arn.rsplit('/').next().unwrap_or(arn).to_string();
        self.policies
            .insert(arn.to_string(), (name, urlencoding::encode(&document.to_string()).into_owned()));
        self
    }

    pub fn attach(mut self, role: &str, arn: &str) -> Self {
        self.roles
            .entry(role.to_string())
            .or_default()
            .attached
            .push(arn.to_string());
        self
    }

    pub fn boundary(mut self, role: &str, arn: &str) -> Self {
        self.roles.entry(role.to_string()).or_default().boundary = Some(arn.to_string());
        self
    }

    /// Calls touching this role or policy name fail with AccessDenied
    pub fn deny(mut self, name: &str) -> Self {
        self.denied.insert(name.to_string());
        self
    }

    /// Truncated pages come back without a marker
    pub fn drop_markers(mut self) -> Self {
        self.drop_markers = true;
        self
    }

    /// ListPolicies fails with AccessDenied while roles stay listable
    pub fn deny_policy_listing(mut self) -> Self {
        self.policy_listing_denied = true;
        self
    }

    pub fn version_reads(&self) -> usize {
        self.version_reads.load(Ordering::SeqCst)
    }

    fn check(&self, name: &str) -> Result<(), ApiError> {
        if self.denied.contains(name) {
            return Err(ApiError::from_code(
                "AccessDenied",
                format!("not authorized to read {}", name),
            ));
        }
        Ok(())
    }

    fn page<T: Clone>(&self, items: &[T], marker: Option<String>) -> Page<T> {
        let start: usize = marker.and_then(|m| m.parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(items.len());
        let slice = items[start.min(end)..end].to_vec();
        if end < items.len() {
            Page {
                items: slice,
                is_truncated: true,
                marker: (!self.drop_markers).then(|| end.to_string()),
            }
        } else {
            Page::complete(slice)
        }
    }

    fn role_info(&self, name: &str, role: &FakeRole) -> RoleInfo {
        RoleInfo {
            name: name.to_string(),
            arn: format!("arn:aws:iam::{}:role/{}", self.account, name),
            permissions_boundary_arn: role.boundary.clone(),
        }
    }

    fn managed_policy(&self, arn: &str, name: &str) -> ManagedPolicy {
        ManagedPolicy {
            name: name.to_string(),
            arn: arn.to_string(),
            default_version_id: "v1".to_string(),
        }
    }

    fn not_found(what: &str) -> ApiError {
        ApiError::from_code("NoSuchEntity", format!("{} cannot be found", what))
    }
}

#[async_trait]
impl IamApi for FakeIam {
    async fn get_role(&self, role_name: &str) -> Result<RoleInfo, ApiError> {
        self.check(role_name)?;
        let role = self.roles.get(role_name).ok_or_else(|| Self::not_found(role_name))?;
        Ok(self.role_info(role_name, role))
    }

    async fn list_roles(&self, marker: Option<String>) -> Result<Page<RoleInfo>, ApiError> {
        let roles: Vec<RoleInfo> = self
            .roles
            .iter()
            .map(|(name, role)| self.role_info(name, role))
            .collect();
        Ok(self.page(&roles, marker))
    }

    async fn list_attached_role_policies(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> Result<Page<AttachedPolicy>, ApiError> {
        self.check(role_name)?;
        let role = self.roles.get(role_name).ok_or_else(|| Self::not_found(role_name))?;
        let attached: Vec<AttachedPolicy> = role
            .attached
            .iter()
            .map(|arn| AttachedPolicy {
                name: arn.rsplit('/').next().unwrap_or(arn).to_string(),
                arn: arn.clone(),
            })
            .collect();
        Ok(self.page(&attached, marker))
    }

    async fn list_role_policies(
        &self,
        role_name: &str,
        marker: Option<String>,
    ) -> Result<Page<String>, ApiError> {
        self.check(role_name)?;
        let role = self.roles.get(role_name).ok_or_else(|| Self::not_found(role_name))?;
        let names: Vec<String> = role.inline.iter().map(|(name, _)| name.clone()).collect();
        Ok(self.page(&names, marker))
    }

    async fn get_role_policy(&self, role_name: &str, policy_name: &str) -> Result<String, ApiError> {
        self.check(role_name)?;
        let role = self.roles.get(role_name).ok_or_else(|| Self::not_found(role_name))?;
        role.inline
            .iter()
            .find(|(name, _)| name == policy_name)
            .map(|(_, document)| document.clone())
            .ok_or_else(|| Self::not_found(policy_name))
    }

    async fn get_policy(&self, policy_arn: &str) -> Result<ManagedPolicy, ApiError> {
        let (name, _) = self.policies.get(policy_arn).ok_or_else(|| Self::not_found(policy_arn))?;
        self.check(name)?;
        Ok(self.managed_policy(policy_arn, name))
    }

    async fn get_policy_version(&self, policy_arn: &str, _version_id: &str) -> Result<String, ApiError> {
        self.version_reads.fetch_add(1, Ordering::SeqCst);
        let (name, document) = self.policies.get(policy_arn).ok_or_else(|| Self::not_found(policy_arn))?;
        self.check(name)?;
        Ok(document.clone())
    }

    async fn list_policies(
        &self,
        scope: PolicyScope,
        marker: Option<String>,
    ) -> Result<Page<ManagedPolicy>, ApiError> {
        if self.policy_listing_denied {
            return Err(ApiError::from_code("AccessDenied", "not authorized to perform iam:ListPolicies"));
        }
        let policies: Vec<ManagedPolicy> = self
            .policies
            .iter()
            .filter(|(arn, _)| is_aws_managed(arn) == (scope == PolicyScope::Aws))
            .map(|(arn, (name, _))| self.managed_policy(arn, name))
            .collect();
        Ok(self.page(&policies, marker))
    }
}

/// Hands out IAM fakes by the account encoded in the credentials' session token
#[derive(Default)]
pub struct FakeConnector {
    accounts: HashMap<String, Arc<FakeIam>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        FakeConnector::default()
    }

    pub fn account(mut self, iam: FakeIam) -> Self {
        self.accounts.insert(iam.account.clone(), Arc::new(iam));
        self
    }

    pub fn iam(&self, account: &str) -> Option<Arc<FakeIam>> {
        self.accounts.get(account).cloned()
    }
}

impl IamConnector for FakeConnector {
    fn connect(&self, credentials: &ScopedCredentials) -> Arc<dyn IamApi> {
        // FakeSts puts the assumed role ARN in the session token
        let account = credentials
            .session_token
            .split(':')
            .nth(4)
            .unwrap_or_default()
            .to_string();
        match self.accounts.get(&account) {
            Some(iam) => iam.clone(),
            None => Arc::new(FakeIam::new(&account)),
        }
    }
}

/// Organization listing two accounts per page
#[derive(Default)]
pub struct FakeOrganizations {
    accounts: Vec<AccountSummary>,
    fail: bool,
}

impl FakeOrganizations {
    pub fn new() -> Self {
        FakeOrganizations::default()
    }

    pub fn account(mut self, id: &str, name: &str, status: &str) -> Self {
        self.accounts.push(AccountSummary {
            id: id.to_string(),
            name: name.to_string(),
            status: status.to_string(),
        });
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl OrganizationsApi for FakeOrganizations {
    async fn list_accounts(&self, next_token: Option<String>) -> Result<Page<AccountSummary>, ApiError> {
        if self.fail {
            return Err(ApiError::from_code(
                "AWSOrganizationsNotInUseException",
                "account is not a member of an organization",
            ));
        }
        let start: usize = next_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + 2).min(self.accounts.len());
        let items = self.accounts[start.min(end)..end].to_vec();
        Ok(if end < self.accounts.len() {
            Page::truncated(items, end.to_string())
        } else {
            Page::complete(items)
        })
    }

    async fn describe_account(&self, account_id: &AccountId) -> Result<AccountSummary, ApiError> {
        if self.fail {
            return Err(ApiError::from_code("AccessDeniedException", "no organizations access"));
        }
        self.accounts
            .iter()
            .find(|a| a.id == account_id.as_str())
            .cloned()
            .ok_or_else(|| ApiError::from_code("AccountNotFoundException", account_id.as_str()))
    }
}
