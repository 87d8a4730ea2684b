//! In-memory AWS account fixtures shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use catrole::{
    AccountId, AccountSummary, ApiError, AttachedPolicy, Catrole, CatroleBuilder, IamApi, IamConnector,
    ManagedPolicy, OrganizationsApi, Page, PolicyScope, RoleInfo, ScanConfig, ScopedCredentials, StsApi,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const PROD: &str = "111111111111";
pub const STAGING: &str = "222222222222";
pub const SANDBOX: &str = "333333333333";
pub const LEGACY: &str = "444444444444";

/// STS that hands out one-hour credentials carrying the role ARN as session token
#[derive(Default)]
pub struct MemorySts {
    denied: HashSet<String>,
    throttles: Mutex<HashMap<String, usize>>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemorySts {
    pub fn new() -> Self {
        MemorySts::default()
    }

    /// The target role in `account` does not trust the caller
    pub fn deny(mut self, account: &str) -> Self {
        self.denied.insert(account.to_string());
        self
    }

    /// The next `times` calls for `account` are throttled
    pub fn throttle(self, account: &str, times: usize) -> Self {
        self.throttles.lock().insert(account.to_string(), times);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StsApi for MemorySts {
    async fn assume_role(
        &self,
        role_arn: &str,
        _session_name: &str,
        duration_secs: i32,
    ) -> Result<ScopedCredentials, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let account = account_of(role_arn);
        if self.denied.contains(&account) {
            return Err(ApiError::from_code("AccessDenied", format!("not trusted: {}", role_arn)));
        }
        if let Some(remaining) = self.throttles.lock().get_mut(&account) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ApiError::from_code("Throttling", "Rate exceeded"));
            }
        }

        Ok(ScopedCredentials::new(
            format!("ASIA{}", account),
            "secret",
            role_arn,
            Utc::now() + chrono::Duration::seconds(duration_secs as i64),
        ))
    }
}

fn account_of(arn: &str) -> String {
    arn.split(':').nth(4).unwrap_or_default().to_string()
}

#[derive(Default, Clone)]
struct RoleFixture {
    boundary: Option<String>,
    attached: Vec<String>,
    inline: Vec<(String, String)>,
}

/// IAM contents of one account, served in single pages with plain JSON documents
#[derive(Default)]
pub struct MemoryIam {
    account: String,
    roles: BTreeMap<String, RoleFixture>,
    policies: BTreeMap<String, String>,
    listing_denied: bool,
}

impl MemoryIam {
    pub fn new(account: &str) -> Self {
        MemoryIam {
            account: account.to_string(),
            ..MemoryIam::default()
        }
    }

    pub fn inline(mut self, role: &str, policy: &str, document: serde_json::Value) -> Self {
        self.roles
            .entry(role.to_string())
            .or_default()
            .inline
            .push((policy.to_string(), document.to_string()));
        self
    }

    pub fn managed(mut self, arn: &str, document: serde_json::Value) -> Self {
        self.policies.insert(arn.to_string(), document.to_string());
        self
    }

    pub fn attach(mut self, role: &str, arn: &str) -> Self {
        self.roles.entry(role.to_string()).or_default().attached.push(arn.to_string());
        self
    }

    pub fn boundary(mut self, role: &str, arn: &str) -> Self {
        self.roles.entry(role.to_string()).or_default().boundary = Some(arn.to_string());
        self
    }

    /// ListRoles and ListPolicies fail with AccessDenied
    pub fn deny_listing(mut self) -> Self {
        self.listing_denied = true;
        self
    }

    fn no_such(what: &str) -> ApiError {
        ApiError::from_code("NoSuchEntity", format!("{} not found", what))
    }

    fn listing(&self) -> Result<(), ApiError> {
        if self.listing_denied {
            return Err(ApiError::from_code("AccessDenied", "iam:ListRoles denied"));
        }
        Ok(())
    }

    fn fixture(&self, role: &str) -> Result<&RoleFixture, ApiError> {
        self.roles.get(role).ok_or_else(|| Self::no_such(role))
    }

    fn policy_name(arn: &str) -> String {
        arn.rsplit('/').next().unwrap_or(arn).to_string()
    }

    fn managed_policy(arn: &str) -> ManagedPolicy {
        ManagedPolicy {
            name: Self::policy_name(arn),
            arn: arn.to_string(),
            default_version_id: "v3".to_string(),
        }
    }
}

#[async_trait]
impl IamApi for MemoryIam {
    async fn get_role(&self, role_name: &str) -> Result<RoleInfo, ApiError> {
        let role = self.fixture(role_name)?;
        Ok(RoleInfo {
            name: role_name.to_string(),
            arn: format!("arn:aws:iam::{}:role/{}", self.account, role_name),
            permissions_boundary_arn: role.boundary.clone(),
        })
    }

    async fn list_roles(&self, _marker: Option<String>) -> Result<Page<RoleInfo>, ApiError> {
        self.listing()?;
        let mut roles = Vec::new();
        for name in self.roles.keys() {
            roles.push(self.get_role(name).await?);
        }
        Ok(Page::complete(roles))
    }

    async fn list_attached_role_policies(
        &self,
        role_name: &str,
        _marker: Option<String>,
    ) -> Result<Page<AttachedPolicy>, ApiError> {
        let attached = self
            .fixture(role_name)?
            .attached
            .iter()
            .map(|arn| AttachedPolicy {
                name: Self::policy_name(arn),
                arn: arn.clone(),
            })
            .collect();
        Ok(Page::complete(attached))
    }

    async fn list_role_policies(&self, role_name: &str, _marker: Option<String>) -> Result<Page<String>, ApiError> {
        let names = self.fixture(role_name)?.inline.iter().map(|(name, _)| name.clone()).collect();
        Ok(Page::complete(names))
    }

    async fn get_role_policy(&self, role_name: &str, policy_name: &str) -> Result<String, ApiError> {
        self.fixture(role_name)?
            .inline
            .iter()
            .find(|(name, _)| name == policy_name)
            .map(|(_, document)| document.clone())
            .ok_or_else(|| Self::no_such(policy_name))
    }

    async fn get_policy(&self, policy_arn: &str) -> Result<ManagedPolicy, ApiError> {
        if !self.policies.contains_key(policy_arn) {
            return Err(Self::no_such(policy_arn));
        }
        Ok(Self::managed_policy(policy_arn))
    }

    async fn get_policy_version(&self, policy_arn: &str, _version_id: &str) -> Result<String, ApiError> {
        self.policies.get(policy_arn).cloned().ok_or_else(|| Self::no_such(policy_arn))
    }

    async fn list_policies(&self, scope: PolicyScope, _marker: Option<String>) -> Result<Page<ManagedPolicy>, ApiError> {
        self.listing()?;
        let policies = self
            .policies
            .keys()
            .filter(|arn| arn.contains(":aws:policy/") == (scope == PolicyScope::Aws))
            .map(|arn| Self::managed_policy(arn))
            .collect();
        Ok(Page::complete(policies))
    }
}

/// Routes assumed credentials to the account named in their session token
#[derive(Default)]
pub struct MemoryConnector {
    accounts: HashMap<String, Arc<MemoryIam>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        MemoryConnector::default()
    }

    pub fn account(mut self, iam: MemoryIam) -> Self {
        self.accounts.insert(iam.account.clone(), Arc::new(iam));
        self
    }
}

impl IamConnector for MemoryConnector {
    fn connect(&self, credentials: &ScopedCredentials) -> Arc<dyn IamApi> {
        let account = account_of(&credentials.session_token);
        match self.accounts.get(&account) {
            Some(iam) => iam.clone(),
            None => Arc::new(MemoryIam::new(&account)),
        }
    }
}

#[derive(Default)]
pub struct MemoryOrganizations {
    accounts: Vec<AccountSummary>,
    unavailable: bool,
}

impl MemoryOrganizations {
    pub fn new() -> Self {
        MemoryOrganizations::default()
    }

    pub fn account(mut self, id: &str, name: &str) -> Self {
        self.accounts.push(AccountSummary {
            id: id.to_string(),
            name: name.to_string(),
            status: "ACTIVE".to_string(),
        });
        self
    }

    pub fn suspended(mut self, id: &str, name: &str) -> Self {
        self.accounts.push(AccountSummary {
            id: id.to_string(),
            name: name.to_string(),
            status: "SUSPENDED".to_string(),
        });
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

#[async_trait]
impl OrganizationsApi for MemoryOrganizations {
    async fn list_accounts(&self, _next_token: Option<String>) -> Result<Page<AccountSummary>, ApiError> {
        if self.unavailable {
            return Err(ApiError::from_code("AWSOrganizationsNotInUseException", "not in an organization"));
        }
        Ok(Page::complete(self.accounts.clone()))
    }

    async fn describe_account(&self, account_id: &AccountId) -> Result<AccountSummary, ApiError> {
        self.accounts
            .iter()
            .find(|a| a.id == account_id.as_str())
            .cloned()
            .ok_or_else(|| ApiError::from_code("AccountNotFoundException", account_id.as_str()))
    }
}

/// Retries that finish quickly under paused time
pub fn fast_config() -> ScanConfig {
    let mut config = ScanConfig::default();
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 100;
    config.retry.max_attempts = 3;
    config
}

pub fn build_catrole(
    sts: Arc<MemorySts>,
    connector: MemoryConnector,
    orgs: MemoryOrganizations,
    config: ScanConfig,
) -> Catrole {
    CatroleBuilder::new()
        .config(config)
        .assume_role("OrganizationAccountAccessRole")
        .sts(sts)
        .iam_connector(Arc::new(connector))
        .organizations(Arc::new(orgs))
        .build()
        .unwrap()
}

pub fn account_id(id: &str) -> AccountId {
    AccountId::new(id).unwrap()
}
