//! Policy retrieval for roles and standalone policies
//!
//! Works against an [`IamApi`] already bound to the target account's scoped
//! credentials. Every list call is followed to completion.

use crate::core::api::{collect_pages, with_timeout, IamApi, ManagedPolicy, PolicyScope};
use crate::core::config::ScanConfig;
use crate::core::iam::{PolicyDocument, PolicySource, SourcedDocument};
use crate::core::model::{PrincipalKind, PrincipalRef, Warning, WarningKind};
use crate::core::validation::is_aws_managed;
use crate::error::{ApiError, ApiErrorKind, ScanError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Documents gathered for one principal
#[derive(Debug, Clone, Default)]
pub struct FetchedPolicies {
    /// Inline and attached managed documents, in fetch order
    pub documents: Vec<SourcedDocument>,
    /// Permission boundary documents, kept apart from the grants
    pub boundary: Vec<SourcedDocument>,
    pub warnings: Vec<Warning>,
}

/// Managed policy documents already read in one account, keyed by ARN
#[derive(Debug, Default)]
pub struct ManagedDocumentCache {
    documents: Mutex<HashMap<String, SourcedDocument>>,
}

impl ManagedDocumentCache {
    pub fn new() -> Self {
        ManagedDocumentCache::default()
    }

    fn get(&self, arn: &str) -> Option<SourcedDocument> {
        self.documents.lock().get(arn).cloned()
    }

    fn insert(&self, document: &SourcedDocument) {
        if let Some(arn) = &document.arn {
            self.documents.lock().insert(arn.clone(), document.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }
}

/// Retrieves every policy document attached to a principal
#[derive(Debug, Clone)]
pub struct PolicyFetcher {
    call_timeout: Duration,
    max_pages: usize,
}

impl PolicyFetcher {
    pub fn new(config: &ScanConfig) -> Self {
        PolicyFetcher {
            call_timeout: config.call_timeout(),
            max_pages: config.max_pages,
        }
    }

    /// Fetch the documents of a role or standalone policy
    ///
    /// # Errors
    ///
    /// - `PrincipalNotFound` when the role or policy does not exist
    /// - `AccessDenied` when the scoped credentials cannot read it
    pub async fn fetch(&self, iam: &dyn IamApi, principal: &PrincipalRef) -> Result<FetchedPolicies, ScanError> {
        self.fetch_with_cache(iam, principal, None).await
    }

    /// Like [`PolicyFetcher::fetch`], reusing managed documents across calls
    #[tracing::instrument(skip(self, iam, principal, cache), fields(principal = %principal))]
    pub async fn fetch_with_cache(
        &self,
        iam: &dyn IamApi,
        principal: &PrincipalRef,
        cache: Option<&ManagedDocumentCache>,
    ) -> Result<FetchedPolicies, ScanError> {
        let mut fetched = FetchedPolicies::default();
        match principal.kind {
            PrincipalKind::Role => self.fetch_role(iam, principal, cache, &mut fetched).await?,
            PrincipalKind::Policy => self.fetch_policy(iam, principal, cache, &mut fetched).await?,
        }

        debug!(
            documents = fetched.documents.len(),
            boundary = fetched.boundary.len(),
            warnings = fetched.warnings.len(),
            "Fetched policies"
        );
        Ok(fetched)
    }

    async fn fetch_role(
        &self,
        iam: &dyn IamApi,
        principal: &PrincipalRef,
        cache: Option<&ManagedDocumentCache>,
        fetched: &mut FetchedPolicies,
    ) -> Result<(), ScanError> {
        let role_name = principal.api_name();
        let role = with_timeout("GetRole", self.call_timeout, iam.get_role(role_name))
            .await
            .map_err(|e| principal_error(principal, e))?;

        let inline = collect_pages("ListRolePolicies", self.call_timeout, self.max_pages, move |marker| {
            iam.list_role_policies(role_name, marker)
        })
        .await
        .map_err(|e| principal_error(principal, e))?;
        fetched.warnings.extend(inline.warnings);

        for policy_name in &inline.items {
            let raw = with_timeout(
                "GetRolePolicy",
                self.call_timeout,
                iam.get_role_policy(role_name, policy_name),
            )
            .await;
            match raw {
                Ok(raw) => {
                    if let Some(document) = parse_document(policy_name, &raw, &mut fetched.warnings) {
                        fetched
                            .documents
                            .push(SourcedDocument::new(policy_name.as_str(), PolicySource::Inline, document));
                    }
                }
                Err(e) => self.skip_or_fail(principal, policy_name, e, &mut fetched.warnings)?,
            }
        }

        let attached = collect_pages(
            "ListAttachedRolePolicies",
            self.call_timeout,
            self.max_pages,
            move |marker| iam.list_attached_role_policies(role_name, marker),
        )
        .await
        .map_err(|e| principal_error(principal, e))?;
        fetched.warnings.extend(attached.warnings);

        for policy in &attached.items {
            match self.managed_document(iam, &policy.arn, None, cache, &mut fetched.warnings).await {
                Ok(Some(document)) => fetched.documents.push(document),
                Ok(None) => {}
                Err(e) => self.skip_or_fail(principal, &policy.arn, e, &mut fetched.warnings)?,
            }
        }

        if let Some(boundary_arn) = &role.permissions_boundary_arn {
            match self.managed_document(iam, boundary_arn, None, cache, &mut fetched.warnings).await {
                Ok(Some(mut document)) => {
                    document.source = PolicySource::Boundary;
                    fetched.boundary.push(document);
                }
                // An unparsed boundary leaves the effective permissions unknown
                Ok(None) => return Err(ScanError::unreadable_boundary(principal.to_string(), boundary_arn)),
                Err(e) => return Err(principal_error(principal, e)),
            }
        }

        Ok(())
    }

    async fn fetch_policy(
        &self,
        iam: &dyn IamApi,
        principal: &PrincipalRef,
        cache: Option<&ManagedDocumentCache>,
        fetched: &mut FetchedPolicies,
    ) -> Result<(), ScanError> {
        let (arn, known) = match &principal.arn {
            Some(arn) => (arn.clone(), None),
            None => {
                let policy = self.find_policy(iam, principal, &mut fetched.warnings).await?;
                (policy.arn.clone(), Some(policy))
            }
        };

        match self.managed_document(iam, &arn, known, cache, &mut fetched.warnings).await {
            Ok(Some(document)) => fetched.documents.push(document),
            Ok(None) => {}
            Err(e) => return Err(principal_error(principal, e)),
        }
        Ok(())
    }

    /// Locate a policy by name, customer-managed first, then AWS-managed
    async fn find_policy(
        &self,
        iam: &dyn IamApi,
        principal: &PrincipalRef,
        warnings: &mut Vec<Warning>,
    ) -> Result<ManagedPolicy, ScanError> {
        let name = principal.api_name();
        for scope in [PolicyScope::Local, PolicyScope::Aws] {
            let listed = collect_pages("ListPolicies", self.call_timeout, self.max_pages, move |marker| {
                iam.list_policies(scope, marker)
            })
            .await
            .map_err(|e| principal_error(principal, e))?;
            warnings.extend(listed.warnings);

            if let Some(policy) = listed.items.into_iter().find(|p| p.name == name) {
                return Ok(policy);
            }
        }

        Err(not_found(principal))
    }

    /// Active version of a managed policy
    ///
    /// Returns `Ok(None)` when the document could not be parsed; a warning is
    /// recorded in that case.
    async fn managed_document(
        &self,
        iam: &dyn IamApi,
        arn: &str,
        known: Option<ManagedPolicy>,
        cache: Option<&ManagedDocumentCache>,
        warnings: &mut Vec<Warning>,
    ) -> Result<Option<SourcedDocument>, ApiError> {
        if let Some(document) = cache.and_then(|c| c.get(arn)) {
            debug!(arn, "Managed policy cache hit");
            return Ok(Some(document));
        }

        let policy = match known {
            Some(policy) => policy,
            None => with_timeout("GetPolicy", self.call_timeout, iam.get_policy(arn)).await?,
        };
        let raw = with_timeout(
            "GetPolicyVersion",
            self.call_timeout,
            iam.get_policy_version(arn, &policy.default_version_id),
        )
        .await?;

        let Some(document) = parse_document(&policy.name, &raw, warnings) else {
            return Ok(None);
        };
        let source = if is_aws_managed(arn) {
            PolicySource::AwsManaged
        } else {
            PolicySource::CustomerManaged
        };
        let document = SourcedDocument::new(policy.name, source, document).with_arn(arn);
        if let Some(cache) = cache {
            cache.insert(&document);
        }
        Ok(Some(document))
    }

    /// A vanished sub-document is skipped with a warning; anything else fails the principal
    fn skip_or_fail(
        &self,
        principal: &PrincipalRef,
        target: &str,
        err: ApiError,
        warnings: &mut Vec<Warning>,
    ) -> Result<(), ScanError> {
        if err.kind == ApiErrorKind::NotFound {
            warnings.push(Warning::new(
                WarningKind::UnreadableDocument,
                format!("{} disappeared while reading {}", target, principal),
            ));
            return Ok(());
        }
        Err(principal_error(principal, err))
    }
}

fn parse_document(name: &str, raw: &str, warnings: &mut Vec<Warning>) -> Option<PolicyDocument> {
    match PolicyDocument::parse(raw) {
        Ok(document) => Some(document),
        Err(e) => {
            warnings.push(Warning::new(
                WarningKind::UnreadableDocument,
                format!("{}: {}", name, e),
            ));
            None
        }
    }
}

fn not_found(principal: &PrincipalRef) -> ScanError {
    ScanError::PrincipalNotFound {
        account_id: principal.account_id.to_string(),
        principal_kind: principal.kind.to_string(),
        name: principal.name.clone(),
    }
}

/// Map an API failure while reading a principal onto the scan taxonomy
fn principal_error(principal: &PrincipalRef, err: ApiError) -> ScanError {
    match err.kind {
        ApiErrorKind::NotFound => not_found(principal),
        ApiErrorKind::AccessDenied => ScanError::access_denied(principal.to_string(), err.message),
        _ => ScanError::AccountUnreachable {
            account_id: principal.account_id.to_string(),
            reason: err.to_string(),
        },
    }
}
