//! Permission resolution
//!
//! Flattens policy documents into individual permission entries:
//! - Every statement expands into the cross product of its actions and resources
//! - Each entry keeps the name of the policy it came from
//! - Allow and Deny entries are both kept; deny precedence is applied by
//!   callers that need a single verdict
//! - A permission boundary drops grants it does not cover
//! - Exact duplicates (same action, resource, effect and source) collapse

use super::pattern::{normalize_wildcards, PatternMatcher};
use super::policy::{Effect, PolicyDocument};
use crate::core::model::{Warning, WarningKind};
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

/// Where a policy document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PolicySource {
    Inline,
    AwsManaged,
    CustomerManaged,
    Boundary,
}

impl std::fmt::Display for PolicySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicySource::Inline => write!(f, "Inline"),
            PolicySource::AwsManaged => write!(f, "AWS Managed"),
            PolicySource::CustomerManaged => write!(f, "Customer Managed"),
            PolicySource::Boundary => write!(f, "Permissions Boundary"),
        }
    }
}

/// A policy document tagged with its name and origin
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedDocument {
    pub name: String,
    pub source: PolicySource,
    /// ARN for managed policies
    pub arn: Option<String>,
    pub document: PolicyDocument,
}

impl SourcedDocument {
    pub fn new(name: impl Into<String>, source: PolicySource, document: PolicyDocument) -> Self {
        SourcedDocument {
            name: name.into(),
            source,
            arn: None,
            document,
        }
    }

    pub fn with_arn(mut self, arn: impl Into<String>) -> Self {
        self.arn = Some(arn.into());
        self
    }
}

/// One resolved (action, resource, effect, source) tuple
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermissionEntry {
    pub action: String,
    /// Entry came from `NotAction`
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub not_action: bool,
    pub resource: String,
    /// Entry came from `NotResource`
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub not_resource: bool,
    pub effect: Effect,
    /// Name of the originating policy
    pub source: String,
    pub source_kind: PolicySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Condition block, preserved but not evaluated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
}

type DedupKey = (String, bool, String, bool, Effect, String);

impl PermissionEntry {
    fn dedup_key(&self) -> DedupKey {
        (
            self.action.clone(),
            self.not_action,
            self.resource.clone(),
            self.not_resource,
            self.effect,
            self.source.clone(),
        )
    }

    /// Action as shown to operators (`NotAction: ...` when negated)
    pub fn action_display(&self) -> String {
        if self.not_action {
            format!("NotAction: {}", self.action)
        } else {
            self.action.clone()
        }
    }

    /// Resource as shown to operators (`NotResource: ...` when negated)
    pub fn resource_display(&self) -> String {
        if self.not_resource {
            format!("NotResource: {}", self.resource)
        } else {
            self.resource.clone()
        }
    }

    /// Whether this entry speaks about a concrete action name
    pub fn applies_to_action(&self, action: &str) -> bool {
        let matched = PatternMatcher::compile_action(&self.action)
            .map(|pattern| pattern.matches(action))
            .unwrap_or(false);
        matched != self.not_action
    }

    /// Whether the entry's action pattern and a search pattern overlap
    pub fn action_overlaps(&self, search: &PatternMatcher) -> bool {
        if search.matches(&self.action) {
            return true;
        }
        PatternMatcher::compile_with(&self.action, search.case_mode())
            .map(|pattern| pattern.matches(search.as_str()))
            .unwrap_or(false)
    }
}

/// Outcome of resolving a set of documents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub entries: Vec<PermissionEntry>,
    pub warnings: Vec<Warning>,
}

/// Merges raw policy documents into a canonical set of permission entries
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionResolver;

impl PermissionResolver {
    pub fn new() -> Self {
        PermissionResolver
    }

    /// Resolve `documents`, restricted by `boundary` when it is non-empty
    ///
    /// # Examples
    ///
    /// ```
    /// use catrole::{Effect, PermissionResolver, PolicyDocument, PolicySource, SourcedDocument, Statement};
    ///
    /// let inline = SourcedDocument::new(
    ///     "ReadLogs",
    ///     PolicySource::Inline,
    ///     PolicyDocument::new().with_statement(Statement::new(
    ///         Effect::Allow,
    ///         vec!["logs:GetLogEvents".into(), "logs:FilterLogEvents".into()],
    ///         vec!["*".into()],
    ///     )),
    /// );
    ///
    /// let resolution = PermissionResolver::new().resolve(&[inline], &[]);
    /// assert_eq!(resolution.entries.len(), 2);
    /// assert!(resolution.entries.iter().all(|e| e.source == "ReadLogs"));
    /// ```
    pub fn resolve(&self, documents: &[SourcedDocument], boundary: &[SourcedDocument]) -> Resolution {
        let mut warnings = Vec::new();
        let mut entries = Vec::new();
        for document in documents {
            entries.extend(Self::flatten(document, &mut warnings));
        }

        if !boundary.is_empty() {
            let mut boundary_warnings = Vec::new();
            let limits: Vec<PermissionEntry> = boundary
                .iter()
                .flat_map(|doc| Self::flatten(doc, &mut boundary_warnings))
                .filter(|entry| entry.effect == Effect::Allow)
                .collect();

            entries.retain(|entry| {
                if entry.effect == Effect::Deny || limits.iter().any(|limit| bounds(limit, entry)) {
                    return true;
                }
                warnings.push(Warning::new(
                    WarningKind::RestrictedByBoundary,
                    format!(
                        "restricted by boundary: {} on {} from {}",
                        entry.action_display(),
                        entry.resource_display(),
                        entry.source
                    ),
                ));
                false
            });
        }

        let mut seen: HashSet<DedupKey> = HashSet::new();
        entries.retain(|entry| seen.insert(entry.dedup_key()));

        let mut seen_warnings = HashSet::new();
        warnings.retain(|warning| seen_warnings.insert(warning.clone()));

        debug!(
            documents = documents.len(),
            boundary = boundary.len(),
            entries = entries.len(),
            "Resolved permission entries"
        );

        Resolution { entries, warnings }
    }

    /// Expand one document into entries, one per (action, resource) pair
    pub fn flatten(document: &SourcedDocument, warnings: &mut Vec<Warning>) -> Vec<PermissionEntry> {
        let mut entries = Vec::new();

        for (index, statement) in document.document.statement.iter().enumerate() {
            let (actions, not_action) = statement.actions();
            let (resources, not_resource) = statement.resources();

            if statement.has_condition() {
                warnings.push(Warning::new(
                    WarningKind::ConditionNotEvaluated,
                    format!(
                        "statement {} in {} has a condition that was not evaluated",
                        statement.sid.clone().unwrap_or_else(|| format!("#{}", index)),
                        document.name
                    ),
                ));
            }

            // Empty action or resource sets contribute nothing
            for action in actions {
                for resource in resources {
                    entries.push(PermissionEntry {
                        action: normalize_wildcards(action),
                        not_action,
                        resource: normalize_wildcards(resource),
                        not_resource,
                        effect: statement.effect,
                        source: document.name.clone(),
                        source_kind: document.source,
                        sid: statement.sid.clone(),
                        condition: statement.condition.clone(),
                    });
                }
            }
        }

        entries
    }
}

/// Whether a boundary grant covers a grant from the main documents
fn bounds(limit: &PermissionEntry, entry: &PermissionEntry) -> bool {
    scope_covers(&limit.action, limit.not_action, &entry.action, entry.not_action)
        && scope_covers(
            &limit.resource,
            limit.not_resource,
            &entry.resource,
            entry.not_resource,
        )
}

/// Containment between two (possibly negated) pattern scopes
fn scope_covers(limit: &str, limit_negated: bool, scope: &str, scope_negated: bool) -> bool {
    let (Ok(limit), Ok(scope)) = (
        PatternMatcher::compile_action(limit),
        PatternMatcher::compile_action(scope),
    ) else {
        return false;
    };

    match (limit_negated, scope_negated) {
        (false, false) => limit.covers(&scope),
        // "everything except X" only fits under a bare wildcard
        (false, true) => limit.as_str() == "*",
        // The excluded set must not overlap the scope
        (true, false) => !limit.matches(scope.as_str()) && !scope.matches(limit.as_str()),
        // Complement of the scope fits in the complement of the limit
        (true, true) => scope.covers(&limit),
    }
}
