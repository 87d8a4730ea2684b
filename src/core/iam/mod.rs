//! IAM policy model and resolution
//!
//! Provides:
//! - JSON policy documents as IAM returns them (URL-encoded or plain)
//! - Wildcard pattern matching for actions, resources and names
//! - Flattening of documents into (action, resource, effect, source) entries
//! - Permission boundary intersection

mod pattern;
mod policy;
mod resolver;

pub use pattern::{normalize_wildcards, CaseMode, PatternMatcher};
pub use policy::{Effect, PolicyDocument, Statement};
pub use resolver::{PermissionEntry, PermissionResolver, PolicySource, Resolution, SourcedDocument};
