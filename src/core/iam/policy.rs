//! IAM Policy document structure
//!
//! Mirrors the JSON grammar IAM uses for identity policies. Single values and
//! lists are both accepted wherever IAM accepts both (`Statement`, `Action`,
//! `Resource` and their `Not*` forms). The `Condition` block is kept as raw
//! JSON: it is carried through to the resolved entries but never evaluated.

use crate::error::{CatroleError, Result};
use serde::{Deserialize, Deserializer, Serialize};

/// Effect of a policy statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Effect {
    /// Allow the action
    Allow,
    /// Deny the action (takes precedence over Allow)
    Deny,
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::Allow => write!(f, "Allow"),
            Effect::Deny => write!(f, "Deny"),
        }
    }
}

/// A single policy statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Statement ID (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Effect of this statement
    pub effect: Effect,

    /// Action patterns this statement applies to
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub action: Vec<String>,

    /// Action patterns this statement applies to everything except
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub not_action: Vec<String>,

    /// Resource patterns (supports wildcards)
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub resource: Vec<String>,

    /// Resource patterns this statement applies to everything except
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub not_resource: Vec<String>,

    /// Optional condition block, preserved verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
}

impl Statement {
    /// Create a new statement
    pub fn new(effect: Effect, action: Vec<String>, resource: Vec<String>) -> Self {
        Statement {
            sid: None,
            effect,
            action,
            not_action: Vec::new(),
            resource,
            not_resource: Vec::new(),
            condition: None,
        }
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn with_condition(mut self, condition: serde_json::Value) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Action patterns and whether they are negated (`NotAction`)
    pub fn actions(&self) -> (&[String], bool) {
        if self.action.is_empty() && !self.not_action.is_empty() {
            (&self.not_action, true)
        } else {
            (&self.action, false)
        }
    }

    /// Resource patterns and whether they are negated (`NotResource`)
    pub fn resources(&self) -> (&[String], bool) {
        if self.resource.is_empty() && !self.not_resource.is_empty() {
            (&self.not_resource, true)
        } else {
            (&self.resource, false)
        }
    }

    /// Whether the statement carries a non-empty condition block
    pub fn has_condition(&self) -> bool {
        match &self.condition {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }
}

/// Complete IAM policy document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Policy language version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Policy id (optional, rarely set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// List of policy statements
    #[serde(default, deserialize_with = "one_or_many")]
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    /// Create a new empty document
    pub fn new() -> Self {
        PolicyDocument {
            version: Some("2012-10-17".to_string()),
            id: None,
            statement: Vec::new(),
        }
    }

    /// Add a statement to this document
    pub fn add_statement(&mut self, statement: Statement) {
        self.statement.push(statement);
    }

    pub fn with_statement(mut self, statement: Statement) -> Self {
        self.statement.push(statement);
        self
    }

    /// Parse a document as returned by IAM
    ///
    /// IAM hands documents back percent-encoded; plain JSON is accepted too.
    ///
    /// # Examples
    ///
    /// ```
    /// use catrole::PolicyDocument;
    ///
    /// let doc = PolicyDocument::parse(
    ///     "%7B%22Statement%22%3A%7B%22Effect%22%3A%22Allow%22%2C\
    ///      %22Action%22%3A%22s3%3AGetObject%22%2C%22Resource%22%3A%22%2A%22%7D%7D",
    /// )
    /// .unwrap();
    /// assert_eq!(doc.statement.len(), 1);
    /// assert_eq!(doc.statement[0].action, vec!["s3:GetObject"]);
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            return Self::from_json(trimmed);
        }
        let decoded = urlencoding::decode(trimmed)
            .map_err(|e| CatroleError::InvalidPolicyDocument(e.to_string()))?;
        Self::from_json(&decoded)
    }

    /// Parse document from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CatroleError::InvalidPolicyDocument(e.to_string()))
    }

    /// Serialize document to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// Accept either a single value or a list of values
fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match OneOrMany::<T>::deserialize(deserializer)? {
        OneOrMany::Many(values) => values,
        OneOrMany::One(value) => vec![value],
    })
}
