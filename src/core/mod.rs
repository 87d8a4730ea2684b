//! Core resolution and search engine
//!
//! Leaves first:
//! - [`credentials`] - Scoped credentials per account (assume role, cache, retry)
//! - [`fetcher`] - Policy documents attached to a role or policy
//! - [`iam`] - Policy model, pattern matching and permission resolution
//! - [`scanner`] - Concurrent fan-out across accounts
//! - [`report`] - Flat rows for the reporting layer

pub mod api;
#[cfg(feature = "aws-sdk")]
pub mod aws;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fetcher;
pub mod iam;
pub mod model;
pub mod report;
pub mod scanner;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;
