//! Gitlink Core Library
//!
//! Installation flow for connecting an issue-tracking platform to a GitLab
//! group: form validation, OAuth configuration, token exchange, GitLab API
//! lookups and assembly of the final integration record.

pub mod connector;
pub mod crypto;
pub mod db;
pub mod error;
pub mod gitlab;
pub mod installation;
pub mod integration;
pub mod oauth;
pub mod pipeline;
pub mod provider;
pub mod translate;

pub use error::{GitlinkError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
