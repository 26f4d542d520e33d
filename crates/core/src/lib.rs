//! kcr core types: desired-state manifests, identifiers and errors.

#![forbid(unsafe_code)]

pub mod manifest;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use manifest::{equivalent, remove_nested_field, strip_ignored_fields, Manifest, IGNORED_FIELDS};

/// Group/Version/Kind of an API object. An empty group is the core API group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl TypeDescriptor {
    /// Split an `apiVersion` (`group/version` or bare `version`) and pair it with `kind`.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };
        Self { group, version, kind: kind.to_string() }
    }

    /// `group/version`, or `version` alone for the core group.
    pub fn group_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_version(), self.kind)
    }
}

/// Identifier handed to the orchestrating tool at create time.
///
/// Renders as `namespace/name` for namespaced objects and `name` otherwise.
/// It is stored by the caller and never recomputed from the document, and it
/// serializes as that same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ExternalId {
    pub namespace: Option<String>,
    pub name: String,
}

impl ExternalId {
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self { namespace: Some(namespace.to_string()), name: name.to_string() }
    }

    pub fn cluster(name: &str) -> Self {
        Self { namespace: None, name: name.to_string() }
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ExternalId {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::cluster(name)),
            [ns, name] if !ns.is_empty() && !name.is_empty() => Ok(Self::namespaced(ns, name)),
            _ => Err(AdapterError::Parse(format!("invalid id: {} (expect name or namespace/name)", s))),
        }
    }
}

impl From<ExternalId> for String {
    fn from(id: ExternalId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ExternalId {
    type Error = AdapterError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Failures surfaced by the adapter, one variant per phase.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("could not parse document: {0}")]
    Parse(String),
    #[error("could not determine resource type: {0}")]
    Discovery(String),
    #[error("could not create resource: {0}")]
    Create(String),
    #[error("could not get resource: {0}")]
    Read(String),
    #[error("could not update resource: {0}")]
    Update(String),
    /// Update rejected because the stamped resourceVersion is stale.
    #[error("could not update resource (stale resourceVersion, re-read and retry): {0}")]
    Conflict(String),
    #[error("could not delete resource: {0}")]
    Delete(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("{op} timed out after {secs}s")]
    Timeout { op: &'static str, secs: u64 },
}

impl AdapterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdapterError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AdapterError::Conflict(_))
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

pub mod prelude {
    pub use super::{equivalent, AdapterError, AdapterResult, ExternalId, Manifest, TypeDescriptor};
}
