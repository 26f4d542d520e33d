//! Desired-state documents: parsing, server-field stripping and diff suppression.

use serde_json::Value as Json;
use tracing::debug;

use crate::{AdapterError, AdapterResult, TypeDescriptor};

/// Server-managed paths that never take part in identity or equality.
pub const IGNORED_FIELDS: &[&[&str]] = &[
    &["metadata", "creationTimestamp"],
    &["metadata", "resourceVersion"],
    &["metadata", "uid"],
    &["metadata", "selfLink"],
    &["metadata", "generation"],
    &["status"],
];

/// Remove the value at `path`; missing intermediates are not an error.
pub fn remove_nested_field(v: &mut Json, path: &[&str]) {
    let Some((last, parents)) = path.split_last() else { return };
    let mut cur = v;
    for seg in parents {
        cur = match cur.get_mut(*seg) {
            Some(next) => next,
            None => return,
        };
    }
    if let Some(obj) = cur.as_object_mut() {
        obj.remove(*last);
    }
}

/// Strip every ignored field in place.
pub fn strip_ignored_fields(v: &mut Json) {
    for path in IGNORED_FIELDS {
        remove_nested_field(v, path);
    }
    #[cfg(feature = "strip-managed-fields")]
    remove_nested_field(v, &["metadata", "managedFields"]);
}

/// A parsed desired-state document with server-managed fields removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    raw: Json,
    type_descriptor: TypeDescriptor,
    name: String,
}

impl Manifest {
    /// Parse JSON or YAML text describing a single API object.
    pub fn parse(text: &str) -> AdapterResult<Self> {
        let json = if text.trim_start().starts_with('{') {
            serde_json::from_str::<Json>(text).map_err(|e| AdapterError::Parse(format!("malformed JSON: {}", e)))?
        } else {
            let val: serde_yaml::Value =
                serde_yaml::from_str(text).map_err(|e| AdapterError::Parse(format!("malformed YAML: {}", e)))?;
            serde_json::to_value(val).map_err(|e| AdapterError::Parse(format!("converting YAML to JSON: {}", e)))?
        };
        Self::from_value(json)
    }

    /// Build from an already-decoded tree; validates required fields and strips ignored ones.
    pub fn from_value(mut raw: Json) -> AdapterResult<Self> {
        if !raw.is_object() {
            return Err(AdapterError::Parse("document must be a mapping".into()));
        }
        strip_ignored_fields(&mut raw);
        let api_version = str_at(&raw, &["apiVersion"]).ok_or_else(|| AdapterError::Parse("missing apiVersion".into()))?;
        let kind = str_at(&raw, &["kind"]).ok_or_else(|| AdapterError::Parse("missing kind".into()))?;
        let name = str_at(&raw, &["metadata", "name"]).ok_or_else(|| AdapterError::Parse("missing metadata.name".into()))?;
        let type_descriptor = TypeDescriptor::from_api_version(api_version, kind);
        if type_descriptor.version.is_empty() || type_descriptor.kind.is_empty() {
            return Err(AdapterError::Parse(format!("invalid apiVersion/kind: {}/{}", api_version, kind)));
        }
        let name = name.to_string();
        Ok(Self { raw, type_descriptor, name })
    }

    pub fn type_descriptor(&self) -> &TypeDescriptor {
        &self.type_descriptor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace declared by the document itself. Empty strings count as undeclared.
    pub fn namespace(&self) -> Option<&str> {
        str_at(&self.raw, &["metadata", "namespace"])
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        self.set_metadata("namespace", namespace);
    }

    /// Stamp the optimistic-concurrency token read from the server.
    pub fn set_resource_version(&mut self, rv: &str) {
        self.set_metadata("resourceVersion", rv);
    }

    pub fn as_json(&self) -> &Json {
        &self.raw
    }

    pub fn into_json(self) -> Json {
        self.raw
    }

    fn set_metadata(&mut self, key: &str, value: &str) {
        // from_value guarantees metadata is an object holding the name
        if let Some(meta) = self.raw.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.insert(key.to_string(), Json::String(value.to_string()));
        }
    }
}

fn str_at<'a>(v: &'a Json, path: &[&str]) -> Option<&'a str> {
    let mut cur = v;
    for seg in path {
        cur = cur.get(*seg)?;
    }
    cur.as_str().filter(|s| !s.is_empty())
}

/// True when both documents parse and their stripped trees are structurally equal.
///
/// Unparsable input on either side is never reported as equivalent, so the
/// caller proceeds with an update that surfaces the parse error.
pub fn equivalent(a: &str, b: &str) -> bool {
    match (Manifest::parse(a), Manifest::parse(b)) {
        (Ok(a), Ok(b)) => a.raw == b.raw,
        (a, b) => {
            for e in [a.err(), b.err()].into_iter().flatten() {
                debug!(error = %e, "diff suppression: unparsable document treated as changed");
            }
            false
        }
    }
}
