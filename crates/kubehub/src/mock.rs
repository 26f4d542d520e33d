//! In-memory control plane for tests.
//!
//! Serves a fixed discovery table and stores objects keyed by collection,
//! namespace and name. Mimics the server-side behavior the adapter relies on:
//! uid/resourceVersion/creationTimestamp assignment, a `status` subtree,
//! AlreadyExists on create, NotFound on get/replace/delete, and Conflict when
//! a replace carries a stale resourceVersion. Switches inject discovery
//! failures and a concurrent writer.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResource;
use kube::{
    api::PostParams,
    core::{ApiResource, DynamicObject, ErrorResponse, GroupVersionKind},
};
use serde_json::Value as Json;

use crate::{ClusterClients, Collection, DiscoveryService, DynamicClient, ResourceMapping};

/// Number of calls the mock has served, per endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub discovery: usize,
    pub create: usize,
    pub get: usize,
    pub replace: usize,
    pub delete: usize,
}

#[derive(Debug, Clone)]
struct MockKind {
    resource: ApiResource,
    namespaced: bool,
    /// Whether the kind appears in its group/version resource list.
    listed: bool,
}

type ObjectKey = (String, Option<String>, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Json>,
    next_rv: u64,
    next_uid: u64,
    calls: CallCounts,
}

#[derive(Default)]
pub struct MockCluster {
    kinds: Vec<MockKind>,
    discovery_error: Option<String>,
    scope_lookup_error: Option<String>,
    racing_writer: bool,
    state: Mutex<State>,
}

impl MockCluster {
    pub fn new() -> Self { Self::default() }

    /// Register a served kind.
    pub fn with_kind(self, group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        self.push_kind(group, version, kind, plural, namespaced, true)
    }

    /// Register a kind present in the mapping table but missing from its group/version list.
    pub fn with_unlisted_kind(self, group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        self.push_kind(group, version, kind, plural, namespaced, false)
    }

    /// Make every discovery call fail with `message`.
    pub fn failing_discovery(mut self, message: &str) -> Self {
        self.discovery_error = Some(message.to_string());
        self
    }

    /// Make only the group/version resource listing fail with `message`.
    pub fn failing_scope_lookup(mut self, message: &str) -> Self {
        self.scope_lookup_error = Some(message.to_string());
        self
    }

    /// Simulate another writer: every `get` is followed by a write that bumps
    /// the stored resourceVersion.
    pub fn with_racing_writer(mut self) -> Self {
        self.racing_writer = true;
        self
    }

    pub fn into_arc(self) -> Arc<Self> { Arc::new(self) }

    pub fn clients(self: &Arc<Self>) -> ClusterClients {
        ClusterClients::new(self.clone(), self.clone())
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Stored object, including server-managed fields.
    pub fn object(&self, plural: &str, namespace: Option<&str>, name: &str) -> Option<Json> {
        let key = (plural.to_string(), namespace.map(|s| s.to_string()), name.to_string());
        self.lock().objects.get(&key).cloned()
    }

    /// Delete behind the adapter's back.
    pub fn remove_object(&self, plural: &str, namespace: Option<&str>, name: &str) -> bool {
        let key = (plural.to_string(), namespace.map(|s| s.to_string()), name.to_string());
        self.lock().objects.remove(&key).is_some()
    }

    fn push_kind(mut self, group: &str, version: &str, kind: &str, plural: &str, namespaced: bool, listed: bool) -> Self {
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, plural);
        self.kinds.push(MockKind { resource, namespaced, listed });
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn discovery_call(&self) -> Result<()> {
        self.lock().calls.discovery += 1;
        match &self.discovery_error {
            Some(msg) => Err(anyhow!("{}", msg)),
            None => Ok(()),
        }
    }
}

fn key(target: &Collection, name: &str) -> ObjectKey {
    (target.resource.plural.clone(), target.namespace.clone(), name.to_string())
}

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(ErrorResponse { status: "Failure".into(), message, reason: reason.into(), code })
}

fn to_json(obj: &DynamicObject) -> kube::Result<Json> {
    serde_json::to_value(obj).map_err(kube::Error::SerdeError)
}

fn from_json(v: Json) -> kube::Result<DynamicObject> {
    serde_json::from_value(v).map_err(kube::Error::SerdeError)
}

fn meta_str(v: &Json, field: &str) -> Option<String> {
    v.get("metadata").and_then(|m| m.get(field)).and_then(|s| s.as_str()).map(|s| s.to_string())
}

#[async_trait::async_trait]
impl DiscoveryService for MockCluster {
    async fn rest_mapping(&self, gvk: &GroupVersionKind) -> Result<Option<ResourceMapping>> {
        self.discovery_call()?;
        Ok(self
            .kinds
            .iter()
            .find(|k| k.resource.group == gvk.group && k.resource.version == gvk.version && k.resource.kind == gvk.kind)
            .map(|k| ResourceMapping { resource: k.resource.clone(), namespaced: k.namespaced }))
    }

    async fn server_resources(&self, group_version: &str) -> Result<Vec<APIResource>> {
        self.discovery_call()?;
        if let Some(msg) = &self.scope_lookup_error {
            return Err(anyhow!("{}", msg));
        }
        Ok(self
            .kinds
            .iter()
            .filter(|k| k.listed && k.resource.api_version == group_version)
            .map(|k| APIResource {
                name: k.resource.plural.clone(),
                kind: k.resource.kind.clone(),
                namespaced: k.namespaced,
                verbs: ["create", "get", "update", "delete"].iter().map(|v| v.to_string()).collect(),
                ..Default::default()
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl DynamicClient for MockCluster {
    async fn create(&self, target: &Collection, obj: &DynamicObject, _pp: &PostParams) -> kube::Result<DynamicObject> {
        let mut st = self.lock();
        st.calls.create += 1;
        let name = obj.metadata.name.clone().unwrap_or_default();
        let k = key(target, &name);
        if st.objects.contains_key(&k) {
            return Err(api_error(409, "AlreadyExists", format!("{} \"{}\" already exists", target.resource.plural, name)));
        }
        st.next_rv += 1;
        st.next_uid += 1;
        let mut v = to_json(obj)?;
        v["metadata"]["uid"] = Json::String(format!("00000000-0000-0000-0000-{:012}", st.next_uid));
        v["metadata"]["resourceVersion"] = Json::String(st.next_rv.to_string());
        v["metadata"]["creationTimestamp"] = Json::String("2024-01-01T00:00:00Z".into());
        v["metadata"]["generation"] = Json::from(1);
        if let Some(ns) = &target.namespace {
            v["metadata"]["namespace"] = Json::String(ns.clone());
        }
        v["status"] = serde_json::json!({ "observedGeneration": 1 });
        st.objects.insert(k, v.clone());
        from_json(v)
    }

    async fn get(&self, target: &Collection, name: &str) -> kube::Result<DynamicObject> {
        let mut st = self.lock();
        st.calls.get += 1;
        let k = key(target, name);
        let Some(found) = st.objects.get(&k).cloned() else {
            return Err(api_error(404, "NotFound", format!("{} \"{}\" not found", target.resource.plural, name)));
        };
        if self.racing_writer {
            st.next_rv += 1;
            let rv = Json::String(st.next_rv.to_string());
            if let Some(stored) = st.objects.get_mut(&k) {
                stored["metadata"]["resourceVersion"] = rv;
            }
        }
        from_json(found)
    }

    async fn replace(&self, target: &Collection, name: &str, obj: &DynamicObject, _pp: &PostParams) -> kube::Result<DynamicObject> {
        let mut st = self.lock();
        st.calls.replace += 1;
        let k = key(target, name);
        let Some(current) = st.objects.get(&k).cloned() else {
            return Err(api_error(404, "NotFound", format!("{} \"{}\" not found", target.resource.plural, name)));
        };
        let current_rv = meta_str(&current, "resourceVersion");
        if obj.metadata.resource_version != current_rv {
            return Err(api_error(
                409,
                "Conflict",
                format!("Operation cannot be fulfilled on {} \"{}\": the object has been modified", target.resource.plural, name),
            ));
        }
        st.next_rv += 1;
        let generation = current["metadata"]["generation"].as_i64().unwrap_or(0) + 1;
        let mut v = to_json(obj)?;
        v["metadata"]["uid"] = current["metadata"]["uid"].clone();
        v["metadata"]["creationTimestamp"] = current["metadata"]["creationTimestamp"].clone();
        v["metadata"]["resourceVersion"] = Json::String(st.next_rv.to_string());
        v["metadata"]["generation"] = Json::from(generation);
        if let Some(ns) = &target.namespace {
            v["metadata"]["namespace"] = Json::String(ns.clone());
        }
        v["status"] = serde_json::json!({ "observedGeneration": generation });
        st.objects.insert(k, v.clone());
        from_json(v)
    }

    async fn delete(&self, target: &Collection, name: &str) -> kube::Result<()> {
        let mut st = self.lock();
        st.calls.delete += 1;
        match st.objects.remove(&key(target, name)) {
            Some(_) => Ok(()),
            None => Err(api_error(404, "NotFound", format!("{} \"{}\" not found", target.resource.plural, name))),
        }
    }
}
