//! kcr kubehub: discovery, REST mapping resolution and dynamic client wiring.

#![forbid(unsafe_code)]

pub mod mock;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResource;
use kube::{
    api::{Api, DeleteParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use kcr_core::{AdapterError, AdapterResult, TypeDescriptor};
use tracing::{debug, warn};

/// A resolved REST collection plus its scope.
#[derive(Debug, Clone)]
pub struct ResourceMapping {
    pub resource: ApiResource,
    pub namespaced: bool,
}

impl ResourceMapping {
    /// Address the collection inside `namespace`; ignored for cluster-scoped kinds.
    pub fn scoped(&self, namespace: &str) -> Collection {
        Collection {
            resource: self.resource.clone(),
            namespace: self.namespaced.then(|| namespace.to_string()),
        }
    }
}

/// Collection handle, optionally narrowed to one namespace.
#[derive(Debug, Clone)]
pub struct Collection {
    pub resource: ApiResource,
    pub namespace: Option<String>,
}

/// Discovery endpoints of the control plane.
#[async_trait::async_trait]
pub trait DiscoveryService: Send + Sync {
    /// Build the full REST mapping table and look up `gvk` at its exact version.
    async fn rest_mapping(&self, gvk: &GroupVersionKind) -> Result<Option<ResourceMapping>>;

    /// Resource descriptors served under one group/version (`v1` for core).
    async fn server_resources(&self, group_version: &str) -> Result<Vec<APIResource>>;
}

/// Schema-less CRUD over a collection.
#[async_trait::async_trait]
pub trait DynamicClient: Send + Sync {
    async fn create(&self, target: &Collection, obj: &DynamicObject, pp: &PostParams) -> kube::Result<DynamicObject>;
    async fn get(&self, target: &Collection, name: &str) -> kube::Result<DynamicObject>;
    async fn replace(&self, target: &Collection, name: &str, obj: &DynamicObject, pp: &PostParams) -> kube::Result<DynamicObject>;
    async fn delete(&self, target: &Collection, name: &str) -> kube::Result<()>;
}

/// Discovery backed by a live kube client.
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait::async_trait]
impl DiscoveryService for KubeDiscovery {
    async fn rest_mapping(&self, gvk: &GroupVersionKind) -> Result<Option<ResourceMapping>> {
        let discovery = Discovery::new(self.client.clone()).run().await.context("running API discovery")?;
        Ok(discovery.resolve_gvk(gvk).map(|(ar, caps)| ResourceMapping {
            resource: ar,
            namespaced: matches!(caps.scope, Scope::Namespaced),
        }))
    }

    async fn server_resources(&self, group_version: &str) -> Result<Vec<APIResource>> {
        let list = if group_version.contains('/') {
            self.client.list_api_group_resources(group_version).await
        } else {
            self.client.list_core_api_resources(group_version).await
        }
        .with_context(|| format!("listing resources for {}", group_version))?;
        Ok(list.resources)
    }
}

/// Dynamic CRUD backed by a live kube client.
pub struct KubeDynamic {
    client: Client,
}

impl KubeDynamic {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api(&self, target: &Collection) -> Api<DynamicObject> {
        match target.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &target.resource),
            None => Api::all_with(self.client.clone(), &target.resource),
        }
    }
}

#[async_trait::async_trait]
impl DynamicClient for KubeDynamic {
    async fn create(&self, target: &Collection, obj: &DynamicObject, pp: &PostParams) -> kube::Result<DynamicObject> {
        self.api(target).create(pp, obj).await
    }

    async fn get(&self, target: &Collection, name: &str) -> kube::Result<DynamicObject> {
        self.api(target).get(name).await
    }

    async fn replace(&self, target: &Collection, name: &str, obj: &DynamicObject, pp: &PostParams) -> kube::Result<DynamicObject> {
        self.api(target).replace(name, pp, obj).await
    }

    async fn delete(&self, target: &Collection, name: &str) -> kube::Result<()> {
        self.api(target).delete(name, &DeleteParams::default()).await.map(|_| ())
    }
}

/// Discovery + dynamic client pair handed explicitly to every operation.
#[derive(Clone)]
pub struct ClusterClients {
    pub discovery: Arc<dyn DiscoveryService>,
    pub dynamic: Arc<dyn DynamicClient>,
}

impl ClusterClients {
    pub fn new(discovery: Arc<dyn DiscoveryService>, dynamic: Arc<dyn DynamicClient>) -> Self {
        Self { discovery, dynamic }
    }

    pub fn from_client(client: Client) -> Self {
        Self::new(Arc::new(KubeDiscovery::new(client.clone())), Arc::new(KubeDynamic::new(client)))
    }

    /// Clients for the ambient kubeconfig / in-cluster environment.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        Ok(Self::from_client(client))
    }
}

pub fn to_gvk(td: &TypeDescriptor) -> GroupVersionKind {
    GroupVersionKind { group: td.group.clone(), version: td.version.clone(), kind: td.kind.clone() }
}

/// Scan group/version descriptors for `kind`, skipping subresources (`cats/status`).
pub fn namespaced_from_descriptors(resources: &[APIResource], kind: &str) -> Option<bool> {
    resources
        .iter()
        .filter(|r| !r.name.contains('/'))
        .find(|r| r.kind == kind)
        .map(|r| r.namespaced)
}

/// Resolve a type descriptor to its REST collection and scope.
///
/// Runs a fresh discovery round-trip on every call; nothing is cached.
pub async fn resolve(clients: &ClusterClients, td: &TypeDescriptor) -> AdapterResult<ResourceMapping> {
    let t0 = Instant::now();
    let mapping = clients
        .discovery
        .rest_mapping(&to_gvk(td))
        .await
        .map_err(|e| AdapterError::Discovery(format!("{}: {:#}", td, e)))?
        .ok_or_else(|| AdapterError::Discovery(format!("{}: no REST mapping at version {}", td, td.version)))?;

    let gv = td.group_version();
    let resources = clients
        .discovery
        .server_resources(&gv)
        .await
        .map_err(|e| AdapterError::Discovery(format!("{}: namespace scope lookup failed: {:#}", td, e)))?;
    let namespaced = match namespaced_from_descriptors(&resources, &td.kind) {
        Some(n) => n,
        None => {
            warn!(gvk = %td, fallback_namespaced = mapping.namespaced, "kind not listed under its group/version; using scope from REST mapping");
            mapping.namespaced
        }
    };
    debug!(gvk = %td, resource = %mapping.resource.plural, namespaced, took_ms = %t0.elapsed().as_millis(), "resolved");
    Ok(ResourceMapping { resource: mapping.resource, namespaced })
}
