//! kcr reconcile: create/read/update/delete of one generic API object.
//!
//! Every operation re-resolves the document's REST mapping through discovery
//! before issuing its CRUD call; no state is kept between calls.

#![forbid(unsafe_code)]

pub mod config;
pub mod lifecycle;

pub use config::AdapterConfig;
pub use lifecycle::{Lifecycle, TrackedState};

use std::future::Future;
use std::time::Instant;

use kcr_core::{remove_nested_field, strip_ignored_fields, AdapterError, AdapterResult, ExternalId, Manifest};
use kcr_kubehub::{ClusterClients, Collection, ResourceMapping};
use kube::{api::PostParams, core::DynamicObject};
use metrics::{counter, histogram};
use serde_json::Value as Json;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Create,
    Read,
    Update,
    Delete,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Create => "create",
            Op::Read => "read",
            Op::Update => "update",
            Op::Delete => "delete",
        }
    }
}

pub struct Reconciler {
    clients: ClusterClients,
    config: AdapterConfig,
}

impl Reconciler {
    pub fn new(clients: ClusterClients, config: AdapterConfig) -> Self {
        Self { clients, config }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// The document's own namespace, else the configured default.
    pub fn effective_namespace<'a>(&'a self, manifest: &'a Manifest) -> &'a str {
        manifest.namespace().unwrap_or(&self.config.default_namespace)
    }

    pub async fn resolve(&self, manifest: &Manifest) -> AdapterResult<ResourceMapping> {
        kcr_kubehub::resolve(&self.clients, manifest.type_descriptor()).await
    }

    async fn target(&self, manifest: &Manifest) -> AdapterResult<Collection> {
        let mapping = self.resolve(manifest).await?;
        Ok(mapping.scoped(self.effective_namespace(manifest)))
    }

    fn post_params(&self) -> PostParams {
        PostParams { field_manager: self.config.field_manager.clone(), ..Default::default() }
    }

    /// Create the object and return the identifier the caller must store.
    pub async fn create(&self, manifest: &Manifest) -> AdapterResult<ExternalId> {
        observed(Op::Create, async {
            let target = self.target(manifest).await?;
            let label = describe(manifest, &target);
            let obj = to_dynamic(manifest)?;
            self.clients
                .dynamic
                .create(&target, &obj, &self.post_params())
                .await
                .map_err(|e| classify(e, Op::Create, &label))?;
            let id = match target.namespace.as_deref() {
                Some(ns) => ExternalId::namespaced(ns, manifest.name()),
                None => ExternalId::cluster(manifest.name()),
            };
            info!(gvk = %manifest.type_descriptor(), id = %id, "created");
            Ok::<_, AdapterError>(id)
        })
        .await
    }

    /// Fetch the live object, normalized for comparison against `manifest`.
    pub async fn read(&self, manifest: &Manifest) -> AdapterResult<Json> {
        observed(Op::Read, async {
            let target = self.target(manifest).await?;
            let label = describe(manifest, &target);
            let obj = self
                .clients
                .dynamic
                .get(&target, manifest.name())
                .await
                .map_err(|e| classify(e, Op::Read, &label))?;
            let mut live = serde_json::to_value(&obj).map_err(|e| AdapterError::Read(format!("{}: serializing: {}", label, e)))?;
            normalize_observed(&mut live, manifest.namespace().is_some());
            debug!(obj = %label, "read");
            Ok::<_, AdapterError>(live)
        })
        .await
    }

    /// Replace the object, stamped with the server's current resourceVersion.
    pub async fn update(&self, manifest: &Manifest) -> AdapterResult<()> {
        observed(Op::Update, async {
            let target = self.target(manifest).await?;
            let label = describe(manifest, &target);
            let current = self
                .clients
                .dynamic
                .get(&target, manifest.name())
                .await
                .map_err(|e| classify(e, Op::Update, &label))?;
            let mut desired = manifest.clone();
            if let Some(rv) = current.metadata.resource_version.as_deref() {
                desired.set_resource_version(rv);
            }
            let obj = to_dynamic(&desired)?;
            self.clients
                .dynamic
                .replace(&target, manifest.name(), &obj, &self.post_params())
                .await
                .map_err(|e| classify(e, Op::Update, &label))?;
            info!(obj = %label, rv = ?current.metadata.resource_version, "updated");
            Ok::<_, AdapterError>(())
        })
        .await
    }

    pub async fn delete(&self, manifest: &Manifest) -> AdapterResult<()> {
        observed(Op::Delete, async {
            let target = self.target(manifest).await?;
            let label = describe(manifest, &target);
            self.clients
                .dynamic
                .delete(&target, manifest.name())
                .await
                .map_err(|e| classify(e, Op::Delete, &label))?;
            info!(obj = %label, "deleted");
            Ok::<_, AdapterError>(())
        })
        .await
    }
}

async fn observed<T>(op: Op, fut: impl Future<Output = AdapterResult<T>>) -> AdapterResult<T> {
    let t0 = Instant::now();
    let res = fut.await;
    let outcome = if res.is_ok() { "ok" } else { "err" };
    counter!("kcr_ops_total", 1u64, "op" => op.as_str(), "outcome" => outcome);
    histogram!("kcr_op_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => op.as_str());
    res
}

/// Strip server-managed fields; drop the namespace unless the caller declared one.
pub fn normalize_observed(live: &mut Json, namespace_declared: bool) {
    strip_ignored_fields(live);
    if !namespace_declared {
        remove_nested_field(live, &["metadata", "namespace"]);
    }
}

fn to_dynamic(manifest: &Manifest) -> AdapterResult<DynamicObject> {
    serde_json::from_value(manifest.as_json().clone())
        .map_err(|e| AdapterError::Parse(format!("{}: not a valid API object: {}", manifest.type_descriptor(), e)))
}

fn describe(manifest: &Manifest, target: &Collection) -> String {
    match target.namespace.as_deref() {
        Some(ns) => format!("{} {}/{}", manifest.type_descriptor(), ns, manifest.name()),
        None => format!("{} {}", manifest.type_descriptor(), manifest.name()),
    }
}

fn classify(err: kube::Error, op: Op, target: &str) -> AdapterError {
    if let kube::Error::Api(resp) = &err {
        // 404 on create means the namespace is missing, not the object
        if resp.code == 404 && op != Op::Create {
            return AdapterError::NotFound(target.to_string());
        }
        if resp.code == 409 && op == Op::Update {
            return AdapterError::Conflict(format!("{}: {}", target, resp.message));
        }
    }
    let msg = format!("{}: {}", target, err);
    match op {
        Op::Create => AdapterError::Create(msg),
        Op::Read => AdapterError::Read(msg),
        Op::Update => AdapterError::Update(msg),
        Op::Delete => AdapterError::Delete(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: format!("{} happened", reason), reason: reason.into(), code })
    }

    #[test]
    fn classify_not_found_per_phase() {
        assert!(classify(api_err(404, "NotFound"), Op::Read, "t").is_not_found());
        assert!(classify(api_err(404, "NotFound"), Op::Update, "t").is_not_found());
        assert!(classify(api_err(404, "NotFound"), Op::Delete, "t").is_not_found());
        assert!(matches!(classify(api_err(404, "NotFound"), Op::Create, "t"), AdapterError::Create(_)));
    }

    #[test]
    fn classify_conflict_only_on_update() {
        let e = classify(api_err(409, "Conflict"), Op::Update, "app.example/v1/Cat default/tom");
        assert!(e.is_conflict());
        assert!(e.to_string().contains("default/tom"), "e={}", e);
        assert!(matches!(classify(api_err(409, "AlreadyExists"), Op::Create, "t"), AdapterError::Create(_)));
    }

    #[test]
    fn classify_other_failures_keep_phase() {
        assert!(matches!(classify(api_err(422, "Invalid"), Op::Update, "t"), AdapterError::Update(_)));
        assert!(matches!(classify(api_err(403, "Forbidden"), Op::Delete, "t"), AdapterError::Delete(_)));
        assert!(matches!(classify(api_err(500, "InternalError"), Op::Read, "t"), AdapterError::Read(_)));
    }

    #[test]
    fn normalize_drops_undeclared_namespace() {
        let live = serde_json::json!({
            "apiVersion": "app.example/v1",
            "kind": "Cat",
            "metadata": { "name": "tom", "namespace": "default", "uid": "u", "resourceVersion": "7" },
            "status": { "observedGeneration": 1 },
            "data": { "nothing": "toseehere" }
        });
        let mut a = live.clone();
        normalize_observed(&mut a, false);
        assert_eq!(
            a,
            serde_json::json!({
                "apiVersion": "app.example/v1",
                "kind": "Cat",
                "metadata": { "name": "tom" },
                "data": { "nothing": "toseehere" }
            })
        );
        let mut b = live;
        normalize_observed(&mut b, true);
        assert_eq!(b["metadata"]["namespace"], "default");
    }
}
