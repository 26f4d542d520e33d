//! Orchestrator-facing lifecycle over [`Reconciler`].
//!
//! Mirrors how a provisioning tool drives one tracked object: create then
//! refresh, refresh (dropping vanished objects), update only on a real diff,
//! delete, and passthrough import. Create and delete are time-bounded.
//!
//! After create, the object is addressed through the stored [`ExternalId`]:
//! a document that omits `metadata.namespace` is pinned to the id's namespace.

use std::future::Future;
use std::time::Duration;

use kcr_core::{equivalent, remove_nested_field, AdapterError, AdapterResult, ExternalId, Manifest};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Reconciler;

/// What the orchestrator persists between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedState {
    pub id: ExternalId,
    /// Normalized JSON as last observed on the server.
    pub json: String,
}

pub struct Lifecycle {
    reconciler: Reconciler,
}

impl Lifecycle {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub async fn create(&self, json: &str) -> AdapterResult<TrackedState> {
        let manifest = Manifest::parse(json)?;
        let limit = self.reconciler.config().create_timeout;
        let id = bounded("create", limit, self.reconciler.create(&manifest)).await?;
        let tracked = Tracked::locate(&id, json)?;
        self.refresh(id, &tracked).await
    }

    /// `None` when the object is gone and should leave tracked state.
    pub async fn read(&self, state: &TrackedState) -> AdapterResult<Option<TrackedState>> {
        let tracked = Tracked::locate(&state.id, &state.json)?;
        match self.refresh(state.id.clone(), &tracked).await {
            Err(e) if e.is_not_found() => {
                info!(id = %state.id, "object no longer exists; dropping from tracked state");
                Ok(None)
            }
            other => other.map(Some),
        }
    }

    /// Skips the server update when `json` is equivalent to the tracked document.
    pub async fn update(&self, state: &TrackedState, json: &str) -> AdapterResult<TrackedState> {
        let tracked = Tracked::locate(&state.id, json)?;
        if equivalent(&state.json, json) {
            debug!(id = %state.id, "no semantic change; skipping update");
            counter!("kcr_update_skipped_total", 1u64);
        } else {
            self.reconciler.update(&tracked.manifest).await?;
        }
        self.refresh(state.id.clone(), &tracked).await
    }

    pub async fn delete(&self, state: &TrackedState) -> AdapterResult<()> {
        let tracked = Tracked::locate(&state.id, &state.json)?;
        let limit = self.reconciler.config().delete_timeout;
        bounded("delete", limit, self.reconciler.delete(&tracked.manifest)).await
    }

    /// Adopt an existing object under a caller-supplied identifier.
    pub async fn import(&self, id: ExternalId, json: &str) -> AdapterResult<TrackedState> {
        let tracked = Tracked::locate(&id, json)?;
        self.refresh(id, &tracked).await
    }

    async fn refresh(&self, id: ExternalId, tracked: &Tracked) -> AdapterResult<TrackedState> {
        let mut live = self.reconciler.read(&tracked.manifest).await?;
        if !tracked.namespace_declared {
            remove_nested_field(&mut live, &["metadata", "namespace"]);
        }
        let json = serde_json::to_string(&live).map_err(|e| AdapterError::Read(format!("{}: serializing: {}", id, e)))?;
        Ok(TrackedState { id, json })
    }
}

/// A document pinned to the object its stored id names.
struct Tracked {
    manifest: Manifest,
    namespace_declared: bool,
}

impl Tracked {
    /// The id's namespace fills in for a document that declares none, so the
    /// configured default never redirects a tracked object.
    fn locate(id: &ExternalId, json: &str) -> AdapterResult<Self> {
        let mut manifest = Manifest::parse(json)?;
        if manifest.name() != id.name {
            return Err(AdapterError::Parse(format!("id {} does not match metadata.name {}", id, manifest.name())));
        }
        let declared = manifest.namespace().map(str::to_string);
        match (declared.as_deref(), id.namespace.as_deref()) {
            (Some(doc), Some(ns)) if doc != ns => {
                return Err(AdapterError::Parse(format!("id {} does not match metadata.namespace {}", id, doc)));
            }
            (None, Some(ns)) => manifest.set_namespace(ns),
            _ => {}
        }
        Ok(Self { manifest, namespace_declared: declared.is_some() })
    }
}

async fn bounded<T>(op: &'static str, limit: Duration, fut: impl Future<Output = AdapterResult<T>>) -> AdapterResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(AdapterError::Timeout { op, secs: limit.as_secs() }),
    }
}
