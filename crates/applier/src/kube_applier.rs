//! [`ResourceApplier`] backed by the Kubernetes API.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::PostParams;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::discovery::{self, ApiCapabilities, Scope};
use kube::{Api, Client};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use gitops::{AppliedResource, ApplyAction, ApplyError, Namespace, ResourceApplier};

use crate::manifest::{parse_manifest, resolve_namespace, Manifest};

/// Field manager recorded on every object this controller writes.
pub const FIELD_MANAGER: &str = "trigra";

type Resolved = (ApiResource, ApiCapabilities);

/// Applies manifests with get → create | replace semantics.
///
/// REST mappings are discovered once per group/version/kind and cached for the
/// lifetime of the applier.
#[derive(Clone)]
pub struct KubeApplier {
    client: Client,
    resources: Arc<RwLock<HashMap<GroupVersionKind, Resolved>>>,
}

impl KubeApplier {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<Resolved, ApplyError> {
        if let Some(found) = self.resources.read().await.get(gvk) {
            return Ok(found.clone());
        }

        debug!(kind = %describe_gvk(gvk), "Discovering REST mapping");
        let resolved = discovery::pinned_kind(&self.client, gvk)
            .await
            .map_err(|e| ApplyError::Discovery {
                kind: describe_gvk(gvk),
                message: e.to_string(),
            })?;
        self.resources
            .write()
            .await
            .insert(gvk.clone(), resolved.clone());
        Ok(resolved)
    }

    async fn apply_one(
        &self,
        manifest: Manifest,
        default_namespace: &Namespace,
    ) -> Result<AppliedResource, ApplyError> {
        let (resource, capabilities) = self.resolve(&manifest.gvk).await?;
        let name = manifest.name().to_string();
        let kind = manifest.gvk.kind.clone();
        let mut object = manifest.object;

        let namespace = target_namespace(
            &capabilities.scope,
            object.metadata.namespace.as_deref(),
            default_namespace,
        );
        object.metadata.namespace = namespace.clone();
        let api: Api<DynamicObject> = match &namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        };

        let api_error = |e: kube::Error| ApplyError::Api {
            kind: kind.clone(),
            name: name.clone(),
            message: e.to_string(),
        };
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PostParams::default()
        };

        let action = match api.get_opt(&name).await.map_err(api_error)? {
            None => {
                api.create(&params, &object).await.map_err(api_error)?;
                ApplyAction::Created
            }
            Some(current) => {
                object.metadata.resource_version = current.metadata.resource_version;
                api.replace(&name, &params, &object)
                    .await
                    .map_err(api_error)?;
                ApplyAction::Updated
            }
        };

        let applied = AppliedResource {
            kind,
            name,
            namespace,
            action,
        };
        info!(resource = %applied, "Applied resource");
        Ok(applied)
    }
}

impl std::fmt::Debug for KubeApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeApplier").finish_non_exhaustive()
    }
}

#[async_trait]
impl ResourceApplier for KubeApplier {
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    async fn apply_manifest(
        &self,
        content: &[u8],
        default_namespace: &Namespace,
    ) -> Result<Vec<AppliedResource>, ApplyError> {
        let manifests = parse_manifest(content)?;
        let mut applied = Vec::with_capacity(manifests.len());
        for manifest in manifests {
            applied.push(self.apply_one(manifest, default_namespace).await?);
        }
        Ok(applied)
    }
}

/// Namespace an object is written to; `None` for cluster-scoped kinds.
fn target_namespace(
    scope: &Scope,
    declared: Option<&str>,
    default_namespace: &Namespace,
) -> Option<String> {
    match scope {
        Scope::Namespaced => Some(resolve_namespace(declared, default_namespace)),
        Scope::Cluster => None,
    }
}

/// `Deployment.apps/v1`, or `ConfigMap/v1` for the core group.
fn describe_gvk(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}/{}", gvk.kind, gvk.version)
    } else {
        format!("{}.{}/{}", gvk.kind, gvk.group, gvk.version)
    }
}
