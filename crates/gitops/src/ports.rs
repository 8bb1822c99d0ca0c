//! Port traits implemented by infrastructure crates.
//!
//! The sync engine only ever talks to a Git host and a cluster through these
//! two traits. Both are object-safe so the composition root can pick an
//! implementation at runtime and hand it over as `Arc<dyn ...>`.

use async_trait::async_trait;

use crate::{
    AppliedResource, ApplyError, ManifestPath, Namespace, ProviderError, ProviderKind, PushEvent,
    RepositoryLocation, Revision, WebhookRegistration, WebhookRequest,
};

/// A Git hosting backend: authenticates and decodes its webhooks, and serves
/// repository content at a given revision.
#[async_trait]
pub trait GitProvider: Send + Sync {
    /// Which backend this is; used in logs and HTTP responses.
    fn kind(&self) -> ProviderKind;

    /// Checks that `request` was sent by the provider using `secret`.
    ///
    /// Must run before [`GitProvider::parse_push_event`].
    fn validate(&self, request: &WebhookRequest, secret: &str) -> Result<(), ProviderError>;

    /// Decodes a validated delivery into a [`PushEvent`].
    ///
    /// Deliveries that are valid but not pushes yield
    /// [`ProviderError::IgnoredEvent`].
    fn parse_push_event(&self, request: &WebhookRequest) -> Result<PushEvent, ProviderError>;

    /// Fetches the raw content of `path` at `revision`.
    async fn download_file(
        &self,
        location: &RepositoryLocation,
        revision: &Revision,
        path: &ManifestPath,
    ) -> Result<Vec<u8>, ProviderError>;

    /// Lists every file path in the repository at `revision`.
    async fn list_files(
        &self,
        location: &RepositoryLocation,
        revision: &Revision,
    ) -> Result<Vec<ManifestPath>, ProviderError>;

    /// Ensures a push webhook pointing at `url` exists on the repository.
    async fn setup_webhook(
        &self,
        location: &RepositoryLocation,
        url: &str,
        secret: &str,
    ) -> Result<WebhookRegistration, ProviderError>;
}

/// Writes Kubernetes objects described by a manifest into the cluster.
#[async_trait]
pub trait ResourceApplier: Send + Sync {
    /// Applies every object in `content` (a possibly multi-document YAML
    /// stream). Namespaced objects without a namespace are placed in
    /// `default_namespace`.
    async fn apply_manifest(
        &self,
        content: &[u8],
        default_namespace: &Namespace,
    ) -> Result<Vec<AppliedResource>, ApplyError>;
}
