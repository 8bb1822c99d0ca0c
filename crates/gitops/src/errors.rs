//! Error types for the TRIGRA GitOps domain.
//!
//! [`ProviderError`] and [`ApplyError`] are produced by the infrastructure
//! behind the [`crate::GitProvider`] and [`crate::ResourceApplier`] ports. They
//! carry strings rather than foreign error types so that this crate stays free
//! of HTTP and Kubernetes client dependencies.
//!
//! [`SyncError`] wraps either of them with the manifest the sync was working on
//! when it stopped.

use thiserror::Error;

use crate::ManifestPath;

// ---------------------------------------------------------------------------
// Git provider errors
// ---------------------------------------------------------------------------

/// Failures reported by a [`crate::GitProvider`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The webhook carried no signature or token although a secret is configured.
    #[error("missing webhook signature")]
    MissingSignature,

    /// The webhook signature or token did not match the configured secret.
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// A well-formed delivery that does not call for a sync (ping, branch
    /// deletion, non-push event kinds).
    #[error("ignoring event: {reason}")]
    IgnoredEvent {
        /// Why the event was not treated as a push.
        reason: String,
    },

    /// The payload could not be decoded or lacks required fields.
    #[error("malformed payload: {message}")]
    MalformedPayload { message: String },

    /// The requested file does not exist at the requested revision.
    #[error("file not found: {path}")]
    NotFound { path: String },

    /// A repository path tried to escape the working copy.
    #[error("path traversal rejected: {path}")]
    PathTraversal { path: String },

    /// The provider API answered with a non-success status.
    #[error("provider API returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("transport error: {message}")]
    Transport { message: String },

    /// A local `git` invocation failed.
    #[error("git error: {message}")]
    Git { message: String },

    /// The provider is missing configuration it needs for this operation.
    #[error("provider configuration error: {message}")]
    Configuration { message: String },
}

impl ProviderError {
    /// `true` for deliveries that should be acknowledged without syncing.
    pub fn is_ignored_event(&self) -> bool {
        matches!(self, Self::IgnoredEvent { .. })
    }
}

// ---------------------------------------------------------------------------
// Cluster apply errors
// ---------------------------------------------------------------------------

/// Failures reported by a [`crate::ResourceApplier`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The manifest could not be decoded into Kubernetes objects.
    #[error("failed to decode document {document}: {message}")]
    Decode { document: usize, message: String },

    /// The cluster does not serve the object's group/version/kind.
    #[error("failed to get REST mapping for {kind}: {message}")]
    Discovery { kind: String, message: String },

    /// The API server rejected a get, create or replace.
    #[error("failed to apply {kind}/{name}: {message}")]
    Api {
        kind: String,
        name: String,
        message: String,
    },

    /// No usable Kubernetes client could be built.
    #[error("kubernetes client error: {message}")]
    Client { message: String },
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Reasons a sync run stopped before applying every manifest.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The repository listing for a full sync could not be fetched.
    #[error("failed to list repository files: {source}")]
    ListFiles {
        #[source]
        source: ProviderError,
    },

    /// A manifest could not be downloaded at the pushed revision.
    #[error("failed to process file {path}: failed to download file: {source}")]
    Download {
        path: ManifestPath,
        #[source]
        source: ProviderError,
    },

    /// A manifest's objects could not be applied to the cluster.
    #[error("failed to process file {path}: failed to apply resources: {source}")]
    Apply {
        path: ManifestPath,
        #[source]
        source: ApplyError,
    },
}

// ---------------------------------------------------------------------------

/// A provider name that does not match any supported [`crate::ProviderKind`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unsupported git provider: {0}")]
pub struct UnknownProviderKind(pub String);
