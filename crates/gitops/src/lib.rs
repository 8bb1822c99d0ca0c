//! Core GitOps domain for TRIGRA.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type and error type used by the controller, together with the sync engine
//! that turns a push event into cluster writes. Infrastructure crates implement
//! the port traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`RepositoryOwner`, `Revision`, `Namespace`, etc.) |
//! | [`types`] | Value types (`PushEvent`, `WebhookRequest`, `SyncReport`, etc.) |
//! | [`errors`] | `ProviderError`, `ApplyError`, `SyncError` |
//! | [`ports`] | `GitProvider` and `ResourceApplier` traits |
//! | [`repo_url`] | Owner/repository inference from clone URLs |
//! | [`sync`] | Manifest selection and the `SyncEngine` |

pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod repo_url;
pub mod sync;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{ApplyError, ProviderError, SyncError, UnknownProviderKind};
pub use identifiers::{
    GitRef, ManifestPath, Namespace, RepositoryName, RepositoryOwner, Revision, SyncId,
};
pub use ports::{GitProvider, ResourceApplier};
pub use repo_url::parse_repository_url;
pub use sync::{is_manifest_path, ref_matches_branch, select_manifests, SyncEngine};
pub use types::{
    AppliedResource, ApplyAction, ChangedFiles, ProviderKind, PushEvent, RepositoryLocation,
    SyncReport, Timestamp, WebhookRegistration, WebhookRequest,
};
