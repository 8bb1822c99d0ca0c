//! TRIGRA Kubernetes infrastructure adapter.
//!
//! Implements [`gitops::ResourceApplier`] with [`kube`]:
//!
//! - [`manifest`] decodes multi-document YAML into dynamically typed objects.
//! - [`KubeApplier`] resolves each object's REST mapping through API discovery
//!   and creates or replaces it.
//! - [`connect`] builds the client from in-cluster or kubeconfig credentials.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** The [`gitops`] crate sees only
//! [`gitops::ResourceApplier`] and [`gitops::AppliedResource`].

pub mod client;
pub mod kube_applier;
pub mod manifest;

pub use client::{connect, running_in_cluster, SERVICE_ACCOUNT_TOKEN};
pub use kube_applier::{KubeApplier, FIELD_MANAGER};
pub use manifest::{parse_manifest, Manifest};
