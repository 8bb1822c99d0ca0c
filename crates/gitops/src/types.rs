//! Shared value types for the TRIGRA GitOps domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! structure: a push event as every provider reports it, the transport-neutral
//! webhook request, and the outcome of applying manifests to the cluster.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::UnknownProviderKind;
use crate::{GitRef, ManifestPath, RepositoryName, RepositoryOwner, Revision, SyncId};

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Where a repository lives on its hosting provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryLocation {
    pub owner: RepositoryOwner,
    pub name: RepositoryName,
}

impl RepositoryLocation {
    pub fn new(owner: RepositoryOwner, name: RepositoryName) -> Self {
        Self { owner, name }
    }

    /// Builds a location from a `"owner/name"` string, splitting at the last `/`.
    ///
    /// Returns `None` if either side is empty.
    pub fn from_full_name(full_name: &str) -> Option<Self> {
        let (owner, name) = full_name.trim_matches('/').rsplit_once('/')?;
        Some(Self {
            owner: RepositoryOwner::new(owner)?,
            name: RepositoryName::new(name)?,
        })
    }

    /// Returns `"owner/name"`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepositoryLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// Push events
// ---------------------------------------------------------------------------

/// The files a push touched, as far as the provider is able to tell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangedFiles {
    /// Files added or modified by the pushed commits, deduplicated, in order
    /// of first appearance.
    Paths(Vec<ManifestPath>),
    /// The payload does not list files; the whole repository must be synced.
    EntireRepository,
}

impl ChangedFiles {
    /// Collects the `added` and `modified` lists of every commit into a
    /// deduplicated [`ChangedFiles::Paths`], preserving first-seen order.
    pub fn from_commit_lists<'a, I, S>(lists: I) -> Self
    where
        I: IntoIterator<Item = &'a [S]>,
        S: AsRef<str> + 'a,
    {
        let mut seen = std::collections::HashSet::new();
        let mut paths = Vec::new();
        for list in lists {
            for file in list {
                let file = file.as_ref();
                if seen.insert(file.to_string()) {
                    if let Some(path) = ManifestPath::new(file) {
                        paths.push(path);
                    }
                }
            }
        }
        Self::Paths(paths)
    }
}

/// A provider-neutral push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub location: RepositoryLocation,
    pub git_ref: GitRef,
    /// Revision the manifests are read at (normally the pushed head commit).
    pub revision: Revision,
    pub changes: ChangedFiles,
}

// ---------------------------------------------------------------------------
// Webhook transport
// ---------------------------------------------------------------------------

/// An inbound webhook delivery, stripped of its HTTP transport.
///
/// Header names are stored lower-cased so lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl WebhookRequest {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            headers: HashMap::new(),
            body,
        }
    }

    /// Adds a header, replacing any previous value for the same name.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert_header(name, value);
        self
    }

    pub fn insert_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Returns the header value, matching the name case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

// ---------------------------------------------------------------------------
// Provider kinds
// ---------------------------------------------------------------------------

/// The Git hosting backends TRIGRA can receive pushes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Github,
    Gitlab,
    Gitea,
    Bitbucket,
    /// Any Git remote, read through a local clone.
    Git,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
            Self::Gitea => "gitea",
            Self::Bitbucket => "bitbucket",
            Self::Git => "git",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = UnknownProviderKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(Self::Github),
            "gitlab" => Ok(Self::Gitlab),
            "gitea" => Ok(Self::Gitea),
            "bitbucket" => Ok(Self::Bitbucket),
            "git" => Ok(Self::Git),
            _ => Err(UnknownProviderKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Apply results
// ---------------------------------------------------------------------------

/// What the applier did with one Kubernetes object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyAction {
    Created,
    Updated,
}

impl std::fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Updated => f.write_str("updated"),
        }
    }
}

/// One object written to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedResource {
    pub kind: String,
    pub name: String,
    /// `None` for cluster-scoped kinds.
    pub namespace: Option<String>,
    pub action: ApplyAction,
}

impl std::fmt::Display for AppliedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} in {} ({})", self.kind, self.name, ns, self.action),
            None => write!(f, "{}/{} ({})", self.kind, self.name, self.action),
        }
    }
}

/// Summary of one sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub sync_id: SyncId,
    pub location: RepositoryLocation,
    pub revision: Revision,
    /// Manifests that were downloaded and applied, in order.
    pub manifests: Vec<ManifestPath>,
    pub applied: Vec<AppliedResource>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

impl SyncReport {
    /// `true` when the push touched no manifests (or was filtered out).
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

/// Result of ensuring the provider delivers push webhooks to TRIGRA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookRegistration {
    Created,
    AlreadyPresent,
    /// The provider has no API for registering webhooks.
    Unsupported,
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_changed_files_dedup_preserves_first_seen_order() {
        let added: Vec<String> = vec!["b.yaml".into(), "a.yaml".into()];
        let modified: Vec<String> = vec!["a.yaml".into(), "c.yml".into()];
        let changes = ChangedFiles::from_commit_lists([added.as_slice(), modified.as_slice()]);

        let expected: Vec<ManifestPath> = ["b.yaml", "a.yaml", "c.yml"]
            .into_iter()
            .filter_map(ManifestPath::new)
            .collect();
        assert_eq!(changes, ChangedFiles::Paths(expected));
    }

    #[test]
    fn test_changed_files_skips_empty_names() {
        let added: Vec<&str> = vec!["", "deploy.yaml"];
        let changes = ChangedFiles::from_commit_lists([added.as_slice()]);
        assert_eq!(
            changes,
            ChangedFiles::Paths(vec![ManifestPath::new("deploy.yaml").unwrap()])
        );
    }

    #[test]
    fn test_webhook_request_headers_are_case_insensitive() {
        let req = WebhookRequest::new(b"{}".to_vec()).with_header("X-GitHub-Event", "push");
        assert_eq!(req.header("x-github-event"), Some("push"));
        assert_eq!(req.header("X-GITHUB-EVENT"), Some("push"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn test_provider_kind_parses_case_insensitively() {
        assert_eq!("GitLab".parse::<ProviderKind>().unwrap(), ProviderKind::Gitlab);
        assert_eq!(" git ".parse::<ProviderKind>().unwrap(), ProviderKind::Git);
        let err = "svn".parse::<ProviderKind>().unwrap_err();
        assert_eq!(err.to_string(), "Unsupported git provider: svn");
    }

    #[test]
    fn test_location_from_full_name_splits_at_last_slash() {
        let loc = RepositoryLocation::from_full_name("group/sub/app").unwrap();
        assert_eq!(loc.owner.as_str(), "group/sub");
        assert_eq!(loc.name.as_str(), "app");
        assert!(RepositoryLocation::from_full_name("noslash").is_none());
        assert!(RepositoryLocation::from_full_name("/app").is_none());
    }

    #[test]
    fn test_applied_resource_display() {
        let r = AppliedResource {
            kind: "Deployment".into(),
            name: "web".into(),
            namespace: Some("prod".into()),
            action: ApplyAction::Created,
        };
        assert_eq!(r.to_string(), "Deployment/web in prod (created)");
    }
}
