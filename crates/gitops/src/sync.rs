//! Push-driven synchronisation of manifests into the cluster.
//!
//! [`SyncEngine::handle_push`] is the whole GitOps loop for one push: pick the
//! manifests the push touched, download each at the pushed revision and hand
//! it to the [`ResourceApplier`]. Files are processed in order and the first
//! failure stops the run; files removed by the push are left in the cluster.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::{
    ChangedFiles, GitProvider, GitRef, ManifestPath, Namespace, PushEvent, ResourceApplier,
    SyncError, SyncId, SyncReport, Timestamp,
};

/// Returns `true` if `path` names a YAML file (`.yaml` / `.yml`, any case).
pub fn is_manifest_path(path: &ManifestPath) -> bool {
    let lower = path.as_str().to_ascii_lowercase();
    lower.ends_with(".yaml") || lower.ends_with(".yml")
}

/// Keeps only manifest paths, dropping duplicates and preserving order.
pub fn select_manifests<'a, I>(paths: I) -> Vec<ManifestPath>
where
    I: IntoIterator<Item = &'a ManifestPath>,
{
    let mut selected: Vec<ManifestPath> = Vec::new();
    for path in paths {
        if is_manifest_path(path) && !selected.contains(path) {
            selected.push(path.clone());
        }
    }
    selected
}

/// Returns `true` if `git_ref` points at `branch`.
///
/// Accepts both the qualified (`refs/heads/main`) and bare (`main`) forms.
pub fn ref_matches_branch(git_ref: &GitRef, branch: &str) -> bool {
    let r = git_ref.as_str();
    r == branch || r.strip_prefix("refs/heads/") == Some(branch)
}

/// Applies the manifests touched by push events.
pub struct SyncEngine {
    provider: Arc<dyn GitProvider>,
    applier: Arc<dyn ResourceApplier>,
    namespace: Namespace,
    branch: Option<String>,
}

impl SyncEngine {
    /// Creates an engine that places namespaced objects without an explicit
    /// namespace in `namespace`.
    pub fn new(
        provider: Arc<dyn GitProvider>,
        applier: Arc<dyn ResourceApplier>,
        namespace: Namespace,
    ) -> Self {
        Self {
            provider,
            applier,
            namespace,
            branch: None,
        }
    }

    /// Restricts syncing to pushes on `branch`; other refs are acknowledged
    /// and skipped.
    pub fn with_branch_filter(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn provider(&self) -> &Arc<dyn GitProvider> {
        &self.provider
    }

    /// Runs one sync for `event`.
    #[instrument(
        skip(self, event),
        fields(
            sync_id = tracing::field::Empty,
            repository = %event.location,
            git_ref = %event.git_ref,
            revision = %event.revision,
        )
    )]
    pub async fn handle_push(&self, event: &PushEvent) -> Result<SyncReport, SyncError> {
        let sync_id = SyncId::new_random();
        tracing::Span::current().record("sync_id", tracing::field::display(sync_id));
        let started_at = Timestamp::now();

        info!(
            "Processing push event from {} on ref {}",
            event.location, event.git_ref
        );

        let mut report = SyncReport {
            sync_id,
            location: event.location.clone(),
            revision: event.revision.clone(),
            manifests: Vec::new(),
            applied: Vec::new(),
            started_at,
            finished_at: started_at,
        };

        if let Some(branch) = &self.branch {
            if !ref_matches_branch(&event.git_ref, branch) {
                info!(branch = %branch, "Ref does not match configured branch, skipping");
                report.finished_at = Timestamp::now();
                return Ok(report);
            }
        }

        let manifests = match &event.changes {
            ChangedFiles::Paths(paths) => select_manifests(paths),
            ChangedFiles::EntireRepository => {
                let listing = self
                    .provider
                    .list_files(&event.location, &event.revision)
                    .await
                    .map_err(|source| SyncError::ListFiles { source })?;
                select_manifests(&listing)
            }
        };

        if manifests.is_empty() {
            info!("No YAML files found in push event");
            report.finished_at = Timestamp::now();
            return Ok(report);
        }

        info!(
            count = manifests.len(),
            "Found {} YAML file(s) to process: {}",
            manifests.len(),
            manifests
                .iter()
                .map(ManifestPath::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        for path in &manifests {
            let applied = self.process_file(event, path).await?;
            report.applied.extend(applied);
            report.manifests.push(path.clone());
        }

        report.finished_at = Timestamp::now();
        info!(
            manifests = report.manifests.len(),
            resources = report.applied.len(),
            "Sync complete"
        );
        Ok(report)
    }

    async fn process_file(
        &self,
        event: &PushEvent,
        path: &ManifestPath,
    ) -> Result<Vec<crate::AppliedResource>, SyncError> {
        info!(file = %path, "Downloading file");
        let content = self
            .provider
            .download_file(&event.location, &event.revision, path)
            .await
            .map_err(|source| SyncError::Download {
                path: path.clone(),
                source,
            })?;

        info!(file = %path, "Applying resources from file");
        let applied = self
            .applier
            .apply_manifest(&content, &self.namespace)
            .await
            .map_err(|source| SyncError::Apply {
                path: path.clone(),
                source,
            })?;

        for resource in &applied {
            info!(file = %path, resource = %resource, "Applied resource");
        }
        info!(file = %path, "Applied resources from file");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use crate::{
        AppliedResource, ApplyAction, ApplyError, ProviderError, ProviderKind, RepositoryLocation,
        Revision, WebhookRegistration, WebhookRequest,
    };

    /// Fake provider serving files from an in-memory map and recording calls.
    struct FakeProvider {
        files: HashMap<String, Vec<u8>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn new(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(p, c)| (p.to_string(), c.as_bytes().to_vec()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GitProvider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Git
        }

        fn validate(&self, _: &WebhookRequest, _: &str) -> Result<(), ProviderError> {
            Ok(())
        }

        fn parse_push_event(&self, _: &WebhookRequest) -> Result<PushEvent, ProviderError> {
            unreachable!("not used by the engine")
        }

        async fn download_file(
            &self,
            _: &RepositoryLocation,
            revision: &Revision,
            path: &ManifestPath,
        ) -> Result<Vec<u8>, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("download:{}@{}", path, revision));
            self.files
                .get(path.as_str())
                .cloned()
                .ok_or_else(|| ProviderError::NotFound {
                    path: path.to_string(),
                })
        }

        async fn list_files(
            &self,
            _: &RepositoryLocation,
            _: &Revision,
        ) -> Result<Vec<ManifestPath>, ProviderError> {
            self.calls.lock().unwrap().push("list".to_string());
            let mut names: Vec<&String> = self.files.keys().collect();
            names.sort();
            Ok(names.into_iter().filter_map(ManifestPath::new).collect())
        }

        async fn setup_webhook(
            &self,
            _: &RepositoryLocation,
            _: &str,
            _: &str,
        ) -> Result<WebhookRegistration, ProviderError> {
            Ok(WebhookRegistration::Unsupported)
        }
    }

    /// Fake applier: every manifest yields one ConfigMap named after its
    /// content; content `"fail"` is rejected.
    #[derive(Default)]
    struct FakeApplier {
        applied: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ResourceApplier for FakeApplier {
        async fn apply_manifest(
            &self,
            content: &[u8],
            default_namespace: &Namespace,
        ) -> Result<Vec<AppliedResource>, ApplyError> {
            let name = String::from_utf8_lossy(content).to_string();
            if name == "fail" {
                return Err(ApplyError::Api {
                    kind: "ConfigMap".into(),
                    name,
                    message: "forbidden".into(),
                });
            }
            self.applied
                .lock()
                .unwrap()
                .push((name.clone(), default_namespace.to_string()));
            Ok(vec![AppliedResource {
                kind: "ConfigMap".into(),
                name,
                namespace: Some(default_namespace.to_string()),
                action: ApplyAction::Created,
            }])
        }
    }

    fn event(changes: ChangedFiles) -> PushEvent {
        PushEvent {
            location: RepositoryLocation::from_full_name("acme/deploy").unwrap(),
            git_ref: GitRef::new("refs/heads/main").unwrap(),
            revision: Revision::new("abc123").unwrap(),
            changes,
        }
    }

    fn paths(names: &[&str]) -> ChangedFiles {
        ChangedFiles::Paths(names.iter().filter_map(|n| ManifestPath::new(*n)).collect())
    }

    fn engine(provider: Arc<FakeProvider>, applier: Arc<FakeApplier>) -> SyncEngine {
        SyncEngine::new(provider, applier, Namespace::new("apps").unwrap())
    }

    #[test]
    fn test_is_manifest_path_is_case_insensitive() {
        let yes = ["a.yaml", "dir/b.YML", "c.Yaml"];
        let no = ["README.md", "yaml", "d.yaml.bak", "e.json"];
        for p in yes {
            assert!(is_manifest_path(&ManifestPath::new(p).unwrap()), "{p}");
        }
        for p in no {
            assert!(!is_manifest_path(&ManifestPath::new(p).unwrap()), "{p}");
        }
    }

    #[test]
    fn test_ref_matches_branch() {
        let r = GitRef::new("refs/heads/main").unwrap();
        assert!(ref_matches_branch(&r, "main"));
        assert!(ref_matches_branch(&r, "refs/heads/main"));
        assert!(!ref_matches_branch(&r, "dev"));
        let tag = GitRef::new("refs/tags/main").unwrap();
        assert!(!ref_matches_branch(&tag, "main"));
    }

    #[tokio::test]
    async fn test_applies_only_yaml_files_in_order() {
        let provider = Arc::new(FakeProvider::new(&[
            ("b.yaml", "b"),
            ("a.yml", "a"),
            ("notes.md", "md"),
        ]));
        let applier = Arc::new(FakeApplier::default());
        let report = engine(provider.clone(), applier.clone())
            .handle_push(&event(paths(&["b.yaml", "notes.md", "a.yml"])))
            .await
            .unwrap();

        assert_eq!(
            provider.calls(),
            vec!["download:b.yaml@abc123", "download:a.yml@abc123"]
        );
        assert_eq!(
            *applier.applied.lock().unwrap(),
            vec![("b".to_string(), "apps".to_string()), ("a".to_string(), "apps".to_string())]
        );
        assert_eq!(report.manifests.len(), 2);
        assert_eq!(report.applied.len(), 2);
    }

    #[tokio::test]
    async fn test_no_yaml_files_is_a_successful_noop() {
        let provider = Arc::new(FakeProvider::new(&[]));
        let applier = Arc::new(FakeApplier::default());
        let report = engine(provider.clone(), applier)
            .handle_push(&event(paths(&["src/main.rs"])))
            .await
            .unwrap();
        assert!(report.is_empty());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_entire_repository_lists_then_applies() {
        let provider = Arc::new(FakeProvider::new(&[
            ("apps/web.yaml", "web"),
            ("Makefile", "all:"),
            ("apps/db.yml", "db"),
        ]));
        let applier = Arc::new(FakeApplier::default());
        let report = engine(provider.clone(), applier)
            .handle_push(&event(ChangedFiles::EntireRepository))
            .await
            .unwrap();

        assert_eq!(
            provider.calls(),
            vec![
                "list",
                "download:apps/db.yml@abc123",
                "download:apps/web.yaml@abc123"
            ]
        );
        assert_eq!(report.applied.len(), 2);
    }

    #[tokio::test]
    async fn test_first_failure_stops_the_sync() {
        let provider = Arc::new(FakeProvider::new(&[
            ("1.yaml", "one"),
            ("2.yaml", "fail"),
            ("3.yaml", "three"),
        ]));
        let applier = Arc::new(FakeApplier::default());
        let err = engine(provider.clone(), applier.clone())
            .handle_push(&event(paths(&["1.yaml", "2.yaml", "3.yaml"])))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Apply { ref path, .. } if path.as_str() == "2.yaml"));
        assert_eq!(applier.applied.lock().unwrap().len(), 1);
        assert!(!provider.calls().contains(&"download:3.yaml@abc123".to_string()));
    }

    #[tokio::test]
    async fn test_missing_file_reports_download_error() {
        let provider = Arc::new(FakeProvider::new(&[]));
        let applier = Arc::new(FakeApplier::default());
        let err = engine(provider, applier)
            .handle_push(&event(paths(&["gone.yaml"])))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to process file gone.yaml: failed to download file: file not found: gone.yaml"
        );
    }

    #[tokio::test]
    async fn test_branch_filter_skips_other_refs() {
        let provider = Arc::new(FakeProvider::new(&[("a.yaml", "a")]));
        let applier = Arc::new(FakeApplier::default());
        let report = engine(provider.clone(), applier)
            .with_branch_filter("production")
            .handle_push(&event(paths(&["a.yaml"])))
            .await
            .unwrap();
        assert!(report.is_empty());
        assert!(provider.calls().is_empty());
    }
}
