//! GitHub (github.com and GitHub Enterprise Server) adapter.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use gitops::{
    GitProvider, ManifestPath, ProviderError, ProviderKind, PushEvent, RepositoryLocation,
    RepositoryName, RepositoryOwner, Revision, WebhookRegistration, WebhookRequest,
};

use crate::http::{self, ApiClient, Auth};
use crate::payload::{self, CommitFiles, TreeEntry};
use crate::signature;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
const EVENT_HEADER: &str = "X-GitHub-Event";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    after: String,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    commits: Vec<CommitFiles>,
    repository: Repository,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    owner: Owner,
}

#[derive(Debug, Deserialize)]
struct Owner {
    login: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tree {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct Hook {
    #[serde(default)]
    config: HookConfig,
}

#[derive(Debug, Default, Deserialize)]
struct HookConfig {
    url: Option<String>,
}

/// [`GitProvider`] backed by the GitHub REST API.
#[derive(Debug)]
pub struct GithubProvider {
    api: ApiClient,
}

impl GithubProvider {
    /// Creates a provider for `base_url` (defaults to [`DEFAULT_API_URL`]).
    ///
    /// Without a token requests are unauthenticated and subject to GitHub's
    /// lower anonymous rate limits.
    pub fn new(base_url: Option<&str>, token: Option<&str>) -> Result<Self, ProviderError> {
        let auth = match token {
            Some(t) if !t.is_empty() => Auth::Bearer(t.to_string()),
            _ => Auth::Anonymous,
        };
        Ok(Self {
            api: ApiClient::new(base_url.unwrap_or(DEFAULT_API_URL), auth)?,
        })
    }

    fn repo_segments<'a>(location: &'a RepositoryLocation) -> [&'a str; 3] {
        ["repos", location.owner.as_str(), location.name.as_str()]
    }
}

#[async_trait]
impl GitProvider for GithubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Github
    }

    fn validate(&self, request: &WebhookRequest, secret: &str) -> Result<(), ProviderError> {
        if secret.is_empty() {
            return Ok(());
        }
        signature::verify_hmac_sha256(secret, request.body(), request.header(SIGNATURE_HEADER))
    }

    fn parse_push_event(&self, request: &WebhookRequest) -> Result<PushEvent, ProviderError> {
        match request.header(EVENT_HEADER) {
            Some("push") => {}
            Some(other) => {
                return Err(ProviderError::IgnoredEvent {
                    reason: format!("github event '{other}'"),
                })
            }
            None => {
                return Err(ProviderError::IgnoredEvent {
                    reason: format!("missing {EVENT_HEADER} header"),
                })
            }
        }

        let push: PushPayload = payload::decode(request.body())?;
        if push.deleted || payload::is_null_sha(&push.after) {
            return Err(ProviderError::IgnoredEvent {
                reason: format!("deletion of {}", push.git_ref),
            });
        }

        let owner = push
            .repository
            .owner
            .login
            .or(push.repository.owner.name)
            .and_then(RepositoryOwner::new)
            .ok_or_else(|| payload::missing_field("repository.owner.login"))?;
        let name = RepositoryName::new(push.repository.name)
            .ok_or_else(|| payload::missing_field("repository.name"))?;

        Ok(PushEvent {
            location: RepositoryLocation::new(owner, name),
            changes: payload::changed_files(&push.commits),
            git_ref: payload::git_ref(push.git_ref)?,
            revision: payload::revision(push.after)?,
        })
    }

    async fn download_file(
        &self,
        location: &RepositoryLocation,
        revision: &Revision,
        path: &ManifestPath,
    ) -> Result<Vec<u8>, ProviderError> {
        let segments = Self::repo_segments(location)
            .into_iter()
            .chain(["contents"])
            .chain(path.as_str().split('/'));
        let mut url = self.api.url(segments);
        url.query_pairs_mut().append_pair("ref", revision.as_str());
        debug!(%url, "Downloading GitHub file");
        self.api
            .get_file(url, Some(RAW_MEDIA_TYPE), path.as_str())
            .await
    }

    async fn list_files(
        &self,
        location: &RepositoryLocation,
        revision: &Revision,
    ) -> Result<Vec<ManifestPath>, ProviderError> {
        let segments = Self::repo_segments(location)
            .into_iter()
            .chain(["git", "trees", revision.as_str()]);
        let mut url = self.api.url(segments);
        url.query_pairs_mut().append_pair("recursive", "1");

        let tree: Tree = self.api.get_json(url).await?;
        if tree.truncated {
            warn!(
                repository = %location,
                "GitHub truncated the repository tree; some manifests may be skipped"
            );
        }
        Ok(tree
            .tree
            .into_iter()
            .filter(TreeEntry::is_blob)
            .filter_map(|e| ManifestPath::new(e.path))
            .collect())
    }

    async fn setup_webhook(
        &self,
        location: &RepositoryLocation,
        url: &str,
        secret: &str,
    ) -> Result<WebhookRegistration, ProviderError> {
        let hooks_url = self
            .api
            .url(Self::repo_segments(location).into_iter().chain(["hooks"]));

        let mut list_url = hooks_url.clone();
        list_url.query_pairs_mut().append_pair("per_page", "100");
        let mut next = Some(list_url);
        while let Some(page_url) = next.take() {
            let (hooks, headers): (Vec<Hook>, _) =
                self.api.get_json_with_headers(page_url).await?;
            if hooks.iter().any(|h| h.config.url.as_deref() == Some(url)) {
                return Ok(WebhookRegistration::AlreadyPresent);
            }
            next = http::next_link(&headers);
        }

        let body = json!({
            "name": "web",
            "active": true,
            "events": ["push"],
            "config": {
                "url": url,
                "content_type": "json",
                "secret": secret,
                "insecure_ssl": "0",
            },
        });
        self.api.post_json(hooks_url, &body).await?;
        Ok(WebhookRegistration::Created)
    }
}
