//! Gitea (and Forgejo) adapter.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use gitops::{
    GitProvider, ManifestPath, ProviderError, ProviderKind, PushEvent, RepositoryLocation,
    RepositoryName, RepositoryOwner, Revision, WebhookRegistration, WebhookRequest,
};

use crate::http::{self, ApiClient, Auth};
use crate::payload::{self, CommitFiles, TreeEntry};
use crate::signature;

const SIGNATURE_HEADER: &str = "X-Gitea-Signature";
const EVENT_HEADER: &str = "X-Gitea-Event";
const PAGE_SIZE: &str = "1000";

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    after: String,
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
    username: Option<String>,
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreePage {
    #[serde(default)]
    tree: Option<Vec<TreeEntry>>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct Hook {
    #[serde(default)]
    config: std::collections::HashMap<String, String>,
}

/// [`GitProvider`] backed by the Gitea REST API v1.
#[derive(Debug)]
pub struct GiteaProvider {
    api: ApiClient,
}

impl GiteaProvider {
    /// Creates a provider for the instance at `base_url`. Gitea has no public
    /// default, so the URL is required.
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, ProviderError> {
        let base = base_url.trim_end_matches('/');
        let api_root = if base.ends_with("/api/v1") {
            base.to_string()
        } else {
            format!("{base}/api/v1")
        };
        let auth = match token {
            Some(t) if !t.is_empty() => Auth::Token(t.to_string()),
            _ => Auth::Anonymous,
        };
        Ok(Self {
            api: ApiClient::new(&api_root, auth)?,
        })
    }

    fn repo_url(&self, location: &RepositoryLocation, rest: &[&str]) -> reqwest::Url {
        let mut segments = vec!["repos", location.owner.as_str(), location.name.as_str()];
        segments.extend_from_slice(rest);
        self.api.url(segments)
    }
}

#[async_trait]
impl GitProvider for GiteaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gitea
    }

    fn validate(&self, request: &WebhookRequest, secret: &str) -> Result<(), ProviderError> {
        if secret.is_empty() {
            return Ok(());
        }
        signature::verify_hmac_sha256(secret, request.body(), request.header(SIGNATURE_HEADER))
    }

    fn parse_push_event(&self, request: &WebhookRequest) -> Result<PushEvent, ProviderError> {
        if let Some(event) = request.header(EVENT_HEADER) {
            if event != "push" {
                return Err(ProviderError::IgnoredEvent {
                    reason: format!("gitea event '{event}'"),
                });
            }
        }

        let push: PushPayload = payload::decode(request.body())?;
        if payload::is_null_sha(&push.after) {
            return Err(ProviderError::IgnoredEvent {
                reason: format!("deletion of {}", push.git_ref),
            });
        }

        let owner = push
            .repository
            .owner
            .username
            .filter(|u| !u.is_empty())
            .or(push.repository.owner.login)
            .and_then(RepositoryOwner::new)
            .ok_or_else(|| payload::missing_field("repository.owner.username"))?;
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
        let mut rest = vec!["raw"];
        rest.extend(path.as_str().split('/'));
        let mut url = self.repo_url(location, &rest);
        url.query_pairs_mut().append_pair("ref", revision.as_str());
        self.api.get_file(url, None, path.as_str()).await
    }

    async fn list_files(
        &self,
        location: &RepositoryLocation,
        revision: &Revision,
    ) -> Result<Vec<ManifestPath>, ProviderError> {
        let mut files = Vec::new();
        let mut page: u32 = 1;
        loop {
            let mut url = self.repo_url(location, &["git", "trees", revision.as_str()]);
            url.query_pairs_mut()
                .append_pair("recursive", "true")
                .append_pair("per_page", PAGE_SIZE)
                .append_pair("page", &page.to_string());

            let tree: TreePage = self.api.get_json(url).await?;
            let entries = tree.tree.unwrap_or_default();
            let fetched = entries.len();
            files.extend(
                entries
                    .into_iter()
                    .filter(TreeEntry::is_blob)
                    .filter_map(|e| ManifestPath::new(e.path)),
            );

            if !tree.truncated || fetched == 0 {
                break;
            }
            page += 1;
        }
        Ok(files)
    }

    async fn setup_webhook(
        &self,
        location: &RepositoryLocation,
        url: &str,
        secret: &str,
    ) -> Result<WebhookRegistration, ProviderError> {
        let mut next = Some(self.repo_url(location, &["hooks"]));
        while let Some(page_url) = next.take() {
            let (hooks, headers): (Vec<Hook>, _) =
                self.api.get_json_with_headers(page_url).await?;
            if hooks
                .iter()
                .any(|h| h.config.get("url").map(String::as_str) == Some(url))
            {
                return Ok(WebhookRegistration::AlreadyPresent);
            }
            next = http::next_link(&headers);
        }

        let body = json!({
            "type": "gitea",
            "config": {
                "url": url,
                "content_type": "json",
                "secret": secret,
            },
            "events": ["push"],
            "active": true,
        });
        self.api
            .post_json(self.repo_url(location, &["hooks"]), &body)
            .await?;
        Ok(WebhookRegistration::Created)
    }
}
