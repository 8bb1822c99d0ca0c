//! Bitbucket Cloud adapter.
//!
//! Bitbucket push payloads do not list changed files, so every push triggers a
//! full sync of the repository at the pushed commit.

use std::collections::VecDeque;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;

use gitops::{
    ChangedFiles, GitProvider, ManifestPath, ProviderError, ProviderKind, PushEvent,
    RepositoryLocation, Revision, WebhookRegistration, WebhookRequest,
};

use crate::http::{ApiClient, Auth};
use crate::payload;
use crate::signature;

pub const DEFAULT_API_URL: &str = "https://api.bitbucket.org/2.0";

const SIGNATURE_HEADER: &str = "X-Hub-Signature";
const EVENT_HEADER: &str = "X-Event-Key";
const PAGE_SIZE: &str = "100";

#[derive(Debug, Deserialize)]
struct PushPayload {
    push: Push,
    repository: Repository,
}

#[derive(Debug, Deserialize)]
struct Push {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    new: Option<RefState>,
}

#[derive(Debug, Deserialize)]
struct RefState {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    target: Target,
}

#[derive(Debug, Deserialize)]
struct Target {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
}

/// One page of a Bitbucket paginated listing.
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

#[derive(Debug, Deserialize)]
struct Hook {
    url: Option<String>,
}

/// [`GitProvider`] backed by the Bitbucket Cloud REST API 2.0.
#[derive(Debug)]
pub struct BitbucketProvider {
    api: ApiClient,
}

impl BitbucketProvider {
    /// Creates a provider authenticating as `user` with an app password, or
    /// with a repository/workspace access token when no user is given.
    pub fn new(
        base_url: Option<&str>,
        user: Option<&str>,
        token: Option<&str>,
    ) -> Result<Self, ProviderError> {
        let auth = match (user.filter(|u| !u.is_empty()), token.filter(|t| !t.is_empty())) {
            (Some(user), Some(password)) => Auth::Basic {
                user: user.to_string(),
                password: password.to_string(),
            },
            (None, Some(token)) => Auth::Bearer(token.to_string()),
            _ => Auth::Anonymous,
        };
        Ok(Self {
            api: ApiClient::new(base_url.unwrap_or(DEFAULT_API_URL), auth)?,
        })
    }

    fn repo_url(&self, location: &RepositoryLocation, rest: &[&str]) -> Url {
        let mut segments = vec![
            "repositories",
            location.owner.as_str(),
            location.name.as_str(),
        ];
        segments.extend_from_slice(rest);
        self.api.url(segments)
    }

    /// URL listing the directory `dir` ("" for the root) at `revision`.
    fn src_dir_url(&self, location: &RepositoryLocation, revision: &Revision, dir: &str) -> Url {
        let mut rest = vec!["src", revision.as_str()];
        rest.extend(dir.split('/').filter(|s| !s.is_empty()));
        // Trailing slash selects the directory listing.
        rest.push("");
        let mut url = self.repo_url(location, &rest);
        url.query_pairs_mut().append_pair("pagelen", PAGE_SIZE);
        url
    }
}

/// Maps a Bitbucket ref type and name onto a fully-qualified Git ref.
fn qualified_ref(kind: &str, name: &str) -> String {
    match kind {
        "branch" | "named_branch" => format!("refs/heads/{name}"),
        "tag" | "annotated_tag" => format!("refs/tags/{name}"),
        _ => name.to_string(),
    }
}

/// Parses the `next` link of a paginated response.
fn next_page_url(next: Option<String>) -> Result<Option<Url>, ProviderError> {
    next.map(|link| {
        Url::parse(&link).map_err(|e| ProviderError::MalformedPayload {
            message: format!("invalid pagination link '{link}': {e}"),
        })
    })
    .transpose()
}

#[async_trait]
impl GitProvider for BitbucketProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Bitbucket
    }

    fn validate(&self, request: &WebhookRequest, secret: &str) -> Result<(), ProviderError> {
        if secret.is_empty() {
            return Ok(());
        }
        signature::verify_hmac_sha256(secret, request.body(), request.header(SIGNATURE_HEADER))
    }

    fn parse_push_event(&self, request: &WebhookRequest) -> Result<PushEvent, ProviderError> {
        match request.header(EVENT_HEADER) {
            Some("repo:push") => {}
            other => {
                return Err(ProviderError::IgnoredEvent {
                    reason: format!("bitbucket event '{}'", other.unwrap_or_default()),
                })
            }
        }

        let push: PushPayload = payload::decode(request.body())?;
        let new_state = push
            .push
            .changes
            .into_iter()
            .find_map(|c| c.new)
            .ok_or_else(|| ProviderError::IgnoredEvent {
                reason: "push without a new ref state (deletion)".to_string(),
            })?;

        let location = RepositoryLocation::from_full_name(&push.repository.full_name)
            .ok_or_else(|| payload::missing_field("repository.full_name"))?;

        Ok(PushEvent {
            location,
            git_ref: payload::git_ref(qualified_ref(&new_state.kind, &new_state.name))?,
            revision: payload::revision(new_state.target.hash)?,
            changes: ChangedFiles::EntireRepository,
        })
    }

    async fn download_file(
        &self,
        location: &RepositoryLocation,
        revision: &Revision,
        path: &ManifestPath,
    ) -> Result<Vec<u8>, ProviderError> {
        let mut rest = vec!["src", revision.as_str()];
        rest.extend(path.as_str().split('/'));
        let url = self.repo_url(location, &rest);
        self.api.get_file(url, None, path.as_str()).await
    }

    async fn list_files(
        &self,
        location: &RepositoryLocation,
        revision: &Revision,
    ) -> Result<Vec<ManifestPath>, ProviderError> {
        let mut files = Vec::new();
        let mut pending: VecDeque<String> = VecDeque::from([String::new()]);

        while let Some(dir) = pending.pop_front() {
            let mut next = Some(self.src_dir_url(location, revision, &dir));
            while let Some(url) = next.take() {
                let page: Page<SourceEntry> = self.api.get_json(url).await?;
                for entry in page.values {
                    match entry.kind.as_str() {
                        "commit_directory" => pending.push_back(entry.path),
                        "commit_file" => files.extend(ManifestPath::new(entry.path)),
                        _ => {}
                    }
                }
                next = next_page_url(page.next)?;
            }
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
            let hooks: Page<Hook> = self.api.get_json(page_url).await?;
            if hooks.values.iter().any(|h| h.url.as_deref() == Some(url)) {
                return Ok(WebhookRegistration::AlreadyPresent);
            }
            next = next_page_url(hooks.next)?;
        }

        let body = json!({
            "description": "TRIGRA GitOps",
            "url": url,
            "active": true,
            "events": ["repo:push"],
            "secret": secret,
        });
        self.api
            .post_json(self.repo_url(location, &["hooks"]), &body)
            .await?;
        Ok(WebhookRegistration::Created)
    }
}
