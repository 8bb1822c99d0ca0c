//! GitLab (gitlab.com and self-managed) adapter.
//!
//! Projects are addressed by their URL-encoded `namespace/path`, so groups and
//! subgroups need no extra lookup.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use gitops::{
    GitProvider, ManifestPath, ProviderError, ProviderKind, PushEvent, RepositoryLocation,
    Revision, WebhookRegistration, WebhookRequest,
};

use crate::http::{ApiClient, Auth};
use crate::payload::{self, CommitFiles, TreeEntry};
use crate::signature;

pub const DEFAULT_BASE_URL: &str = "https://gitlab.com";

const TOKEN_HEADER: &str = "X-Gitlab-Token";
const EVENT_HEADER: &str = "X-Gitlab-Event";
const PUSH_EVENTS: [&str; 2] = ["Push Hook", "Tag Push Hook"];
const PUSH_KINDS: [&str; 2] = ["push", "tag_push"];
const PAGE_SIZE: &str = "100";

#[derive(Debug, Deserialize)]
struct PushPayload {
    object_kind: Option<String>,
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    after: String,
    #[serde(default)]
    commits: Vec<CommitFiles>,
    project: Project,
}

#[derive(Debug, Deserialize)]
struct Project {
    path_with_namespace: String,
}

#[derive(Debug, Deserialize)]
struct Hook {
    url: Option<String>,
}

/// [`GitProvider`] backed by the GitLab REST API v4.
#[derive(Debug)]
pub struct GitlabProvider {
    api: ApiClient,
}

impl GitlabProvider {
    /// Creates a provider for the instance at `base_url` (defaults to
    /// [`DEFAULT_BASE_URL`]). The `/api/v4` suffix is added here.
    pub fn new(base_url: Option<&str>, token: Option<&str>) -> Result<Self, ProviderError> {
        let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
        let api_root = if base.ends_with("/api/v4") {
            base.to_string()
        } else {
            format!("{base}/api/v4")
        };
        let auth = match token {
            Some(t) if !t.is_empty() => Auth::Header {
                name: "PRIVATE-TOKEN",
                value: t.to_string(),
            },
            _ => Auth::Anonymous,
        };
        Ok(Self {
            api: ApiClient::new(&api_root, auth)?,
        })
    }

    fn project_url(&self, location: &RepositoryLocation, rest: &[&str]) -> reqwest::Url {
        let id = location.full_name();
        let mut segments: Vec<&str> = vec!["projects", &id];
        segments.extend_from_slice(rest);
        self.api.url(segments)
    }
}

#[async_trait]
impl GitProvider for GitlabProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gitlab
    }

    fn validate(&self, request: &WebhookRequest, secret: &str) -> Result<(), ProviderError> {
        if secret.is_empty() {
            return Ok(());
        }
        signature::verify_token(secret, request.header(TOKEN_HEADER))
    }

    fn parse_push_event(&self, request: &WebhookRequest) -> Result<PushEvent, ProviderError> {
        if let Some(event) = request.header(EVENT_HEADER) {
            if !PUSH_EVENTS.contains(&event) {
                return Err(ProviderError::IgnoredEvent {
                    reason: format!("gitlab event '{event}'"),
                });
            }
        }

        let push: PushPayload = payload::decode(request.body())?;
        // Some payloads don't set object_kind but are still push events.
        if let Some(kind) = push.object_kind.as_deref().filter(|k| !k.is_empty()) {
            if !PUSH_KINDS.contains(&kind) {
                return Err(ProviderError::IgnoredEvent {
                    reason: format!("gitlab object kind '{kind}'"),
                });
            }
        }
        if payload::is_null_sha(&push.after) {
            return Err(ProviderError::IgnoredEvent {
                reason: format!("deletion of {}", push.git_ref),
            });
        }

        let location = RepositoryLocation::from_full_name(&push.project.path_with_namespace)
            .ok_or_else(|| payload::missing_field("project.path_with_namespace"))?;

        Ok(PushEvent {
            location,
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
        let mut url = self.project_url(location, &["repository", "files", path.as_str(), "raw"]);
        url.query_pairs_mut().append_pair("ref", revision.as_str());
        self.api.get_file(url, None, path.as_str()).await
    }

    async fn list_files(
        &self,
        location: &RepositoryLocation,
        revision: &Revision,
    ) -> Result<Vec<ManifestPath>, ProviderError> {
        let mut files = Vec::new();
        let mut page = String::from("1");
        loop {
            let mut url = self.project_url(location, &["repository", "tree"]);
            url.query_pairs_mut()
                .append_pair("ref", revision.as_str())
                .append_pair("recursive", "true")
                .append_pair("per_page", PAGE_SIZE)
                .append_pair("page", &page);

            let (entries, headers): (Vec<TreeEntry>, _) =
                self.api.get_json_with_headers(url).await?;
            files.extend(
                entries
                    .into_iter()
                    .filter(TreeEntry::is_blob)
                    .filter_map(|e| ManifestPath::new(e.path)),
            );

            match next_page(&headers) {
                Some(next) => page = next,
                None => break,
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
        let mut page = String::from("1");
        loop {
            let mut list_url = self.project_url(location, &["hooks"]);
            list_url
                .query_pairs_mut()
                .append_pair("per_page", PAGE_SIZE)
                .append_pair("page", &page);
            let (hooks, headers): (Vec<Hook>, _) =
                self.api.get_json_with_headers(list_url).await?;
            if hooks.iter().any(|h| h.url.as_deref() == Some(url)) {
                return Ok(WebhookRegistration::AlreadyPresent);
            }
            match next_page(&headers) {
                Some(next) => page = next,
                None => break,
            }
        }

        let body = json!({
            "url": url,
            "push_events": true,
            "token": secret,
        });
        self.api
            .post_json(self.project_url(location, &["hooks"]), &body)
            .await?;
        Ok(WebhookRegistration::Created)
    }
}

/// Reads GitLab's `X-Next-Page` pagination header; empty on the last page.
fn next_page(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get("x-next-page")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    const PUSH: &str = r#"{
        "object_kind": "push",
        "ref": "refs/heads/main",
        "after": "da1560886d4f094c3e6c9ef40349f7d38b5d27d7",
        "project": { "path_with_namespace": "platform/infra/manifests" },
        "commits": [
            { "added": ["apps/api.yml"], "modified": [], "removed": [] }
        ]
    }"#;

    fn provider() -> GitlabProvider {
        GitlabProvider::new(None, Some("glpat-test")).unwrap()
    }

    fn request(event: &str) -> WebhookRequest {
        WebhookRequest::new(PUSH.as_bytes().to_vec())
            .with_header(EVENT_HEADER, event)
            .with_header(TOKEN_HEADER, "hook-secret")
    }

    #[test]
    fn test_validate_compares_token() {
        assert!(provider().validate(&request("Push Hook"), "hook-secret").is_ok());
        assert_eq!(
            provider().validate(&request("Push Hook"), "different"),
            Err(ProviderError::InvalidSignature)
        );
        let no_token = WebhookRequest::new(Vec::new());
        assert_eq!(
            provider().validate(&no_token, "hook-secret"),
            Err(ProviderError::MissingSignature)
        );
    }

    #[test]
    fn test_parse_push_event_with_subgroups() {
        let event = provider().parse_push_event(&request("Push Hook")).unwrap();
        assert_eq!(event.location.owner.as_str(), "platform/infra");
        assert_eq!(event.location.name.as_str(), "manifests");
        assert_eq!(
            event.changes,
            gitops::ChangedFiles::Paths(vec![ManifestPath::new("apps/api.yml").unwrap()])
        );
    }

    #[test]
    fn test_tag_push_is_accepted() {
        let body = PUSH.replace("\"push\"", "\"tag_push\"");
        let req = WebhookRequest::new(body.into_bytes()).with_header(EVENT_HEADER, "Tag Push Hook");
        assert!(provider().parse_push_event(&req).is_ok());
    }

    #[test]
    fn test_other_events_are_ignored() {
        let err = provider()
            .parse_push_event(&request("Merge Request Hook"))
            .unwrap_err();
        assert!(err.is_ignored_event());

        let body = PUSH.replace("\"push\"", "\"merge_request\"");
        let req = WebhookRequest::new(body.into_bytes());
        assert!(provider().parse_push_event(&req).unwrap_err().is_ignored_event());
    }

    #[test]
    fn test_missing_object_kind_is_treated_as_push() {
        let body = PUSH.replace("\"object_kind\": \"push\",", "");
        let req = WebhookRequest::new(body.into_bytes());
        assert!(provider().parse_push_event(&req).is_ok());
    }

    #[test]
    fn test_api_root_is_appended_once() {
        let a = GitlabProvider::new(Some("https://git.example.com/"), None).unwrap();
        let b = GitlabProvider::new(Some("https://git.example.com/api/v4"), None).unwrap();
        let loc = RepositoryLocation::from_full_name("g/r").unwrap();
        assert_eq!(
            a.project_url(&loc, &["hooks"]).as_str(),
            "https://git.example.com/api/v4/projects/g%2Fr/hooks"
        );
        assert_eq!(a.project_url(&loc, &["hooks"]), b.project_url(&loc, &["hooks"]));
    }

    #[test]
    fn test_next_page_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(next_page(&headers), None);
        headers.insert("x-next-page", HeaderValue::from_static(""));
        assert_eq!(next_page(&headers), None);
        headers.insert("x-next-page", HeaderValue::from_static("3"));
        assert_eq!(next_page(&headers), Some("3".to_string()));
    }

    mod api {
        use super::*;
        use wiremock::matchers::{body_partial_json, header, method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        const PROJECT: &str = "/api/v4/projects/platform%2Fmanifests";

        fn location() -> RepositoryLocation {
            RepositoryLocation::from_full_name("platform/manifests").unwrap()
        }

        fn revision() -> Revision {
            Revision::new("da15608").unwrap()
        }

        async fn provider(server: &MockServer) -> GitlabProvider {
            GitlabProvider::new(Some(&server.uri()), Some("glpat-test")).unwrap()
        }

        #[tokio::test]
        async fn test_download_file_encodes_path() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(format!("{PROJECT}/repository/files/apps%2Fapi.yml/raw")))
                .and(query_param("ref", "da15608"))
                .and(header("PRIVATE-TOKEN", "glpat-test"))
                .respond_with(ResponseTemplate::new(200).set_body_string("kind: Deployment\n"))
                .expect(1)
                .mount(&server)
                .await;

            let content = provider(&server)
                .await
                .download_file(&location(), &revision(), &ManifestPath::new("apps/api.yml").unwrap())
                .await
                .unwrap();
            assert_eq!(content, b"kind: Deployment\n");
        }

        #[tokio::test]
        async fn test_list_files_follows_next_page_header() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(format!("{PROJECT}/repository/tree")))
                .and(query_param("page", "1"))
                .and(query_param("recursive", "true"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("X-Next-Page", "2")
                        .set_body_json(json!([
                            { "path": "apps", "type": "tree" },
                            { "path": "apps/api.yml", "type": "blob" }
                        ])),
                )
                .expect(1)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(format!("{PROJECT}/repository/tree")))
                .and(query_param("page", "2"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("X-Next-Page", "")
                        .set_body_json(json!([{ "path": "apps/web.yml", "type": "blob" }])),
                )
                .expect(1)
                .mount(&server)
                .await;

            let files = provider(&server)
                .await
                .list_files(&location(), &revision())
                .await
                .unwrap();
            assert_eq!(
                files,
                vec![
                    ManifestPath::new("apps/api.yml").unwrap(),
                    ManifestPath::new("apps/web.yml").unwrap()
                ]
            );
        }

        #[tokio::test]
        async fn test_setup_webhook_creates_hook_after_scanning_all_pages() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(format!("{PROJECT}/hooks")))
                .and(query_param("page", "1"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("X-Next-Page", "2")
                        .set_body_json(json!([{ "id": 1, "url": "https://ci.example.com/hook" }])),
                )
                .expect(1)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(format!("{PROJECT}/hooks")))
                .and(query_param("page", "2"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
                .expect(1)
                .mount(&server)
                .await;
            Mock::given(method("POST"))
                .and(path(format!("{PROJECT}/hooks")))
                .and(body_partial_json(json!({
                    "url": "https://trigra.example.com/webhook",
                    "push_events": true,
                    "token": "hook-secret"
                })))
                .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 2 })))
                .expect(1)
                .mount(&server)
                .await;

            let outcome = provider(&server)
                .await
                .setup_webhook(&location(), "https://trigra.example.com/webhook", "hook-secret")
                .await
                .unwrap();
            assert_eq!(outcome, WebhookRegistration::Created);
        }

        #[tokio::test]
        async fn test_setup_webhook_detects_existing_hook() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(format!("{PROJECT}/hooks")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                    { "id": 1, "url": "https://trigra.example.com/webhook" }
                ])))
                .mount(&server)
                .await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(201))
                .expect(0)
                .mount(&server)
                .await;

            let outcome = provider(&server)
                .await
                .setup_webhook(&location(), "https://trigra.example.com/webhook", "hook-secret")
                .await
                .unwrap();
            assert_eq!(outcome, WebhookRegistration::AlreadyPresent);
        }
    }
}
