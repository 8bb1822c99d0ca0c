//! TRIGRA Git provider infrastructure adapters.
//!
//! Implements the [`gitops::GitProvider`] trait for every supported backend:
//!
//! | Backend | Type | Webhook auth | Changed files |
//! |---------|------|--------------|---------------|
//! | GitHub | [`GithubProvider`] | `X-Hub-Signature-256` HMAC | from payload |
//! | GitLab | [`GitlabProvider`] | `X-Gitlab-Token` | from payload |
//! | Gitea | [`GiteaProvider`] | `X-Gitea-Signature` HMAC | from payload |
//! | Bitbucket Cloud | [`BitbucketProvider`] | `X-Hub-Signature` HMAC | full sync |
//! | Any Git remote | [`PlainGitProvider`] | HMAC or `X-Trigra-Token` | full sync |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, authentication, pagination and payload
//! decoding live here. The [`gitops`] crate sees only [`gitops::GitProvider`].

use std::path::PathBuf;
use std::sync::Arc;

use gitops::{GitProvider, ProviderError, ProviderKind};

pub mod bitbucket;
pub mod git;
pub mod gitea;
pub mod github;
pub mod gitlab;
pub mod signature;

mod http;
mod payload;

pub use bitbucket::BitbucketProvider;
pub use git::PlainGitProvider;
pub use gitea::GiteaProvider;
pub use github::GithubProvider;
pub use gitlab::GitlabProvider;

/// Everything needed to construct any provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    /// API token (GitHub PAT, GitLab token, Gitea token, Bitbucket app password).
    pub token: Option<String>,
    /// API base URL for self-hosted instances.
    pub base_url: Option<String>,
    /// Clone URL; required for [`ProviderKind::Git`].
    pub repo_url: Option<String>,
    pub ssh_key_file: Option<PathBuf>,
    pub bitbucket_user: Option<String>,
    /// Branch the generic Git provider tracks; the remote default when unset.
    pub branch: Option<String>,
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            token: None,
            base_url: None,
            repo_url: None,
            ssh_key_file: None,
            bitbucket_user: None,
            branch: None,
        }
    }
}

/// Builds the provider selected by `settings.kind`.
pub fn build_provider(settings: &ProviderSettings) -> Result<Arc<dyn GitProvider>, ProviderError> {
    let token = settings.token.as_deref();
    let base_url = settings.base_url.as_deref();

    let provider: Arc<dyn GitProvider> = match settings.kind {
        ProviderKind::Github => Arc::new(GithubProvider::new(base_url, token)?),
        ProviderKind::Gitlab => Arc::new(GitlabProvider::new(base_url, token)?),
        ProviderKind::Gitea => {
            let base_url = base_url.ok_or_else(|| ProviderError::Configuration {
                message: "GIT_BASE_URL is required for the gitea provider".to_string(),
            })?;
            Arc::new(GiteaProvider::new(base_url, token)?)
        }
        ProviderKind::Bitbucket => Arc::new(BitbucketProvider::new(
            base_url,
            settings.bitbucket_user.as_deref(),
            token,
        )?),
        ProviderKind::Git => {
            let repo_url = settings
                .repo_url
                .clone()
                .ok_or_else(|| ProviderError::Configuration {
                    message: "GIT_REPO_URL is required for the git provider".to_string(),
                })?;
            let mut provider =
                PlainGitProvider::new(repo_url, settings.ssh_key_file.clone(), None);
            if let Some(branch) = &settings.branch {
                provider = provider.with_branch(branch.clone());
            }
            Arc::new(provider)
        }
    };
    Ok(provider)
}
