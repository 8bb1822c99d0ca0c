//! Generic Git adapter working from a local clone.
//!
//! Any Git remote reachable over HTTPS or SSH can be used. There is no
//! provider webhook format to decode: every authenticated delivery means
//! "sync the tracked branch" (the remote's default branch unless one is
//! configured), and the repository is read through a working copy kept in a
//! private directory for the lifetime of the process.
//!
//! Git itself is driven through the `git` command-line tool.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use gitops::{
    parse_repository_url, ChangedFiles, GitProvider, ManifestPath, ProviderError, ProviderKind,
    PushEvent, RepositoryLocation, Revision, WebhookRegistration, WebhookRequest,
};

use crate::payload;
use crate::signature;

const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
const TOKEN_HEADER: &str = "X-Trigra-Token";

/// Symbolic revision meaning "the tip of the tracked branch".
pub const HEAD: &str = "HEAD";

/// Ref reported for pushes when no branch is configured.
const DEFAULT_REF: &str = "refs/heads/main";

/// [`GitProvider`] that clones the repository locally.
#[derive(Debug)]
pub struct PlainGitProvider {
    repo_url: String,
    ssh_key_file: Option<PathBuf>,
    branch: Option<String>,
    work_dir: PathBuf,
    /// Revision currently checked out, if any. Also serialises git commands.
    checkout: Mutex<Option<String>>,
}

impl PlainGitProvider {
    /// Creates a provider for `repo_url`, keeping its working copy in a fresh
    /// directory below `base_dir` (the system temp directory when `None`).
    pub fn new(
        repo_url: impl Into<String>,
        ssh_key_file: Option<PathBuf>,
        base_dir: Option<&Path>,
    ) -> Self {
        let base = base_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        Self {
            repo_url: repo_url.into(),
            ssh_key_file,
            branch: None,
            work_dir: base.join(format!("trigra-git-{}", Uuid::new_v4())),
            checkout: Mutex::new(None),
        }
    }

    /// Tracks `branch` instead of the remote's default branch.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into()).filter(|b| !b.is_empty());
        self
    }

    /// Ref reported in push events, so branch filters see the tracked branch.
    fn tracked_ref(&self) -> String {
        match &self.branch {
            Some(branch) => format!("refs/heads/{branch}"),
            None => DEFAULT_REF.to_string(),
        }
    }

    /// Remote-tracking ref that [`HEAD`] resolves to.
    fn checkout_target(&self) -> String {
        match &self.branch {
            Some(branch) => format!("origin/{branch}"),
            None => "origin/HEAD".to_string(),
        }
    }

    fn repo_dir(&self) -> PathBuf {
        self.work_dir.join("repo")
    }

    /// Owner and name inferred from the clone URL, or `generic/repo` for
    /// local paths and other URLs without an owner.
    fn location(&self) -> Result<RepositoryLocation, ProviderError> {
        parse_repository_url(&self.repo_url)
            .or_else(|| RepositoryLocation::from_full_name("generic/repo"))
            .ok_or_else(|| payload::missing_field("repository"))
    }

    fn ssh_command(&self) -> Result<Option<String>, ProviderError> {
        let Some(key) = &self.ssh_key_file else {
            return Ok(None);
        };
        if !key.is_file() {
            return Err(ProviderError::Configuration {
                message: format!("SSH key file not found: {}", key.display()),
            });
        }
        Ok(Some(format!(
            "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
            shell_quote(&key.to_string_lossy())
        )))
    }

    async fn run_git(&self, args: &[&str]) -> Result<String, ProviderError> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ssh) = self.ssh_command()? {
            cmd.env("GIT_SSH_COMMAND", ssh);
        }

        debug!(?args, "Running git");
        let output = cmd.output().await.map_err(|e| ProviderError::Git {
            message: format!("failed to run git: {e}"),
        })?;
        if !output.status.success() {
            return Err(ProviderError::Git {
                message: format!(
                    "git {} failed: {}",
                    args.first().copied().unwrap_or_default(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Clones or fetches, then checks out `revision`. The caller holds the
    /// checkout lock.
    async fn refresh(&self, checkout: &mut Option<String>, revision: &str) -> Result<(), ProviderError> {
        let repo_dir = self.repo_dir();
        let repo = repo_dir.to_string_lossy().into_owned();

        if repo_dir.join(".git").is_dir() {
            self.run_git(&["-C", &repo, "fetch", "--quiet", "--prune", "origin"])
                .await?;
        } else {
            tokio::fs::create_dir_all(&self.work_dir)
                .await
                .map_err(|e| ProviderError::Git {
                    message: format!("failed to create {}: {e}", self.work_dir.display()),
                })?;
            info!(url = %self.repo_url, "Cloning repository");
            self.run_git(&["clone", "--quiet", &self.repo_url, &repo]).await?;
        }

        let target = if revision == HEAD {
            self.checkout_target()
        } else {
            revision.to_string()
        };
        self.run_git(&["-C", &repo, "checkout", "--quiet", "--force", "--detach", &target])
            .await?;
        *checkout = Some(revision.to_string());
        Ok(())
    }
}

#[async_trait]
impl GitProvider for PlainGitProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Git
    }

    /// Accepts a GitHub-style `X-Hub-Signature-256` when present, otherwise
    /// requires the secret verbatim in `X-Trigra-Token`.
    fn validate(&self, request: &WebhookRequest, secret: &str) -> Result<(), ProviderError> {
        if secret.is_empty() {
            return Ok(());
        }
        match request.header(SIGNATURE_HEADER) {
            Some(sig) => signature::verify_hmac_sha256(secret, request.body(), Some(sig)),
            None => signature::verify_token(secret, request.header(TOKEN_HEADER)),
        }
    }

    fn parse_push_event(&self, _request: &WebhookRequest) -> Result<PushEvent, ProviderError> {
        Ok(PushEvent {
            location: self.location()?,
            git_ref: payload::git_ref(self.tracked_ref())?,
            revision: payload::revision(HEAD.to_string())?,
            changes: ChangedFiles::EntireRepository,
        })
    }

    async fn download_file(
        &self,
        _location: &RepositoryLocation,
        revision: &Revision,
        path: &ManifestPath,
    ) -> Result<Vec<u8>, ProviderError> {
        let relative = sanitize_path(path)?;
        let mut checkout = self.checkout.lock().await;
        if checkout.as_deref() != Some(revision.as_str()) {
            self.refresh(&mut checkout, revision.as_str()).await?;
        }

        let full = self.repo_dir().join(relative);
        tokio::fs::read(&full).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProviderError::NotFound {
                path: path.to_string(),
            },
            _ => ProviderError::Git {
                message: format!("failed to read {}: {e}", full.display()),
            },
        })
    }

    /// Always refreshes the working copy first, so a new push to the same
    /// symbolic revision picks up new commits.
    async fn list_files(
        &self,
        _location: &RepositoryLocation,
        revision: &Revision,
    ) -> Result<Vec<ManifestPath>, ProviderError> {
        let mut checkout = self.checkout.lock().await;
        self.refresh(&mut checkout, revision.as_str()).await?;

        let repo = self.repo_dir().to_string_lossy().into_owned();
        let listing = self
            .run_git(&["-C", &repo, "ls-tree", "-r", "--name-only", "-z", "HEAD"])
            .await?;
        Ok(listing
            .split('\0')
            .filter_map(ManifestPath::new)
            .collect())
    }

    async fn setup_webhook(
        &self,
        _location: &RepositoryLocation,
        _url: &str,
        _secret: &str,
    ) -> Result<WebhookRegistration, ProviderError> {
        Ok(WebhookRegistration::Unsupported)
    }
}

impl Drop for PlainGitProvider {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.work_dir);
    }
}

/// Turns a repository path into a relative filesystem path, rejecting
/// anything that could leave the working copy.
fn sanitize_path(path: &ManifestPath) -> Result<PathBuf, ProviderError> {
    let mut clean = PathBuf::new();
    for component in Path::new(path.as_str()).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ProviderError::PathTraversal {
                    path: path.to_string(),
                })
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(ProviderError::NotFound {
            path: path.to_string(),
        });
    }
    Ok(clean)
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
