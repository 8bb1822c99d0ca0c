//! Inference of a [`RepositoryLocation`] from a clone URL.

use crate::{RepositoryLocation, RepositoryName, RepositoryOwner};

/// Extracts owner and repository name from a Git clone URL.
///
/// Accepted forms:
///
/// - `https://host/owner/repo(.git)` (also `http://`, `ssh://`, `git://`)
/// - `user@host:owner/repo(.git)` (scp-like SSH)
///
/// Nested owners (GitLab subgroups) are kept whole: everything between the
/// host and the last path segment is the owner. Returns `None` when the URL
/// does not name both an owner and a repository.
pub fn parse_repository_url(url: &str) -> Option<RepositoryLocation> {
    let url = url.trim();

    let path = if let Some((_, rest)) = url.split_once("://") {
        // Drop the authority (host, optional credentials and port).
        let (_, path) = rest.split_once('/')?;
        path
    } else if url.contains('@') && url.contains(':') {
        let (_, path) = url.split_once(':')?;
        path
    } else {
        return None;
    };

    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);

    let (owner, name) = path.rsplit_once('/')?;
    Some(RepositoryLocation::new(
        RepositoryOwner::new(owner.trim_matches('/'))?,
        RepositoryName::new(name)?,
    ))
}
