//! Newtype domain identifiers.
//!
//! Every name that flows between a Git provider, the sync engine and the
//! cluster is wrapped in its own newtype so that, for example, a
//! [`RepositoryOwner`] cannot be passed where a [`Namespace`] is expected even
//! though both are strings underneath.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: Git hosting
// ---------------------------------------------------------------------------

string_id! {
    /// The account, organisation, workspace or group that owns a repository.
    ///
    /// May contain `/` for GitLab subgroups (e.g. `"platform/infra"`).
    RepositoryOwner
}

string_id! {
    /// The repository name (GitHub/Gitea name, GitLab project path, Bitbucket slug).
    RepositoryName
}

string_id! {
    /// A fully-qualified Git reference as reported by the provider
    /// (e.g. `"refs/heads/main"`, `"refs/tags/v1.2.0"`).
    GitRef
}

string_id! {
    /// The revision manifests are read at: a commit SHA, or `"HEAD"` when the
    /// provider cannot name a commit.
    Revision
}

string_id! {
    /// A file path relative to the repository root, using `/` separators.
    ManifestPath
}

// ---------------------------------------------------------------------------
// Identifiers: Kubernetes
// ---------------------------------------------------------------------------

string_id! {
    /// A Kubernetes namespace name.
    Namespace
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies one sync run triggered by one push event.
///
/// Generated fresh per webhook delivery and attached to every span so that all
/// downloads and applies belonging to the same push can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncId(Uuid);

impl SyncId {
    /// Generates a new random sync identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for SyncId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_id_rejects_empty() {
        assert!(RepositoryOwner::new("").is_none());
        assert!(ManifestPath::new(String::new()).is_none());
    }

    #[test]
    fn test_string_id_display_matches_value() {
        let ns = Namespace::new("kube-system").unwrap();
        assert_eq!(ns.to_string(), "kube-system");
        assert_eq!(ns.as_str(), "kube-system");
    }

    #[test]
    fn test_sync_ids_are_unique() {
        assert_ne!(SyncId::new_random(), SyncId::new_random());
    }
}
