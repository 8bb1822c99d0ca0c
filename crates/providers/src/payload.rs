//! Payload fragments and decoding helpers common to several providers.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use gitops::{ChangedFiles, GitRef, ProviderError, Revision};

/// File lists of one pushed commit (GitHub, GitLab and Gitea share this shape).
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CommitFiles {
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
}

/// Union of added and modified files over all commits.
///
/// Removed files are not included: TRIGRA never deletes cluster objects.
pub(crate) fn changed_files(commits: &[CommitFiles]) -> ChangedFiles {
    ChangedFiles::from_commit_lists(
        commits
            .iter()
            .flat_map(|c| [c.added.as_slice(), c.modified.as_slice()]),
    )
}

/// Decodes a JSON webhook body.
pub(crate) fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProviderError> {
    serde_json::from_slice(body).map_err(|e| ProviderError::MalformedPayload {
        message: e.to_string(),
    })
}

/// Returns `true` for the all-zero SHA providers send when a ref is deleted.
pub(crate) fn is_null_sha(sha: &str) -> bool {
    !sha.is_empty() && sha.bytes().all(|b| b == b'0')
}

pub(crate) fn git_ref(value: String) -> Result<GitRef, ProviderError> {
    GitRef::new(value).ok_or_else(|| missing_field("ref"))
}

pub(crate) fn revision(value: String) -> Result<Revision, ProviderError> {
    Revision::new(value).ok_or_else(|| missing_field("after"))
}

pub(crate) fn missing_field(field: &str) -> ProviderError {
    ProviderError::MalformedPayload {
        message: format!("missing or empty field '{field}'"),
    }
}

/// Entry of a recursive tree listing (GitHub, GitLab and Gitea use the same
/// `path` / `type` pair).
#[derive(Debug, Deserialize)]
pub(crate) struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl TreeEntry {
    pub(crate) fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitops::ManifestPath;

    #[test]
    fn test_changed_files_orders_added_before_modified_per_commit() {
        let commits = vec![
            CommitFiles {
                added: vec!["new.yaml".into()],
                modified: vec!["old.yaml".into()],
            },
            CommitFiles {
                added: vec![],
                modified: vec!["new.yaml".into(), "third.yml".into()],
            },
        ];
        let expected: Vec<ManifestPath> = ["new.yaml", "old.yaml", "third.yml"]
            .into_iter()
            .filter_map(ManifestPath::new)
            .collect();
        assert_eq!(changed_files(&commits), ChangedFiles::Paths(expected));
    }

    #[test]
    fn test_null_sha() {
        assert!(is_null_sha("0000000000000000000000000000000000000000"));
        assert!(!is_null_sha("0a00000000000000000000000000000000000000"));
        assert!(!is_null_sha(""));
    }

    #[test]
    fn test_decode_reports_malformed_payload() {
        let err = decode::<serde_json::Value>(b"{not json").unwrap_err();
        assert!(matches!(err, ProviderError::MalformedPayload { .. }));
    }
}
