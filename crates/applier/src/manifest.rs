//! Decoding of multi-document YAML manifests into Kubernetes objects.
//!
//! Files are split on `---` separator lines and every document is decoded on
//! its own, so a leading `---`, comments and empty documents behave as
//! `kubectl` users expect. A document with a YAML syntax error, or one that is
//! not a Kubernetes object, is skipped with a warning and the documents after
//! it are still applied.

use kube::core::{DynamicObject, GroupVersionKind};
use serde_yaml::Value;
use tracing::warn;

use gitops::{ApplyError, Namespace};

/// One Kubernetes object decoded from a manifest file.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Zero-based position of the document within its file.
    pub document: usize,
    pub gvk: GroupVersionKind,
    pub object: DynamicObject,
}

impl Manifest {
    pub fn name(&self) -> &str {
        self.object.metadata.name.as_deref().unwrap_or_default()
    }
}

/// Decodes every object in `content`, in document order.
///
/// Only an object that looks like a Kubernetes resource yet cannot be decoded
/// as one is an error.
pub fn parse_manifest(content: &[u8]) -> Result<Vec<Manifest>, ApplyError> {
    let text = std::str::from_utf8(content).map_err(|e| ApplyError::Decode {
        document: 0,
        message: format!("manifest is not valid UTF-8: {e}"),
    })?;
    let mut manifests = Vec::new();

    for (index, document) in split_documents(text).into_iter().enumerate() {
        if is_blank(&document) {
            continue;
        }
        let value: Value = match serde_yaml::from_str(&document) {
            Ok(value) => value,
            Err(e) => {
                warn!(document = index, error = %e, "Skipping invalid YAML document");
                continue;
            }
        };
        if value.is_null() {
            continue;
        }
        let (api_version, kind) = match object_header(&value) {
            Ok(header) => header,
            Err(problem) => {
                warn!(document = index, problem, "Skipping document");
                continue;
            }
        };
        let gvk = group_version_kind(&api_version, &kind);

        let object = serde_json::to_value(&value)
            .and_then(serde_json::from_value::<DynamicObject>)
            .map_err(|e| ApplyError::Decode {
                document: index,
                message: e.to_string(),
            })?;

        manifests.push(Manifest {
            document: index,
            gvk,
            object,
        });
    }

    Ok(manifests)
}

/// Splits a multi-document file on `---` lines. Text after the marker on the
/// same line belongs to the new document. A blank preamble before the first
/// marker is not counted as a document.
fn split_documents(text: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();
    let mut started = false;

    for line in text.lines() {
        match document_start(line) {
            Some(rest) => {
                if started || !is_blank(&current) {
                    documents.push(std::mem::take(&mut current));
                }
                current.clear();
                started = true;
                if !rest.is_empty() {
                    current.push_str(rest);
                    current.push('\n');
                }
            }
            None => {
                current.push_str(line);
                current.push('\n');
            }
        }
    }
    if started || !is_blank(&current) {
        documents.push(current);
    }
    documents
}

/// Remainder of the line when `line` opens a new document.
fn document_start(line: &str) -> Option<&str> {
    let rest = line.trim_end().strip_prefix("---")?;
    if rest.is_empty() {
        Some(rest)
    } else if rest.starts_with([' ', '\t']) {
        Some(rest.trim_start())
    } else {
        None
    }
}

/// `true` when a document holds only whitespace and comments.
fn is_blank(document: &str) -> bool {
    document
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with('#'))
}

/// Extracts `apiVersion` and `kind`, checking the document can name an object.
fn object_header(value: &Value) -> Result<(String, String), &'static str> {
    if !value.is_mapping() {
        return Err("not a mapping");
    }
    let field = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let api_version = field(value.get("apiVersion")).ok_or("missing apiVersion")?;
    let kind = field(value.get("kind")).ok_or("missing kind")?;
    field(value.get("metadata").and_then(|m| m.get("name"))).ok_or("missing metadata.name")?;
    Ok((api_version, kind))
}

/// Splits `apiVersion` into group and version; core resources have no group.
pub fn group_version_kind(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
    GroupVersionKind::gvk(group, version, kind)
}

/// The namespace a namespaced object is applied to.
pub fn resolve_namespace(declared: Option<&str>, default: &Namespace) -> String {
    declared
        .filter(|ns| !ns.is_empty())
        .unwrap_or(default.as_str())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STREAM: &str = r#"---
# web tier
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: prod
spec:
  replicas: 2
---
---
apiVersion: v1
kind: Service
metadata:
  name: web
"#;

    #[test]
    fn test_parse_multi_document_stream() {
        let manifests = parse_manifest(STREAM.as_bytes()).unwrap();
        assert_eq!(manifests.len(), 2);

        assert_eq!(manifests[0].gvk, GroupVersionKind::gvk("apps", "v1", "Deployment"));
        assert_eq!(manifests[0].name(), "web");
        assert_eq!(manifests[0].object.metadata.namespace.as_deref(), Some("prod"));
        assert_eq!(manifests[0].object.data["spec"]["replicas"], 2);

        assert_eq!(manifests[1].gvk, GroupVersionKind::gvk("", "v1", "Service"));
        assert_eq!(manifests[1].document, 2);
    }

    #[test]
    fn test_empty_and_comment_only_files() {
        assert!(parse_manifest(b"").unwrap().is_empty());
        assert!(parse_manifest(b"# nothing here\n").unwrap().is_empty());
    }

    #[test]
    fn test_documents_that_are_not_objects_are_skipped() {
        let content = "- a list\n---\nkind: ConfigMap\nmetadata:\n  name: x\n---\napiVersion: v1\nkind: ConfigMap\nmetadata: {}\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: kept\n";
        let manifests = parse_manifest(content.as_bytes()).unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].name(), "kept");
        assert_eq!(manifests[0].document, 3);
    }

    #[test]
    fn test_syntax_error_skips_only_the_broken_document() {
        let content = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: first\n---\nkey: [unclosed\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: third\n";
        let manifests = parse_manifest(content.as_bytes()).unwrap();
        let names: Vec<&str> = manifests.iter().map(Manifest::name).collect();
        assert_eq!(names, vec!["first", "third"]);
        assert_eq!(manifests[1].document, 2);
    }

    #[test]
    fn test_split_documents() {
        assert_eq!(split_documents("a: 1\n---\nb: 2\n"), vec!["a: 1\n", "b: 2\n"]);
        assert_eq!(
            split_documents("# header\n--- # first\na: 1\n---\n"),
            vec!["# first\na: 1\n", ""]
        );
        assert_eq!(split_documents("key: \"---\"\n----\n"), vec!["key: \"---\"\n----\n"]);
        assert!(split_documents("").is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_a_decode_error() {
        let err = parse_manifest(&[0xff, 0xfe, b'a']).unwrap_err();
        assert!(matches!(err, ApplyError::Decode { document: 0, .. }));
    }

    #[test]
    fn test_malformed_metadata_is_a_decode_error() {
        let content = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  labels: [x]\n";
        let err = parse_manifest(content.as_bytes()).unwrap_err();
        assert!(matches!(err, ApplyError::Decode { document: 0, .. }));
    }

    #[test]
    fn test_typed_object_written_as_yaml() {
        use k8s_openapi::api::core::v1::ConfigMap;
        use kube::core::ObjectMeta;

        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some("settings".into()),
                ..ObjectMeta::default()
            },
            data: Some([("mode".to_string(), "fast".to_string())].into()),
            ..ConfigMap::default()
        };
        let yaml = serde_yaml::to_string(&config_map).unwrap();

        let manifests = parse_manifest(yaml.as_bytes()).unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].gvk, GroupVersionKind::gvk("", "v1", "ConfigMap"));
        assert_eq!(manifests[0].object.data["data"]["mode"], "fast");
    }

    #[test]
    fn test_group_version_kind() {
        let gvk = group_version_kind("networking.k8s.io/v1", "Ingress");
        assert_eq!(gvk.group, "networking.k8s.io");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Ingress");
        assert_eq!(group_version_kind("v1", "Pod").group, "");
    }

    #[test]
    fn test_resolve_namespace() {
        let default = Namespace::new("default").unwrap();
        assert_eq!(resolve_namespace(Some("prod"), &default), "prod");
        assert_eq!(resolve_namespace(Some(""), &default), "default");
        assert_eq!(resolve_namespace(None, &default), "default");
    }
}
