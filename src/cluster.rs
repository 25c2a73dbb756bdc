//! Narrow cluster-client interface for applying release manifests
//!
//! Release manifests reference arbitrary kinds, so everything here goes
//! through `Api<DynamicObject>` with an `ApiResource` derived from the
//! object's `apiVersion` and `kind` rather than typed APIs.

use async_trait::async_trait;
use kube::api::{DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::{Api, Client};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("invalid manifest object: {0}")]
    InvalidObject(String),
}

impl ClusterError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::Api(kube::Error::Api(ae)) if ae.code == 409)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::Api(kube::Error::Api(ae)) if ae.code == 404)
    }
}

/// One object from a release manifest, ready to be applied.
#[derive(Debug, Clone)]
pub struct ResourceObject {
    pub api_resource: ApiResource,
    pub name: String,
    pub namespace: Option<String>,
    pub object: serde_json::Value,
}

/// The cluster operations the release engine needs. Shared across all
/// reconcilers, so implementations must be safe for concurrent use.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create(&self, obj: &ResourceObject) -> Result<(), ClusterError>;

    /// Merge-patch with the full marshaled object as the patch body. The
    /// caller never computes a diff; the server keeps any immutable fields it
    /// injected (e.g. `clusterIP`).
    async fn merge_patch(&self, obj: &ResourceObject) -> Result<(), ClusterError>;

    async fn delete(&self, obj: &ResourceObject) -> Result<(), ClusterError>;
}

/// `ClusterClient` backed by a shared kube client.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, obj: &ResourceObject) -> Api<DynamicObject> {
        match &obj.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &obj.api_resource),
            None => Api::all_with(self.client.clone(), &obj.api_resource),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create(&self, obj: &ResourceObject) -> Result<(), ClusterError> {
        let dynamic: DynamicObject = serde_json::from_value(obj.object.clone())
            .map_err(|e| ClusterError::InvalidObject(e.to_string()))?;
        self.api(obj).create(&PostParams::default(), &dynamic).await?;
        Ok(())
    }

    async fn merge_patch(&self, obj: &ResourceObject) -> Result<(), ClusterError> {
        self.api(obj)
            .patch(&obj.name, &PatchParams::default(), &Patch::Merge(&obj.object))
            .await?;
        Ok(())
    }

    async fn delete(&self, obj: &ResourceObject) -> Result<(), ClusterError> {
        self.api(obj).delete(&obj.name, &DeleteParams::default()).await?;
        Ok(())
    }
}

/// Split a multi-document manifest into the objects it describes, in order.
/// Empty documents are skipped; objects without a namespace get
/// `default_namespace` unless their kind is cluster-scoped.
pub fn build_unstructured(
    default_namespace: &str,
    manifest: &str,
) -> Result<Vec<ResourceObject>, ClusterError> {
    let mut objects = Vec::new();
    for doc in split_manifest_documents(manifest) {
        if doc.trim().is_empty() {
            continue;
        }
        let value: serde_yaml::Value = serde_yaml::from_str(&doc)
            .map_err(|e| ClusterError::InvalidObject(e.to_string()))?;
        if value.is_null() {
            continue;
        }
        let json = serde_json::to_value(&value)
            .map_err(|e| ClusterError::InvalidObject(e.to_string()))?;
        if json.as_object().is_some_and(|m| m.is_empty()) {
            continue;
        }

        let api_version = json
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ClusterError::InvalidObject("missing apiVersion".into()))?
            .to_string();
        let kind = json
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ClusterError::InvalidObject("missing kind".into()))?
            .to_string();
        let name = json
            .pointer("/metadata/name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ClusterError::InvalidObject("missing metadata.name".into()))?
            .to_string();
        let namespace = json
            .pointer("/metadata/namespace")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                if is_cluster_scoped(&kind) {
                    None
                } else {
                    Some(default_namespace.to_string())
                }
            });

        objects.push(ResourceObject {
            api_resource: api_resource_for(&api_version, &kind),
            name,
            namespace,
            object: json,
        });
    }
    Ok(objects)
}

/// Split text into YAML documents separated by `---` at line start. Document
/// order is preserved; callers decide what to do with empty documents.
pub fn split_manifest_documents(text: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.starts_with("---") {
            docs.push(std::mem::take(&mut current));
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    docs.push(current);
    docs
}

/// Build an `ApiResource` from a manifest's `apiVersion` and `kind`.
pub fn api_resource_for(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Parse an `apiVersion` into `(group, version)`; core kinds have no group.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a resource kind the way the API server does for built-in and
/// conventionally-named kinds.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "Node",
    "PersistentVolume",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "StorageClass",
    "PriorityClass",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
];

fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}
