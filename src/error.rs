//! Error types for the helm-operator

use thiserror::Error;

use crate::cluster::ClusterError;
use crate::release::store::StoreError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("release storage error: {0}")]
    Store(#[from] StoreError),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("failed to load chart: {0}")]
    Chart(String),

    #[error("failed to render templates: {0}")]
    Render(String),

    #[error("error parsing rendered template {file}: {message}")]
    RenderParse { file: String, message: String },

    #[error("release not found")]
    ReleaseNotFound,

    #[error("release manager used before PrepareRelease")]
    NotPrepared,

    #[error("failed to roll back failed installation: {cleanup}: {original}")]
    InstallCleanup { cleanup: String, original: String },

    #[error("failed to roll back failed update: {rollback}: {original}")]
    UpdateRollback { rollback: String, original: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("duplicate GVK: {0}")]
    DuplicateGvk(String),

    #[error("missing object field: {0}")]
    MissingObjectField(&'static str),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
