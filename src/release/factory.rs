//! Manager factory
//!
//! Captures the shared backends once and hands out a fresh manager per
//! custom resource. Managers never outlive a reconcile request.

use std::path::PathBuf;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_yaml::Mapping;

use crate::cluster::ClusterClient;
use crate::controller::status::HelmAppStatus;
use crate::error::{Error, Result};
use crate::release::engine::TemplateEngine;
use crate::release::manager::ReleaseManager;
use crate::release::name::release_name;
use crate::release::store::ReleaseStore;

#[derive(Clone)]
pub struct ManagerFactory {
    store: Arc<dyn ReleaseStore>,
    cluster: Arc<dyn ClusterClient>,
    engine: Arc<dyn TemplateEngine>,
    chart_dir: PathBuf,
}

impl ManagerFactory {
    pub fn new(
        store: Arc<dyn ReleaseStore>,
        cluster: Arc<dyn ClusterClient>,
        engine: Arc<dyn TemplateEngine>,
        chart_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            cluster,
            engine,
            chart_dir,
        }
    }

    /// Build a manager bound to one custom resource.
    pub fn new_manager(&self, cr: &DynamicObject) -> Result<ReleaseManager> {
        let name = cr.name_any();
        let uid = cr.uid().ok_or(Error::MissingObjectField("metadata.uid"))?;
        let namespace = cr.namespace().unwrap_or_default();

        let spec = cr
            .data
            .get("spec")
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        let values_override = match serde_yaml::to_value(&spec)? {
            serde_yaml::Value::Mapping(mapping) => mapping,
            _ => Mapping::new(),
        };
        let values_raw = serde_yaml::to_string(&spec)?;

        Ok(ReleaseManager::new(
            self.store.clone(),
            self.cluster.clone(),
            self.engine.clone(),
            self.chart_dir.clone(),
            namespace,
            release_name(&name, &uid),
            values_override,
            values_raw,
            vec![controller_owner_ref(cr)?],
            HelmAppStatus::status_for(cr),
        ))
    }
}

/// Owner reference marking the CR as the controller of every rendered
/// object, so the cluster garbage-collects them when the CR goes away.
fn controller_owner_ref(cr: &DynamicObject) -> Result<OwnerReference> {
    let types = cr
        .types
        .as_ref()
        .ok_or(Error::MissingObjectField("apiVersion/kind"))?;
    Ok(OwnerReference {
        api_version: types.api_version.clone(),
        kind: types.kind.clone(),
        name: cr.name_any(),
        uid: cr.uid().ok_or(Error::MissingObjectField("metadata.uid"))?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}
