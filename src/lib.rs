//! helm-operator: manage Helm chart releases through custom resources
//!
//! Each watched custom resource maps to exactly one release: the CR's `spec`
//! supplies the chart values, observed state is reported in the CR's
//! `status`, and every generated object is owner-referenced back to the CR.

pub mod chart;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod release;

pub use config::WatchBinding;
pub use controller::{error_policy, reconcile, Context, HelmAppStatus, FINALIZER};
pub use error::{Error, Result};
pub use release::{ManagerFactory, ReleaseManager};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, DynamicObject};
use kube::discovery::ApiResource;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::Client;

use crate::cluster::KubeClusterClient;
use crate::controller::BackoffConfig;
use crate::release::{JinjaEngine, MemoryStore};

/// Run one controller per watch binding until the process is stopped. The
/// release store, cluster client, and template engine are shared across all
/// controllers; each reconcile gets a fresh manager from its factory.
pub async fn run_operator(
    client: Client,
    watches: Vec<WatchBinding>,
    resync_period: Duration,
) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let cluster = Arc::new(KubeClusterClient::new(client.clone()));
    let engine = Arc::new(JinjaEngine::new());

    let mut registered = HashSet::new();
    let mut controllers = Vec::new();
    for binding in watches {
        let gvk = binding.gvk();
        if !registered.insert((gvk.group.clone(), gvk.version.clone(), gvk.kind.clone())) {
            return Err(Error::DuplicateGvk(format!(
                "{}/{}, Kind={}",
                gvk.group, gvk.version, gvk.kind
            )));
        }

        let api_resource = ApiResource::from_gvk(&gvk);
        let controller_name = format!("{}-controller", gvk.kind.to_lowercase());
        tracing::info!(
            controller = %controller_name,
            chart = %binding.chart.display(),
            "watching {}/{}, Kind={}",
            gvk.group,
            gvk.version,
            gvk.kind
        );

        let factory = ManagerFactory::new(
            store.clone(),
            cluster.clone(),
            engine.clone(),
            binding.chart.clone(),
        );
        let ctx = Arc::new(Context {
            client: client.clone(),
            gvk,
            api_resource: api_resource.clone(),
            factory,
            resync_period,
            backoff: BackoffConfig::default(),
        });

        let api: Api<DynamicObject> = Api::all_with(client.clone(), &api_resource);
        let watcher_config = WatcherConfig::default().any_semantic();

        controllers.push(tokio::spawn(async move {
            Controller::new_with(api, watcher_config, api_resource)
                .run(reconcile, error_policy, ctx)
                .for_each(|result| async move {
                    match result {
                        Ok((obj, _action)) => {
                            tracing::debug!("reconciled: {}", obj.name);
                        }
                        Err(e) => {
                            tracing::error!("reconciliation error: {:?}", e);
                        }
                    }
                })
                .await;
        }));
    }

    futures::future::join_all(controllers).await;

    // The controller streams never complete in normal operation.
    tracing::error!("controller streams ended unexpectedly");
    Ok(())
}
