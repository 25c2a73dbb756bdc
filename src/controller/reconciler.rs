//! Reconciliation logic for Helm-managed custom resources
//!
//! Every reconcile converges the cluster toward the release implied by the
//! resource's `spec`: add the finalizer, sync the release store, then pick
//! exactly one of the uninstall / install / update / reconcile paths. All
//! paths end by writing status back to the resource.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use rand::Rng;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::status::{
    ConditionReason, ConditionStatus, HelmAppCondition, HelmAppConditionType, HelmAppStatus,
};
use crate::error::{Error, Result};
use crate::release::ManagerFactory;

/// Finalizer that guarantees release cleanup before the resource disappears.
pub const FINALIZER: &str = "uninstall-helm-release";

/// Shared context for one watched GVK.
pub struct Context {
    pub client: Client,
    pub gvk: GroupVersionKind,
    pub api_resource: ApiResource,
    pub factory: ManagerFactory,
    pub resync_period: Duration,
    pub backoff: BackoffConfig,
}

impl Context {
    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        if namespace.is_empty() {
            Api::all_with(self.client.clone(), &self.api_resource)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &self.api_resource)
        }
    }
}

/// Main reconciliation function.
#[instrument(skip(cr, ctx), fields(kind = %ctx.gvk.kind, namespace = %cr.namespace().unwrap_or_default(), name = %cr.name_any()))]
pub async fn reconcile(cr: Arc<DynamicObject>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = cr.namespace().unwrap_or_default();
    let name = cr.name_any();
    let api = ctx.api(&namespace);

    // Watch events can be stale; work from the latest copy. A missing object
    // means deletion already completed.
    let Some(cr) = api.get_opt(&name).await? else {
        debug!("resource no longer exists");
        return Ok(Action::await_change());
    };

    let mut manager = ctx.factory.new_manager(&cr)?;
    let mut status = HelmAppStatus::status_for(&cr);
    let release_name = manager.release_name().to_string();
    let deleted = cr.metadata.deletion_timestamp.is_some();
    let has_finalizer = cr.finalizers().iter().any(|f| f == FINALIZER);

    // The finalizer goes on before anything else so cleanup is guaranteed
    // even if the operator crashes right after this update.
    if !deleted && !has_finalizer {
        debug!(finalizer = FINALIZER, "adding finalizer");
        let mut finalizers = cr.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        if status.conditions.is_empty() {
            status.set_condition(HelmAppCondition::new(
                HelmAppConditionType::Initializing,
                ConditionStatus::True,
            ));
        }
        api.patch(
            &name,
            &PatchParams::default(),
            &Patch::Merge(&json!({ "metadata": { "finalizers": finalizers } })),
        )
        .await?;
        write_status(&api, &name, &status).await?;
        // The update event triggers the next reconcile.
        return Ok(Action::await_change());
    }
    status.remove_condition(HelmAppConditionType::Initializing);

    // Sync runs before the dry-run so stale or failed versions cannot skew
    // the prepared state.
    if let Err(err) = manager.sync().await {
        error!(release = %release_name, error = %err, "failed to sync release");
        status.set_condition(
            HelmAppCondition::new(HelmAppConditionType::Irreconcilable, ConditionStatus::True)
                .reason(ConditionReason::ReconcileError)
                .message(err.to_string()),
        );
        let _ = write_status(&api, &name, &status).await;
        return Err(err);
    }
    status.remove_condition(HelmAppConditionType::Irreconcilable);

    if deleted {
        if !has_finalizer {
            info!("resource is terminated, skipping reconciliation");
            return Ok(Action::await_change());
        }

        match manager.uninstall_release().await {
            Ok(release) => {
                info!(release = %release_name, version = release.version, "uninstalled release");
                status.remove_condition(HelmAppConditionType::ReleaseFailed);
                status.set_condition(
                    HelmAppCondition::new(
                        HelmAppConditionType::Deployed,
                        ConditionStatus::False,
                    )
                    .reason(ConditionReason::UninstallSuccessful),
                );
                status.deployed_release = None;
            }
            Err(Error::ReleaseNotFound) => {
                info!(release = %release_name, "release not found, removing finalizer");
                status.remove_condition(HelmAppConditionType::ReleaseFailed);
            }
            Err(err) => {
                error!(release = %release_name, error = %err, "failed to uninstall release");
                status.set_condition(
                    HelmAppCondition::new(
                        HelmAppConditionType::ReleaseFailed,
                        ConditionStatus::True,
                    )
                    .reason(ConditionReason::UninstallError)
                    .message(err.to_string()),
                );
                let _ = write_status(&api, &name, &status).await;
                return Err(err);
            }
        }
        write_status(&api, &name, &status).await?;

        let finalizers: Vec<&String> = cr
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != FINALIZER)
            .collect();
        api.patch(
            &name,
            &PatchParams::default(),
            &Patch::Merge(&json!({ "metadata": { "finalizers": finalizers } })),
        )
        .await?;
        return Ok(Action::await_change());
    }

    if let Err(err) = manager.prepare_release().await {
        error!(release = %release_name, error = %err, "failed to prepare release");
        status.set_condition(
            HelmAppCondition::new(HelmAppConditionType::Irreconcilable, ConditionStatus::True)
                .reason(ConditionReason::ReconcileError)
                .message(err.to_string()),
        );
        let _ = write_status(&api, &name, &status).await;
        return Err(err);
    }

    if !manager.is_release_installed() {
        match manager.install_release().await {
            Ok(release) => {
                info!(release = %release_name, version = release.version, "installed release");
                status.remove_condition(HelmAppConditionType::ReleaseFailed);
                status.set_condition(
                    HelmAppCondition::new(HelmAppConditionType::Deployed, ConditionStatus::True)
                        .reason(ConditionReason::InstallSuccessful)
                        .message(release.info.notes.clone())
                        .release(release.clone()),
                );
                status.deployed_release = Some(release);
                write_status(&api, &name, &status).await?;
                return Ok(Action::requeue(ctx.resync_period));
            }
            Err(err) => {
                error!(release = %release_name, error = %err, "failed to install release");
                status.set_condition(
                    HelmAppCondition::new(
                        HelmAppConditionType::ReleaseFailed,
                        ConditionStatus::True,
                    )
                    .reason(ConditionReason::InstallError)
                    .message(err.to_string()),
                );
                let _ = write_status(&api, &name, &status).await;
                return Err(err);
            }
        }
    }

    if manager.is_update_required() {
        match manager.update_release().await {
            Ok((_previous, updated)) => {
                info!(release = %release_name, version = updated.version, "updated release");
                status.remove_condition(HelmAppConditionType::ReleaseFailed);
                status.set_condition(
                    HelmAppCondition::new(HelmAppConditionType::Deployed, ConditionStatus::True)
                        .reason(ConditionReason::UpdateSuccessful)
                        .message(updated.info.notes.clone())
                        .release(updated.clone()),
                );
                status.deployed_release = Some(updated);
                write_status(&api, &name, &status).await?;
                return Ok(Action::requeue(ctx.resync_period));
            }
            Err(err) => {
                error!(release = %release_name, error = %err, "failed to update release");
                status.set_condition(
                    HelmAppCondition::new(
                        HelmAppConditionType::ReleaseFailed,
                        ConditionStatus::True,
                    )
                    .reason(ConditionReason::UpdateError)
                    .message(err.to_string()),
                );
                let _ = write_status(&api, &name, &status).await;
                return Err(err);
            }
        }
    }

    // No release change needed; repair any drift in the underlying
    // resources.
    if let Err(err) = manager.reconcile_release().await {
        error!(release = %release_name, error = %err, "failed to reconcile release resources");
        status.set_condition(
            HelmAppCondition::new(HelmAppConditionType::Irreconcilable, ConditionStatus::True)
                .reason(ConditionReason::ReconcileError)
                .message(err.to_string()),
        );
        let _ = write_status(&api, &name, &status).await;
        return Err(err);
    }
    status.remove_condition(HelmAppConditionType::Irreconcilable);

    debug!(release = %release_name, "reconciled release resources");
    write_status(&api, &name, &status).await?;
    Ok(Action::requeue(ctx.resync_period))
}

/// Error policy for the controller: log and requeue with jitter. Status has
/// already been written by the failing path.
pub fn error_policy(cr: Arc<DynamicObject>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(name = %cr.name_any(), error = %error, "reconciliation failed, requeuing");
    Action::requeue(ctx.backoff.next_delay())
}

/// Write status back to the resource. CRDs with a status subresource take
/// the patch there; a 404 means no subresource is defined, so fall back to
/// patching the main object.
async fn write_status(
    api: &Api<DynamicObject>,
    name: &str,
    status: &HelmAppStatus,
) -> Result<()> {
    let patch = json!({ "status": status });
    match api
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Requeue delay for failed reconciliations, jittered so retries across
/// resources do not line up.
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    pub fn next_delay(&self) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let spread = base * self.jitter;
        let jitter = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((base + jitter).max(0.0))
    }
}
