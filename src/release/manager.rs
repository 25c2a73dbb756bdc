//! Per-CR release manager
//!
//! One manager exists per custom resource per reconcile request. It owns no
//! state across requests beyond what it persists to the release store and the
//! resource's status; the concurrency guarantee of one in-flight reconcile
//! per CR makes any longer-lived caching both unnecessary and unsound.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_yaml::Mapping;
use tracing::debug;

use crate::chart::{self, Chart};
use crate::cluster::{build_unstructured, ClusterClient};
use crate::controller::status::HelmAppStatus;
use crate::error::{Error, Result};
use crate::release::engine::{inject_owner_references, TemplateEngine};
use crate::release::store::{self, ReleaseStore};
use crate::release::types::{Release, ReleaseInfo, ReleaseStatusCode};

pub struct ReleaseManager {
    store: Arc<dyn ReleaseStore>,
    cluster: Arc<dyn ClusterClient>,
    engine: Arc<dyn TemplateEngine>,
    chart_dir: PathBuf,

    namespace: String,
    release_name: String,
    /// The CR's `spec`, which is the chart values.
    values_override: Mapping,
    /// `spec` marshaled to YAML, recorded on every release version.
    values_raw: String,
    owner_refs: Vec<OwnerReference>,
    status: HelmAppStatus,

    // Established by prepare_release.
    chart: Option<Chart>,
    values: Option<Mapping>,
    candidate: Option<Rendered>,
    deployed_release: Option<Release>,
    is_release_installed: bool,
    is_update_required: bool,
}

#[derive(Clone)]
struct Rendered {
    manifest: String,
    notes: String,
}

impl ReleaseManager {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn ReleaseStore>,
        cluster: Arc<dyn ClusterClient>,
        engine: Arc<dyn TemplateEngine>,
        chart_dir: PathBuf,
        namespace: String,
        release_name: String,
        values_override: Mapping,
        values_raw: String,
        owner_refs: Vec<OwnerReference>,
        status: HelmAppStatus,
    ) -> Self {
        Self {
            store,
            cluster,
            engine,
            chart_dir,
            namespace,
            release_name,
            values_override,
            values_raw,
            owner_refs,
            status,
            chart: None,
            values: None,
            candidate: None,
            deployed_release: None,
            is_release_installed: false,
            is_update_required: false,
        }
    }

    pub fn release_name(&self) -> &str {
        &self.release_name
    }

    /// Ensure the release store is consistent with the history recorded on
    /// the resource: recreate the recorded deployed release if the store
    /// lost it, then delete every non-deployed version so lingering FAILED
    /// versions cannot block the next install.
    pub async fn sync(&self) -> Result<()> {
        if let Some(recorded) = &self.status.deployed_release {
            match self.store.get(&recorded.name, recorded.version).await {
                Ok(_) => {}
                Err(err) if store::is_not_found(&err) => {
                    self.store.create(recorded).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }

        for release in self.release_history().await? {
            if release.is_deployed() {
                continue;
            }
            match self.store.delete(&release.name, release.version).await {
                Ok(_) => {
                    debug!(
                        release = %release.name,
                        version = release.version,
                        "deleted stale release version"
                    );
                }
                Err(err) if store::is_not_found(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Load the chart and values, then determine what the reconcile needs to
    /// do: install (nothing deployed), update (dry-run manifest differs), or
    /// reconcile (no change).
    pub async fn prepare_release(&mut self) -> Result<()> {
        // Requirements processing mutates the chart, so it is reloaded from
        // disk on every call.
        let mut chart = chart::load_dir(&self.chart_dir)?;
        chart::process_requirements(&mut chart, &self.values_override)?;
        let values = chart::coalesce_values(&chart, &self.values_override);
        self.chart = Some(chart);
        self.values = Some(values);

        let deployed = match self.store.deployed(&self.release_name).await {
            Ok(release) => release,
            Err(err) if store::is_not_found(&err) => {
                self.is_release_installed = false;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        self.deployed_release = Some(deployed);
        self.is_release_installed = true;

        // Dry-run: render the candidate manifest and compare it with what is
        // deployed, string for string.
        let candidate = self.render_release()?;
        let deployed_manifest = self
            .deployed_release
            .as_ref()
            .map(|r| r.manifest.as_str())
            .unwrap_or_default();
        self.is_update_required = deployed_manifest != candidate.manifest;
        self.candidate = Some(candidate);
        Ok(())
    }

    /// Only meaningful after `prepare_release`.
    pub fn is_release_installed(&self) -> bool {
        self.is_release_installed
    }

    /// Only meaningful after `prepare_release`.
    pub fn is_update_required(&self) -> bool {
        self.is_update_required
    }

    /// Install a new release. If resource creation fails after the store
    /// recorded the release, the partial release is purged before the
    /// install error is surfaced.
    pub async fn install_release(&self) -> Result<Release> {
        let chart = self.chart.as_ref().ok_or(Error::NotPrepared)?;
        let rendered = match &self.candidate {
            Some(candidate) => candidate.clone(),
            None => self.render_release()?,
        };

        let now = Utc::now();
        let release = Release {
            name: self.release_name.clone(),
            version: self.next_version().await?,
            manifest: rendered.manifest,
            info: ReleaseInfo {
                status: ReleaseStatusCode::Deployed,
                notes: rendered.notes,
                first_deployed: Some(now),
                last_deployed: Some(now),
            },
            chart: chart.metadata.clone(),
            config: self.values_raw.clone(),
        };
        self.store.create(&release).await?;

        if let Err(err) = self.create_resources(&release.manifest).await {
            // The store recorded a partial release; purge it so the next
            // reconcile can retry the install from scratch.
            if let Err(cleanup) = self.purge(&release).await {
                return Err(Error::InstallCleanup {
                    cleanup: cleanup.to_string(),
                    original: err.to_string(),
                });
            }
            return Err(err);
        }
        Ok(release)
    }

    /// Update the deployed release to the candidate manifest. On failure the
    /// previous release is force-restored and the update error surfaced.
    /// Returns `(previous, updated)`.
    pub async fn update_release(&self) -> Result<(Release, Release)> {
        let chart = self.chart.as_ref().ok_or(Error::NotPrepared)?;
        let previous = self.deployed_release.clone().ok_or(Error::NotPrepared)?;
        let rendered = match &self.candidate {
            Some(candidate) => candidate.clone(),
            None => self.render_release()?,
        };

        let updated = Release {
            name: self.release_name.clone(),
            version: self.next_version().await?,
            manifest: rendered.manifest,
            info: ReleaseInfo {
                status: ReleaseStatusCode::Deployed,
                notes: rendered.notes,
                first_deployed: previous.info.first_deployed,
                last_deployed: Some(Utc::now()),
            },
            chart: chart.metadata.clone(),
            config: self.values_raw.clone(),
        };
        self.store.create(&updated).await?;

        let mut superseded = previous.clone();
        superseded.info.status = ReleaseStatusCode::Superseded;
        self.store.update(&superseded).await?;

        if let Err(err) = self.apply_resources(&updated.manifest).await {
            if let Err(rollback) = self.rollback(&previous, &updated).await {
                return Err(Error::UpdateRollback {
                    rollback: rollback.to_string(),
                    original: err.to_string(),
                });
            }
            return Err(err);
        }
        Ok((previous, updated))
    }

    /// Converge the cluster to the deployed release's manifest. Missing
    /// objects are created; existing ones are merge-patched with the full
    /// marshaled object.
    pub async fn reconcile_release(&self) -> Result<Release> {
        let deployed = self.deployed_release.clone().ok_or(Error::NotPrepared)?;
        self.apply_resources(&deployed.manifest).await?;
        Ok(deployed)
    }

    /// Uninstall the release and purge its history. Returns
    /// `Error::ReleaseNotFound` when there is no history, which callers
    /// treat as "nothing to undo".
    pub async fn uninstall_release(&self) -> Result<Release> {
        let history = self.release_history().await?;
        if history.is_empty() {
            return Err(Error::ReleaseNotFound);
        }

        // Clean up from the deployed version's manifest when there is one,
        // otherwise from the newest version.
        let target = history
            .iter()
            .rev()
            .find(|r| r.is_deployed())
            .or(history.last())
            .cloned()
            .ok_or(Error::ReleaseNotFound)?;
        self.delete_resources(&target.manifest).await?;

        for release in &history {
            match self.store.delete(&release.name, release.version).await {
                Ok(_) => {}
                Err(err) if store::is_not_found(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let mut uninstalled = target;
        uninstalled.info.status = ReleaseStatusCode::Deleted;
        Ok(uninstalled)
    }

    /// Render through the base engine once, keep `NOTES.txt`, then inject
    /// owner references and concatenate the files into a single manifest.
    fn render_release(&self) -> Result<Rendered> {
        let chart = self.chart.as_ref().ok_or(Error::NotPrepared)?;
        let values = self.values.as_ref().ok_or(Error::NotPrepared)?;
        let rendered = self.engine.render(chart, values)?;
        let notes = rendered
            .get("templates/NOTES.txt")
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let owned = inject_owner_references(rendered, &self.owner_refs)?;
        let manifest = owned.into_values().collect();
        Ok(Rendered { manifest, notes })
    }

    async fn next_version(&self) -> Result<u32> {
        let history = self.release_history().await?;
        Ok(history.iter().map(|r| r.version).max().unwrap_or(0) + 1)
    }

    async fn release_history(&self) -> Result<Vec<Release>> {
        match self.store.history(&self.release_name).await {
            Ok(history) => Ok(history),
            Err(err) if store::is_not_found(&err) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_resources(&self, manifest: &str) -> Result<()> {
        for object in build_unstructured(&self.namespace, manifest)? {
            self.cluster.create(&object).await?;
        }
        Ok(())
    }

    async fn apply_resources(&self, manifest: &str) -> Result<()> {
        for object in build_unstructured(&self.namespace, manifest)? {
            match self.cluster.create(&object).await {
                Ok(()) => {}
                Err(err) if err.is_already_exists() => {
                    self.cluster.merge_patch(&object).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn delete_resources(&self, manifest: &str) -> Result<()> {
        for object in build_unstructured(&self.namespace, manifest)? {
            match self.cluster.delete(&object).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Remove a partially-installed release: its cluster objects, then every
    /// stored version.
    async fn purge(&self, release: &Release) -> Result<()> {
        self.delete_resources(&release.manifest).await?;
        for release in self.release_history().await? {
            match self.store.delete(&release.name, release.version).await {
                Ok(_) => {}
                Err(err) if store::is_not_found(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Force-restore the previous deployed release after a failed update.
    async fn rollback(&self, previous: &Release, failed: &Release) -> Result<()> {
        match self.store.delete(&failed.name, failed.version).await {
            Ok(_) => {}
            Err(err) if store::is_not_found(&err) => {}
            Err(err) => return Err(err.into()),
        }
        let mut restored = previous.clone();
        restored.info.status = ReleaseStatusCode::Deployed;
        self.store.update(&restored).await?;
        self.apply_resources(&previous.manifest).await
    }
}
