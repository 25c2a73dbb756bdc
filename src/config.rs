//! Watch configuration: which `(group, version, kind)` maps to which chart
//!
//! Precedence follows the environment contract: an explicit watches file via
//! `HELM_CHART_WATCHES` (honored even when set to an empty value), the
//! default watches file if present, then the single-binding
//! `API_VERSION`/`KIND`/`HELM_CHART` triple. Configuration errors are fatal
//! at startup.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use kube::core::GroupVersionKind;
use serde::Deserialize;

use crate::chart;
use crate::cluster::parse_api_version;
use crate::error::{Error, Result};

/// YAML file mapping GVKs to chart directories; overrides everything else.
pub const WATCHES_FILE_ENV: &str = "HELM_CHART_WATCHES";
/// `<group>/<version>` (e.g. `example.com/v1alpha1`) for the fallback
/// single binding.
pub const API_VERSION_ENV: &str = "API_VERSION";
/// CamelCased kind (e.g. `MyApp`) for the fallback single binding.
pub const KIND_ENV: &str = "KIND";
/// Chart directory for the fallback single binding.
pub const HELM_CHART_ENV: &str = "HELM_CHART";

const DEFAULT_WATCHES_FILE: &str = "/opt/helm/watches.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct WatchBinding {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub chart: PathBuf,
}

impl WatchBinding {
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    fn validate(&self) -> Result<()> {
        // A group-less GVK is valid.
        if self.version.is_empty() {
            return Err(Error::InvalidConfig("version must not be empty".into()));
        }
        if self.kind.is_empty() {
            return Err(Error::InvalidConfig("kind must not be empty".into()));
        }
        if !chart::is_chart_dir(&self.chart) {
            return Err(Error::InvalidConfig(format!(
                "invalid chart directory {}",
                self.chart.display()
            )));
        }
        Ok(())
    }
}

/// Load watch bindings from the environment.
pub fn load_watches() -> Result<Vec<WatchBinding>> {
    if let Ok(path) = env::var(WATCHES_FILE_ENV) {
        return watches_from_file(Path::new(&path));
    }
    let default = Path::new(DEFAULT_WATCHES_FILE);
    if default.exists() {
        return watches_from_file(default);
    }
    let binding = binding_from_env();
    binding.validate()?;
    Ok(vec![binding])
}

/// Read and validate a watches file: a YAML sequence of
/// `{group, version, kind, chart}`.
pub fn watches_from_file(path: &Path) -> Result<Vec<WatchBinding>> {
    let raw = fs::read_to_string(path).map_err(|e| {
        Error::InvalidConfig(format!("failed to read watches file {}: {}", path.display(), e))
    })?;
    let bindings: Vec<WatchBinding> = serde_yaml::from_str(&raw)
        .map_err(|e| Error::InvalidConfig(format!("failed to parse watches file: {}", e)))?;

    let mut seen = HashSet::new();
    for binding in &bindings {
        binding.validate()?;
        let gvk = binding.gvk();
        if !seen.insert((gvk.group.clone(), gvk.version.clone(), gvk.kind.clone())) {
            return Err(Error::DuplicateGvk(format!(
                "{}/{}, Kind={}",
                gvk.group, gvk.version, gvk.kind
            )));
        }
    }
    Ok(bindings)
}

fn binding_from_env() -> WatchBinding {
    let api_version = env::var(API_VERSION_ENV).unwrap_or_default();
    let (group, version) = parse_api_version(&api_version);
    WatchBinding {
        group,
        version,
        kind: env::var(KIND_ENV).unwrap_or_default(),
        chart: PathBuf::from(env::var(HELM_CHART_ENV).unwrap_or_default()),
    }
}
