//! Chart loading and values handling
//!
//! A chart is a directory with a `Chart.yaml`, optional `values.yaml`,
//! templates under `templates/`, and dependency charts under `charts/`.
//! Requirements processing mutates the chart in place, so callers reload the
//! chart from disk before every use.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};

/// Identity fields from `Chart.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartMetadata {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single template file, named relative to the chart root
/// (e.g. `templates/deployment.yaml`).
#[derive(Debug, Clone)]
pub struct ChartTemplate {
    pub name: String,
    pub data: String,
}

/// A dependency entry from `requirements.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChartDependency {
    pub name: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default, rename = "import-values")]
    pub import_values: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RequirementsFile {
    #[serde(default)]
    dependencies: Vec<ChartDependency>,
}

#[derive(Debug, Clone)]
pub struct Chart {
    pub metadata: ChartMetadata,
    pub templates: Vec<ChartTemplate>,
    pub default_values: Mapping,
    pub requirements: Vec<ChartDependency>,
    pub dependencies: Vec<Chart>,
}

/// Check whether `dir` looks like a chart directory.
pub fn is_chart_dir(dir: &Path) -> bool {
    dir.join("Chart.yaml").is_file()
}

/// Load a chart from disk, including dependency charts under `charts/`.
pub fn load_dir(dir: &Path) -> Result<Chart> {
    let metadata_path = dir.join("Chart.yaml");
    let raw = fs::read_to_string(&metadata_path)
        .map_err(|e| Error::Chart(format!("{}: {}", metadata_path.display(), e)))?;
    let metadata: ChartMetadata = serde_yaml::from_str(&raw)
        .map_err(|e| Error::Chart(format!("{}: {}", metadata_path.display(), e)))?;

    let default_values = match fs::read_to_string(dir.join("values.yaml")) {
        Ok(raw) => serde_yaml::from_str::<Option<Mapping>>(&raw)
            .map_err(|e| Error::Chart(format!("invalid values.yaml: {}", e)))?
            .unwrap_or_default(),
        Err(_) => Mapping::new(),
    };

    let requirements = match fs::read_to_string(dir.join("requirements.yaml")) {
        Ok(raw) => {
            serde_yaml::from_str::<RequirementsFile>(&raw)
                .map_err(|e| Error::Chart(format!("invalid requirements.yaml: {}", e)))?
                .dependencies
        }
        Err(_) => Vec::new(),
    };

    let mut templates = Vec::new();
    let templates_dir = dir.join("templates");
    if templates_dir.is_dir() {
        collect_templates(&templates_dir, "templates", &mut templates)?;
    }
    templates.sort_by(|a, b| a.name.cmp(&b.name));

    let mut dependencies = Vec::new();
    let charts_dir = dir.join("charts");
    if charts_dir.is_dir() {
        let mut entries: Vec<_> = fs::read_dir(&charts_dir)
            .map_err(|e| Error::Chart(format!("{}: {}", charts_dir.display(), e)))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        entries.sort();
        for path in entries {
            if is_chart_dir(&path) {
                dependencies.push(load_dir(&path)?);
            }
        }
    }

    Ok(Chart {
        metadata,
        templates,
        default_values,
        requirements,
        dependencies,
    })
}

fn collect_templates(dir: &Path, prefix: &str, out: &mut Vec<ChartTemplate>) -> Result<()> {
    let entries =
        fs::read_dir(dir).map_err(|e| Error::Chart(format!("{}: {}", dir.display(), e)))?;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let name = format!("{}/{}", prefix, entry.file_name().to_string_lossy());
        if path.is_dir() {
            collect_templates(&path, &name, out)?;
        } else {
            let data = fs::read_to_string(&path)
                .map_err(|e| Error::Chart(format!("{}: {}", path.display(), e)))?;
            out.push(ChartTemplate { name, data });
        }
    }
    Ok(())
}

/// Merge user-supplied values over the chart's defaults. Nested mappings are
/// merged recursively; any other value from the overrides wins outright.
pub fn coalesce_values(chart: &Chart, overrides: &Mapping) -> Mapping {
    let mut merged = chart.default_values.clone();
    merge_into(&mut merged, overrides);
    merged
}

fn merge_into(base: &mut Mapping, overrides: &Mapping) {
    for (key, value) in overrides {
        match (base.get_mut(key), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => {
                merge_into(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Run the requirements passes: disable dependency charts whose condition
/// evaluates to false, then import declared values from the remaining
/// children into the parent defaults.
pub fn process_requirements(chart: &mut Chart, values: &Mapping) -> Result<()> {
    process_requirements_enabled(chart, values);
    process_requirements_import_values(chart);
    Ok(())
}

fn process_requirements_enabled(chart: &mut Chart, values: &Mapping) {
    let mut disabled = Vec::new();
    for dep in &chart.requirements {
        let Some(condition) = &dep.condition else {
            continue;
        };
        // Comma-separated condition paths; the first one present wins.
        for path in condition.split(',').map(str::trim) {
            let found = lookup_path(values, path)
                .or_else(|| lookup_path(&chart.default_values, path));
            if let Some(value) = found {
                if value.as_bool() == Some(false) {
                    disabled.push(dep.name.clone());
                }
                break;
            }
        }
    }
    chart
        .dependencies
        .retain(|dep| !disabled.contains(&dep.metadata.name));
}

fn process_requirements_import_values(chart: &mut Chart) {
    let mut imported = Mapping::new();
    for dep in &chart.requirements {
        let Some(child) = chart
            .dependencies
            .iter()
            .find(|c| c.metadata.name == dep.name)
        else {
            continue;
        };
        for path in &dep.import_values {
            if let Some(Value::Mapping(map)) = lookup_path(&child.default_values, path) {
                merge_into(&mut imported, map);
            }
        }
    }
    merge_into(&mut chart.default_values, &imported);
}

/// Resolve a dotted path (`a.b.c`) inside a values mapping.
pub fn lookup_path<'a>(values: &'a Mapping, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = values.get(segments.next()?)?;
    for segment in segments {
        current = current.as_mapping()?.get(segment)?;
    }
    Some(current)
}
