//! Chart rendering and owner-reference injection
//!
//! `TemplateEngine` is the narrow contract to the templating backend; the
//! operator wraps whichever engine it is given in an [`OwnerRefEngine`] so
//! that every object emitted for a release carries an owner reference back to
//! its custom resource and is garbage-collected with it.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::chart::{self, Chart};
use crate::cluster::split_manifest_documents;
use crate::error::{Error, Result};

/// Renders a chart against a set of values into a map of file name to
/// rendered text.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, chart: &Chart, values: &Mapping) -> Result<BTreeMap<String, String>>;
}

/// Wraps a base engine and stamps owner references on every rendered object.
pub struct OwnerRefEngine {
    inner: Arc<dyn TemplateEngine>,
    refs: Vec<OwnerReference>,
}

impl OwnerRefEngine {
    pub fn new(inner: Arc<dyn TemplateEngine>, refs: Vec<OwnerReference>) -> Self {
        Self { inner, refs }
    }
}

impl TemplateEngine for OwnerRefEngine {
    fn render(&self, chart: &Chart, values: &Mapping) -> Result<BTreeMap<String, String>> {
        let rendered = self.inner.render(chart, values)?;
        inject_owner_references(rendered, &self.refs)
    }
}

/// Add owner references to every document of every `.yaml` file. Non-yaml
/// files are dropped, as are files left with no non-empty documents.
pub fn inject_owner_references(
    rendered: BTreeMap<String, String>,
    refs: &[OwnerReference],
) -> Result<BTreeMap<String, String>> {
    let mut owned = BTreeMap::new();
    for (file, contents) in rendered {
        if !file.ends_with(".yaml") {
            continue;
        }
        let with_owner = add_owner_refs(&file, &contents, refs)?;
        if with_owner.is_empty() {
            debug!(file = %file, "skipping empty template");
            continue;
        }
        owned.insert(file, with_owner);
    }
    Ok(owned)
}

/// Add the owner references to all documents in one rendered file. Charts
/// routinely emit empty documents (comments, disabled conditionals); those
/// are elided while document order is preserved.
fn add_owner_refs(file: &str, contents: &str, refs: &[OwnerReference]) -> Result<String> {
    let refs_value = serde_yaml::to_value(refs)?;
    let mut out = String::new();
    for doc in split_manifest_documents(contents) {
        if doc.trim().is_empty() {
            continue;
        }
        let value: Value = serde_yaml::from_str(&doc).map_err(|e| Error::RenderParse {
            file: file.to_string(),
            message: e.to_string(),
        })?;
        let mut mapping = match value {
            Value::Null => continue,
            Value::Mapping(m) if m.is_empty() => continue,
            Value::Mapping(m) => m,
            _ => {
                return Err(Error::RenderParse {
                    file: file.to_string(),
                    message: "document is not a mapping".to_string(),
                })
            }
        };

        let metadata = mapping
            .entry(Value::from("metadata"))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        match metadata {
            Value::Mapping(meta) => {
                meta.insert(Value::from("ownerReferences"), refs_value.clone());
            }
            _ => {
                return Err(Error::RenderParse {
                    file: file.to_string(),
                    message: "metadata is not a mapping".to_string(),
                })
            }
        }

        out.push_str(&serde_yaml::to_string(&mapping)?);
        out.push_str("---\n");
    }
    Ok(out)
}

/// Default template engine: renders each template file with minijinja,
/// exposing the coalesced values as `values` and the chart identity as
/// `chart`. Dependency chart templates render under `charts/<name>/` with
/// their values scoped the same way the requirements passes scope them.
#[derive(Default)]
pub struct JinjaEngine;

impl JinjaEngine {
    pub fn new() -> Self {
        Self
    }

    fn render_into(
        &self,
        chart: &Chart,
        values: &Mapping,
        prefix: &str,
        out: &mut BTreeMap<String, String>,
    ) -> Result<()> {
        let env = minijinja::Environment::new();
        let ctx = minijinja::context! {
            values => minijinja::Value::from_serialize(values),
            chart => minijinja::context! {
                name => chart.metadata.name,
                version => chart.metadata.version,
            },
        };
        for template in &chart.templates {
            let name = format!("{}{}", prefix, template.name);
            let text = env
                .render_named_str(&name, &template.data, &ctx)
                .map_err(|e| Error::Render(format!("{}: {}", name, e)))?;
            out.insert(name, text);
        }
        for dep in &chart.dependencies {
            let sub_overrides = values
                .get(dep.metadata.name.as_str())
                .and_then(Value::as_mapping)
                .cloned()
                .unwrap_or_default();
            let sub_values = chart::coalesce_values(dep, &sub_overrides);
            let sub_prefix = format!("{}charts/{}/", prefix, dep.metadata.name);
            self.render_into(dep, &sub_values, &sub_prefix, out)?;
        }
        Ok(())
    }
}

impl TemplateEngine for JinjaEngine {
    fn render(&self, chart: &Chart, values: &Mapping) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        self.render_into(chart, values, "", &mut out)?;
        Ok(out)
    }
}
