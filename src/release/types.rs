//! Release data model
//!
//! The shape mirrors what the release store persists. The engine only ever
//! inspects the fields named here; everything else is carried opaquely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chart::ChartMetadata;

/// Lifecycle state of one stored release version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseStatusCode {
    #[default]
    Unknown,
    Deployed,
    Deleted,
    Superseded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub status: ReleaseStatusCode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_deployed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deployed: Option<DateTime<Utc>>,
}

/// A named, versioned deployment of a templated chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub name: String,
    /// Monotonically increasing per release name.
    pub version: u32,
    /// Concatenated YAML documents produced by the renderer.
    pub manifest: String,
    pub info: ReleaseInfo,
    /// Identity of the chart this version was rendered from.
    pub chart: ChartMetadata,
    /// Raw YAML values blob the release was rendered with.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config: String,
}

impl Release {
    pub fn is_deployed(&self) -> bool {
        self.info.status == ReleaseStatusCode::Deployed
    }
}
