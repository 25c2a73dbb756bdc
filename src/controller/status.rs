//! Status model for Helm-managed custom resources
//!
//! The status subresource carries Kubernetes-style conditions (at most one
//! per type) and a snapshot of the last successfully deployed release. The
//! snapshot is what `Sync` uses to rebuild a release store that lost the
//! record after the operator reported success.

use chrono::Utc;
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};

use crate::release::types::Release;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HelmAppConditionType {
    Initializing,
    Deployed,
    ReleaseFailed,
    Irreconcilable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionReason {
    InstallSuccessful,
    InstallError,
    UpdateSuccessful,
    UpdateError,
    UninstallSuccessful,
    UninstallError,
    ReconcileError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmAppCondition {
    #[serde(rename = "type")]
    pub type_: HelmAppConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ConditionReason>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl HelmAppCondition {
    pub fn new(type_: HelmAppConditionType, status: ConditionStatus) -> Self {
        Self {
            type_,
            status,
            reason: None,
            message: String::new(),
            release: None,
            last_transition_time: None,
        }
    }

    pub fn reason(mut self, reason: ConditionReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn release(mut self, release: Release) -> Self {
        self.release = Some(release);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmAppStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<HelmAppCondition>,
    /// Last successfully deployed release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_release: Option<Release>,
}

impl HelmAppStatus {
    /// The status recorded on the resource, or a fresh empty one.
    pub fn status_for(cr: &DynamicObject) -> HelmAppStatus {
        cr.data
            .get("status")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    /// Upsert by condition type. `lastTransitionTime` moves only when the
    /// status or reason actually changed.
    pub fn set_condition(&mut self, mut condition: HelmAppCondition) -> &mut Self {
        let now = Utc::now().to_rfc3339();
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            if existing.status != condition.status || existing.reason != condition.reason {
                condition.last_transition_time = Some(now);
            } else {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
        } else {
            condition.last_transition_time = Some(now);
            self.conditions.push(condition);
        }
        self
    }

    /// No-op if the condition is absent.
    pub fn remove_condition(&mut self, type_: HelmAppConditionType) -> &mut Self {
        self.conditions.retain(|c| c.type_ != type_);
        self
    }

    pub fn condition(&self, type_: HelmAppConditionType) -> Option<&HelmAppCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}
