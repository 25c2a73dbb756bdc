pub mod reconciler;
pub mod status;

pub use reconciler::{error_policy, reconcile, BackoffConfig, Context, FINALIZER};
pub use status::{
    ConditionReason, ConditionStatus, HelmAppCondition, HelmAppConditionType, HelmAppStatus,
};
