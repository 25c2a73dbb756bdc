//! Unit tests for status and condition management

use helm_operator::controller::status::{
    ConditionReason, ConditionStatus, HelmAppCondition, HelmAppConditionType, HelmAppStatus,
};
use helm_operator::release::ReleaseStatusCode;

use crate::common::{test_cr, test_release};

mod condition_tests {
    use super::*;

    #[test]
    fn test_set_condition_adds_new() {
        let mut status = HelmAppStatus::default();
        status.set_condition(
            HelmAppCondition::new(HelmAppConditionType::Deployed, ConditionStatus::True)
                .reason(ConditionReason::InstallSuccessful)
                .message("installed"),
        );

        assert_eq!(status.conditions.len(), 1);
        let condition = status.condition(HelmAppConditionType::Deployed).unwrap();
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.reason, Some(ConditionReason::InstallSuccessful));
        assert_eq!(condition.message, "installed");
        assert!(condition.last_transition_time.is_some());
    }

    #[test]
    fn test_at_most_one_condition_per_type() {
        let mut status = HelmAppStatus::default();
        for _ in 0..3 {
            status.set_condition(HelmAppCondition::new(
                HelmAppConditionType::Irreconcilable,
                ConditionStatus::True,
            ));
        }
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn test_unchanged_status_and_reason_keeps_transition_time() {
        let mut status = HelmAppStatus::default();
        status.set_condition(
            HelmAppCondition::new(HelmAppConditionType::Deployed, ConditionStatus::True)
                .reason(ConditionReason::InstallSuccessful),
        );
        let before = status
            .condition(HelmAppConditionType::Deployed)
            .and_then(|c| c.last_transition_time.clone());

        status.set_condition(
            HelmAppCondition::new(HelmAppConditionType::Deployed, ConditionStatus::True)
                .reason(ConditionReason::InstallSuccessful)
                .message("a new message"),
        );
        let after = status.condition(HelmAppConditionType::Deployed).unwrap();
        assert_eq!(after.last_transition_time, before);
        assert_eq!(after.message, "a new message");
    }

    #[test]
    fn test_changed_reason_moves_transition_time() {
        let mut status = HelmAppStatus::default();
        status.set_condition(
            HelmAppCondition::new(HelmAppConditionType::Deployed, ConditionStatus::True)
                .reason(ConditionReason::InstallSuccessful),
        );
        // Pin the recorded time to something that cannot collide with "now".
        status.conditions[0].last_transition_time = Some("2024-01-01T00:00:00Z".to_string());

        status.set_condition(
            HelmAppCondition::new(HelmAppConditionType::Deployed, ConditionStatus::True)
                .reason(ConditionReason::UpdateSuccessful),
        );
        let after = status.condition(HelmAppConditionType::Deployed).unwrap();
        assert_ne!(
            after.last_transition_time,
            Some("2024-01-01T00:00:00Z".to_string())
        );
    }

    #[test]
    fn test_remove_condition_is_noop_when_absent() {
        let mut status = HelmAppStatus::default();
        status.remove_condition(HelmAppConditionType::ReleaseFailed);
        assert!(status.conditions.is_empty());

        status.set_condition(HelmAppCondition::new(
            HelmAppConditionType::ReleaseFailed,
            ConditionStatus::True,
        ));
        status.remove_condition(HelmAppConditionType::ReleaseFailed);
        assert!(status.conditions.is_empty());
    }
}

mod serialization_tests {
    use super::*;

    #[test]
    fn test_status_for_missing_status_is_empty() {
        let cr = test_cr("foo", "default", serde_json::json!({}));
        let status = HelmAppStatus::status_for(&cr);
        assert!(status.conditions.is_empty());
        assert!(status.deployed_release.is_none());
    }

    #[test]
    fn test_status_round_trips_through_resource_data() {
        let mut status = HelmAppStatus::default();
        status.set_condition(
            HelmAppCondition::new(HelmAppConditionType::Deployed, ConditionStatus::True)
                .reason(ConditionReason::InstallSuccessful),
        );
        status.deployed_release = Some(test_release(
            "foo-1",
            1,
            "kind: ConfigMap\n",
            ReleaseStatusCode::Deployed,
        ));

        let mut cr = test_cr("foo", "default", serde_json::json!({}));
        cr.data["status"] = serde_json::to_value(&status).unwrap();

        let restored = HelmAppStatus::status_for(&cr);
        assert_eq!(restored.conditions, status.conditions);
        assert_eq!(restored.deployed_release, status.deployed_release);
    }

    #[test]
    fn test_malformed_status_yields_fresh_status() {
        let mut cr = test_cr("foo", "default", serde_json::json!({}));
        cr.data["status"] = serde_json::json!("not an object");
        let status = HelmAppStatus::status_for(&cr);
        assert!(status.conditions.is_empty());
    }

    #[test]
    fn test_serialized_field_names_are_stable() {
        let mut status = HelmAppStatus::default();
        status.set_condition(
            HelmAppCondition::new(HelmAppConditionType::Deployed, ConditionStatus::True)
                .reason(ConditionReason::InstallSuccessful),
        );
        status.deployed_release = Some(test_release(
            "foo-1",
            1,
            "kind: ConfigMap\n",
            ReleaseStatusCode::Deployed,
        ));

        let json = serde_json::to_value(&status).unwrap();
        let condition = &json["conditions"][0];
        assert_eq!(condition["type"], "Deployed");
        assert_eq!(condition["status"], "True");
        assert_eq!(condition["reason"], "InstallSuccessful");
        assert!(condition["lastTransitionTime"].is_string());
        assert_eq!(json["deployedRelease"]["name"], "foo-1");
        assert_eq!(json["deployedRelease"]["info"]["status"], "DEPLOYED");
    }
}
