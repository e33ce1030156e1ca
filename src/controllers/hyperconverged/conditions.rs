//! Folding of operand conditions into the five top-level HyperConverged conditions.
//!
//! Operands are walked in registry order and later operands overwrite the reason of earlier
//! ones. Conditions no operand has an opinion on are filled in last with their healthy
//! default.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

use crate::resources::hyperconvergeds::{
    CONDITION_AVAILABLE, CONDITION_DEGRADED, CONDITION_PROGRESSING, CONDITION_RECONCILE_COMPLETE,
    CONDITION_TAINTED_CONFIGURATION, CONDITION_UPGRADEABLE,
};
use crate::resources::OperandCondition;

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";
pub const STATUS_UNKNOWN: &str = "Unknown";

pub const REASON_INIT: &str = "Init";
pub const MESSAGE_INIT: &str = "Initializing HyperConverged cluster";
pub const REASON_RECONCILE_COMPLETED: &str = "ReconcileCompleted";
pub const MESSAGE_RECONCILE_COMPLETED: &str = "Reconcile completed successfully";
pub const REASON_RECONCILE_FAILED: &str = "ReconcileFailed";
pub const REASON_COMMON_DEGRADED: &str = "HCODegraded";
pub const MESSAGE_NOT_AVAILABLE_DEGRADED: &str = "HCO is not available due to degraded components";
pub const MESSAGE_NOT_UPGRADEABLE_DEGRADED: &str =
    "HCO is not Upgradeable due to degraded components";
pub const REASON_INVALID_REQUEST: &str = "InvalidRequest";
pub const REASON_UPGRADING: &str = "HCOUpgrading";
pub const REASON_UPGRADEABLE_UPGRADING: &str = "UpgradeableUpgrading";
pub const MESSAGE_UPGRADEABLE_UPGRADING: &str = "HCO is upgrading";
pub const REASON_TAINTED_CONFIGURATION: &str = "UnsupportedFeatureAnnotation";
pub const MESSAGE_TAINTED_CONFIGURATION: &str =
    "Unsupported feature was activated via an HCO annotation";

/// Order in which conditions are persisted
const CONDITION_ORDER: [&str; 6] = [
    CONDITION_RECONCILE_COMPLETE,
    CONDITION_AVAILABLE,
    CONDITION_PROGRESSING,
    CONDITION_DEGRADED,
    CONDITION_UPGRADEABLE,
    CONDITION_TAINTED_CONFIGURATION,
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionValue {
    pub status: &'static str,
    pub reason: String,
    pub message: String,
}

/// Reasons that may turn Upgradeable off, weakest first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum UpgradeableBlocker {
    Degraded,
    Progressing,
    NotUpgradeable,
}

/// Conditions computed during one reconcile, keyed by type
#[derive(Clone, Debug, Default)]
pub struct ConditionSet {
    entries: BTreeMap<&'static str, ConditionValue>,
    upgradeable_blocker: Option<UpgradeableBlocker>,
}

impl ConditionSet {
    pub fn set(
        &mut self,
        type_: &'static str,
        status: &'static str,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        if type_ == CONDITION_UPGRADEABLE {
            self.upgradeable_blocker = None;
        }
        self.entries.insert(
            type_,
            ConditionValue {
                status,
                reason: reason.into(),
                message: message.into(),
            },
        );
    }

    /// Set Upgradeable=False unless a stronger blocker is already recorded
    fn block_upgrade(
        &mut self,
        blocker: UpgradeableBlocker,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        if self.upgradeable_blocker.is_some_and(|current| current > blocker) {
            return;
        }
        self.set(CONDITION_UPGRADEABLE, STATUS_FALSE, reason, message);
        self.upgradeable_blocker = Some(blocker);
    }

    fn set_if_absent(
        &mut self,
        type_: &'static str,
        status: &'static str,
        reason: &str,
        message: &str,
    ) {
        if !self.contains(type_) {
            self.set(type_, status, reason, message);
        }
    }

    pub fn get(&self, type_: &str) -> Option<&ConditionValue> {
        self.entries.get(type_)
    }

    pub fn contains(&self, type_: &str) -> bool {
        self.entries.contains_key(type_)
    }

    pub fn remove(&mut self, type_: &str) {
        self.entries.remove(type_);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_status(&self, type_: &str, status: &str) -> bool {
        self.get(type_).is_some_and(|c| c.status == status)
    }

    /// Available, not progressing and not degraded
    pub fn is_ready(&self) -> bool {
        self.has_status(CONDITION_AVAILABLE, STATUS_TRUE)
            && self.has_status(CONDITION_PROGRESSING, STATUS_FALSE)
            && self.has_status(CONDITION_DEGRADED, STATUS_FALSE)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ConditionValue)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }
}

/// Health information an operand handler hands to the aggregator
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentConditions {
    /// The object does not report health (ConfigMaps, Services, ...)
    NotTracked,
    /// The object exists (or should exist) but published no conditions yet
    Missing,
    Reported(Vec<OperandCondition>),
}

impl ComponentConditions {
    pub fn from_status(conditions: Option<&Vec<OperandCondition>>) -> Self {
        match conditions {
            Some(conditions) if !conditions.is_empty() => Self::Reported(conditions.clone()),
            _ => Self::Missing,
        }
    }

    /// Available=True, Progressing=False and Degraded=False are all reported
    pub fn is_ready(&self) -> bool {
        let Self::Reported(conditions) = self else {
            return matches!(self, Self::NotTracked);
        };
        let has = |type_: &str, status: &str| {
            conditions
                .iter()
                .any(|c| c.type_ == type_ && c.status == status)
        };
        has(CONDITION_AVAILABLE, STATUS_TRUE)
            && has(CONDITION_PROGRESSING, STATUS_FALSE)
            && has(CONDITION_DEGRADED, STATUS_FALSE)
    }
}

fn fold_component(set: &mut ConditionSet, component: &str, conditions: &ComponentConditions) {
    let conditions = match conditions {
        ComponentConditions::NotTracked => return,
        ComponentConditions::Missing => {
            let reason = format!("{component}Conditions");
            let message = format!("{component} resource has no conditions");
            set.set(CONDITION_AVAILABLE, STATUS_FALSE, &reason, &message);
            set.set(CONDITION_PROGRESSING, STATUS_TRUE, &reason, &message);
            set.block_upgrade(UpgradeableBlocker::Progressing, reason, message);
            return;
        }
        ComponentConditions::Reported(conditions) => conditions,
    };

    let mut found_available = false;
    for condition in conditions {
        let message = condition.message.as_deref().unwrap_or_default();
        match (condition.type_.as_str(), condition.status.as_str()) {
            (CONDITION_AVAILABLE, status) => {
                found_available = true;
                if status == STATUS_FALSE {
                    set.set(
                        CONDITION_AVAILABLE,
                        STATUS_FALSE,
                        format!("{component}NotAvailable"),
                        format!("{component} is not available: {message}"),
                    );
                }
            }
            (CONDITION_PROGRESSING, STATUS_TRUE) => {
                let reason = format!("{component}Progressing");
                let message = format!("{component} is progressing: {message}");
                set.set(CONDITION_PROGRESSING, STATUS_TRUE, &reason, &message);
                set.block_upgrade(UpgradeableBlocker::Progressing, reason, message);
            }
            (CONDITION_DEGRADED, STATUS_TRUE) => {
                set.set(
                    CONDITION_DEGRADED,
                    STATUS_TRUE,
                    format!("{component}Degraded"),
                    format!("{component} is degraded: {message}"),
                );
            }
            (CONDITION_UPGRADEABLE, STATUS_FALSE) => {
                set.block_upgrade(
                    UpgradeableBlocker::NotUpgradeable,
                    format!("{component}NotUpgradeable"),
                    format!("{component} is not upgradeable: {message}"),
                );
            }
            _ => {}
        }
    }

    if !found_available {
        set.set(
            CONDITION_AVAILABLE,
            STATUS_FALSE,
            format!("{component}NotAvailable"),
            r#"missing "Available" condition"#,
        );
    }
}

fn reconcile_complete(set: &mut ConditionSet, errors: &[String]) {
    if errors.is_empty() {
        set.set(
            CONDITION_RECONCILE_COMPLETE,
            STATUS_TRUE,
            REASON_RECONCILE_COMPLETED,
            MESSAGE_RECONCILE_COMPLETED,
        );
    } else {
        set.set(
            CONDITION_RECONCILE_COMPLETE,
            STATUS_FALSE,
            REASON_RECONCILE_FAILED,
            format!("Error while reconciling: {}", errors.join("; ")),
        );
    }
}

/// Derive the five top-level conditions from the operands' conditions, given in registry order
pub fn aggregate<'a>(
    components: impl IntoIterator<Item = (&'a str, &'a ComponentConditions)>,
    errors: &[String],
) -> ConditionSet {
    let mut set = ConditionSet::default();
    for (component, conditions) in components {
        fold_component(&mut set, component, conditions);
    }

    if set.has_status(CONDITION_DEGRADED, STATUS_TRUE) {
        set.set_if_absent(
            CONDITION_AVAILABLE,
            STATUS_FALSE,
            REASON_COMMON_DEGRADED,
            MESSAGE_NOT_AVAILABLE_DEGRADED,
        );
        if set.upgradeable_blocker.is_none() {
            set.block_upgrade(
                UpgradeableBlocker::Degraded,
                REASON_COMMON_DEGRADED,
                MESSAGE_NOT_UPGRADEABLE_DEGRADED,
            );
        }
    }

    for (type_, status) in [
        (CONDITION_AVAILABLE, STATUS_TRUE),
        (CONDITION_PROGRESSING, STATUS_FALSE),
        (CONDITION_DEGRADED, STATUS_FALSE),
        (CONDITION_UPGRADEABLE, STATUS_TRUE),
    ] {
        set.set_if_absent(
            type_,
            status,
            REASON_RECONCILE_COMPLETED,
            MESSAGE_RECONCILE_COMPLETED,
        );
    }
    reconcile_complete(&mut set, errors);
    set
}

/// Conditions of a HyperConverged that is reconciled for the first time
pub fn init_conditions(errors: &[String]) -> ConditionSet {
    let mut set = ConditionSet::default();
    set.set(
        CONDITION_RECONCILE_COMPLETE,
        STATUS_UNKNOWN,
        REASON_INIT,
        REASON_INIT,
    );
    set.set(CONDITION_AVAILABLE, STATUS_FALSE, REASON_INIT, MESSAGE_INIT);
    set.set(CONDITION_PROGRESSING, STATUS_TRUE, REASON_INIT, MESSAGE_INIT);
    set.set(CONDITION_DEGRADED, STATUS_FALSE, REASON_INIT, MESSAGE_INIT);
    set.set(CONDITION_UPGRADEABLE, STATUS_UNKNOWN, REASON_INIT, MESSAGE_INIT);
    if !errors.is_empty() {
        reconcile_complete(&mut set, errors);
    }
    set
}

/// Render `set` as persisted conditions.
///
/// `lastTransitionTime` is carried over from `existing` unless the status changed.
pub fn to_status_conditions(
    existing: &[Condition],
    set: &ConditionSet,
    generation: Option<i64>,
    now: &Time,
) -> Vec<Condition> {
    let mut ordered: Vec<(&'static str, &ConditionValue)> = CONDITION_ORDER
        .iter()
        .filter_map(|type_| set.get(type_).map(|value| (*type_, value)))
        .collect();
    ordered.extend(set.iter().filter(|(type_, _)| !CONDITION_ORDER.contains(type_)));

    ordered
        .into_iter()
        .map(|(type_, value)| {
            let last_transition_time = existing
                .iter()
                .find(|c| c.type_ == type_ && c.status == value.status)
                .map(|c| c.last_transition_time.clone())
                .unwrap_or_else(|| now.clone());
            Condition {
                type_: type_.to_string(),
                status: value.status.to_string(),
                reason: value.reason.clone(),
                message: value.message.clone(),
                observed_generation: generation,
                last_transition_time,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn reported(conditions: &[(&str, &str)]) -> ComponentConditions {
        ComponentConditions::Reported(
            conditions
                .iter()
                .map(|(type_, status)| OperandCondition::new(type_, status, "Reason", "msg"))
                .collect(),
        )
    }

    fn healthy() -> ComponentConditions {
        reported(&[
            (CONDITION_AVAILABLE, STATUS_TRUE),
            (CONDITION_PROGRESSING, STATUS_FALSE),
            (CONDITION_DEGRADED, STATUS_FALSE),
        ])
    }

    fn assert_condition(set: &ConditionSet, type_: &str, status: &str, reason: &str) {
        let condition = set.get(type_).unwrap_or_else(|| panic!("{type_} missing"));
        assert_eq!(condition.status, status, "{type_} status");
        assert_eq!(condition.reason, reason, "{type_} reason");
    }

    #[test]
    fn all_healthy_completes() {
        let (kv, cdi) = (healthy(), healthy());
        let set = aggregate([("KubeVirt", &kv), ("CDI", &cdi)], &[]);

        for (type_, status) in [
            (CONDITION_RECONCILE_COMPLETE, STATUS_TRUE),
            (CONDITION_AVAILABLE, STATUS_TRUE),
            (CONDITION_PROGRESSING, STATUS_FALSE),
            (CONDITION_DEGRADED, STATUS_FALSE),
            (CONDITION_UPGRADEABLE, STATUS_TRUE),
        ] {
            assert_condition(&set, type_, status, REASON_RECONCILE_COMPLETED);
        }
        assert!(set.is_ready());
    }

    #[test]
    fn last_unavailable_operand_wins() {
        let cdi = reported(&[(CONDITION_AVAILABLE, STATUS_FALSE)]);
        let cna = reported(&[(CONDITION_AVAILABLE, STATUS_FALSE)]);
        let set = aggregate([("CDI", &cdi), ("NetworkAddonsConfig", &cna)], &[]);

        assert_condition(
            &set,
            CONDITION_AVAILABLE,
            STATUS_FALSE,
            "NetworkAddonsConfigNotAvailable",
        );
        assert_condition(&set, CONDITION_UPGRADEABLE, STATUS_TRUE, REASON_RECONCILE_COMPLETED);
    }

    #[test]
    fn missing_conditions_block_everything() {
        let kv = healthy();
        let ssp = ComponentConditions::Missing;
        let set = aggregate([("KubeVirt", &kv), ("SSP", &ssp)], &[]);

        assert_condition(&set, CONDITION_AVAILABLE, STATUS_FALSE, "SSPConditions");
        assert_condition(&set, CONDITION_PROGRESSING, STATUS_TRUE, "SSPConditions");
        assert_condition(&set, CONDITION_UPGRADEABLE, STATUS_FALSE, "SSPConditions");
        assert_eq!(
            set.get(CONDITION_AVAILABLE).unwrap().message,
            "SSP resource has no conditions"
        );
    }

    #[test]
    fn missing_available_condition_is_not_available() {
        let cdi = reported(&[(CONDITION_PROGRESSING, STATUS_FALSE)]);
        let set = aggregate([("CDI", &cdi)], &[]);

        assert_condition(&set, CONDITION_AVAILABLE, STATUS_FALSE, "CDINotAvailable");
        assert_eq!(
            set.get(CONDITION_AVAILABLE).unwrap().message,
            r#"missing "Available" condition"#
        );
    }

    #[test]
    fn degraded_operand() {
        let cdi = reported(&[
            (CONDITION_AVAILABLE, STATUS_TRUE),
            (CONDITION_PROGRESSING, STATUS_FALSE),
            (CONDITION_DEGRADED, STATUS_TRUE),
        ]);
        let set = aggregate([("CDI", &cdi)], &[]);

        assert_condition(&set, CONDITION_DEGRADED, STATUS_TRUE, "CDIDegraded");
        assert_condition(&set, CONDITION_AVAILABLE, STATUS_FALSE, REASON_COMMON_DEGRADED);
        assert_eq!(
            set.get(CONDITION_AVAILABLE).unwrap().message,
            MESSAGE_NOT_AVAILABLE_DEGRADED
        );
        assert_condition(&set, CONDITION_UPGRADEABLE, STATUS_FALSE, REASON_COMMON_DEGRADED);
        assert_condition(&set, CONDITION_PROGRESSING, STATUS_FALSE, REASON_RECONCILE_COMPLETED);
        assert!(!set.is_ready());
    }

    #[test]
    fn degraded_and_progressing_operand() {
        let cdi = reported(&[
            (CONDITION_AVAILABLE, STATUS_TRUE),
            (CONDITION_PROGRESSING, STATUS_TRUE),
            (CONDITION_DEGRADED, STATUS_TRUE),
        ]);
        let set = aggregate([("CDI", &cdi)], &[]);

        assert_condition(&set, CONDITION_AVAILABLE, STATUS_FALSE, REASON_COMMON_DEGRADED);
        assert_condition(&set, CONDITION_PROGRESSING, STATUS_TRUE, "CDIProgressing");
        assert_condition(&set, CONDITION_UPGRADEABLE, STATUS_FALSE, "CDIProgressing");
    }

    #[test]
    fn degraded_and_unavailable_keeps_operand_reason() {
        let cdi = reported(&[
            (CONDITION_AVAILABLE, STATUS_FALSE),
            (CONDITION_PROGRESSING, STATUS_FALSE),
            (CONDITION_DEGRADED, STATUS_TRUE),
        ]);
        let set = aggregate([("CDI", &cdi)], &[]);

        assert_condition(&set, CONDITION_AVAILABLE, STATUS_FALSE, "CDINotAvailable");
        assert_condition(&set, CONDITION_UPGRADEABLE, STATUS_FALSE, REASON_COMMON_DEGRADED);
    }

    #[test]
    fn progressing_only_stays_available() {
        let cdi = reported(&[
            (CONDITION_AVAILABLE, STATUS_TRUE),
            (CONDITION_PROGRESSING, STATUS_TRUE),
            (CONDITION_DEGRADED, STATUS_FALSE),
        ]);
        let set = aggregate([("CDI", &cdi)], &[]);

        assert_condition(&set, CONDITION_AVAILABLE, STATUS_TRUE, REASON_RECONCILE_COMPLETED);
        assert_condition(&set, CONDITION_PROGRESSING, STATUS_TRUE, "CDIProgressing");
        assert_condition(&set, CONDITION_UPGRADEABLE, STATUS_FALSE, "CDIProgressing");
        assert_eq!(
            set.get(CONDITION_PROGRESSING).unwrap().message,
            "CDI is progressing: msg"
        );
    }

    #[test]
    fn explicit_not_upgradeable_beats_later_progressing() {
        let kv = reported(&[
            (CONDITION_AVAILABLE, STATUS_TRUE),
            (CONDITION_UPGRADEABLE, STATUS_FALSE),
        ]);
        let cdi = reported(&[
            (CONDITION_AVAILABLE, STATUS_TRUE),
            (CONDITION_PROGRESSING, STATUS_TRUE),
        ]);
        let set = aggregate([("KubeVirt", &kv), ("CDI", &cdi)], &[]);

        assert_condition(&set, CONDITION_UPGRADEABLE, STATUS_FALSE, "KubeVirtNotUpgradeable");
        assert_condition(&set, CONDITION_PROGRESSING, STATUS_TRUE, "CDIProgressing");
    }

    #[test]
    fn errors_fail_reconcile_complete_only() {
        let kv = healthy();
        let errors = vec!["fake update error".to_string()];
        let set = aggregate([("KubeVirt", &kv)], &errors);

        assert_condition(
            &set,
            CONDITION_RECONCILE_COMPLETE,
            STATUS_FALSE,
            REASON_RECONCILE_FAILED,
        );
        assert!(set
            .get(CONDITION_RECONCILE_COMPLETE)
            .unwrap()
            .message
            .contains("fake update error"));
        assert_condition(&set, CONDITION_AVAILABLE, STATUS_TRUE, REASON_RECONCILE_COMPLETED);
    }

    #[test]
    fn not_tracked_components_are_ignored() {
        let cm = ComponentConditions::NotTracked;
        let set = aggregate([("ConfigMap", &cm)], &[]);
        assert!(set.is_ready());
        assert!(ComponentConditions::NotTracked.is_ready());
        assert!(!ComponentConditions::Missing.is_ready());
    }

    #[test]
    fn init_conditions_with_error() {
        let set = init_conditions(&["fake create error".to_string()]);
        assert_condition(&set, CONDITION_AVAILABLE, STATUS_FALSE, REASON_INIT);
        assert_condition(&set, CONDITION_UPGRADEABLE, STATUS_UNKNOWN, REASON_INIT);
        assert_condition(
            &set,
            CONDITION_RECONCILE_COMPLETE,
            STATUS_FALSE,
            REASON_RECONCILE_FAILED,
        );
    }

    #[test]
    fn transition_time_changes_only_with_status() {
        let before = Time(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let now = Time(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        let existing = vec![
            Condition {
                type_: CONDITION_AVAILABLE.into(),
                status: STATUS_TRUE.into(),
                reason: "Old".into(),
                message: "old".into(),
                observed_generation: Some(1),
                last_transition_time: before.clone(),
            },
            Condition {
                type_: CONDITION_DEGRADED.into(),
                status: STATUS_TRUE.into(),
                reason: "Old".into(),
                message: "old".into(),
                observed_generation: Some(1),
                last_transition_time: before.clone(),
            },
        ];
        let set = aggregate(std::iter::empty(), &[]);
        let conditions = to_status_conditions(&existing, &set, Some(2), &now);

        let types: Vec<&str> = conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(types, &CONDITION_ORDER[..5]);

        let available = conditions.iter().find(|c| c.type_ == CONDITION_AVAILABLE).unwrap();
        assert_eq!(available.last_transition_time, before);
        assert_eq!(available.reason, REASON_RECONCILE_COMPLETED);
        assert_eq!(available.observed_generation, Some(2));

        let degraded = conditions.iter().find(|c| c.type_ == CONDITION_DEGRADED).unwrap();
        assert_eq!(degraded.last_transition_time, now);
    }
}
