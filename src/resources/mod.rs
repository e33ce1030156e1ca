use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod cdis;
pub mod consolequickstarts;
pub mod hyperconvergeds;
pub mod kubevirts;
pub mod networkaddonsconfigs;
pub mod ssps;

/// Fields of a component operator's object that are not modelled here
pub type UnmodelledFields = BTreeMap<String, serde_json::Value>;

/// Carry over the unmodelled fields of `existing` that `desired` does not set itself
pub fn keep_unmodelled(desired: &mut UnmodelledFields, existing: &UnmodelledFields) {
    for (key, value) in existing {
        desired
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
}

/// Condition as published by the component operators (openshift custom-resource-status style)
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperandCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

impl OperandCondition {
    pub fn new(type_: &str, status: &str, reason: &str, message: &str) -> Self {
        Self {
            type_: type_.into(),
            status: status.into(),
            reason: Some(reason.into()),
            message: Some(message.into()),
            ..Default::default()
        }
    }
}
