use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::hyperconvergeds::NodePlacement;
use super::{OperandCondition, UnmodelledFields};

/// CDI deploys the containerized data importer
/// API: cdi.kubevirt.io/v1beta1
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "cdi.kubevirt.io", version = "v1beta1", kind = "CDI")]
#[kube(status = "CDIStatus")]
#[serde(rename_all = "camelCase")]
pub struct CDISpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<CDIConfigSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infra: Option<NodePlacement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workloads: Option<NodePlacement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uninstall_strategy: Option<String>,
    #[serde(flatten)]
    pub extra: UnmodelledFields,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CDIConfigSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_gates: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_space_storage_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_resource_requirements: Option<ResourceRequirements>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem_overhead: Option<FilesystemOverhead>,
    #[serde(flatten)]
    pub extra: UnmodelledFields,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemOverhead {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<BTreeMap<String, String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CDIStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<OperandCondition>>,
}
