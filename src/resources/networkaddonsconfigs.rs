use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::hyperconvergeds::NodePlacement;
use super::{OperandCondition, UnmodelledFields};

/// NetworkAddonsConfig deploys the cluster network addons (CNAO)
/// API: networkaddonsoperator.network.kubevirt.io/v1
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "networkaddonsoperator.network.kubevirt.io",
    version = "v1",
    kind = "NetworkAddonsConfig"
)]
#[kube(status = "NetworkAddonsConfigStatus")]
#[serde(rename_all = "camelCase")]
pub struct NetworkAddonsConfigSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multus: Option<Multus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux_bridge: Option<LinuxBridge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kube_mac_pool: Option<KubeMacPool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_configuration: Option<PlacementConfiguration>,
    #[serde(flatten)]
    pub extra: UnmodelledFields,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Multus {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct LinuxBridge {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeMacPool {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_end: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlacementConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infra: Option<NodePlacement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workloads: Option<NodePlacement>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAddonsConfigStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<OperandCondition>>,
}
