use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::hyperconvergeds::NodePlacement;
use super::{OperandCondition, UnmodelledFields};

/// SSP deploys the scheduling, scale and performance components (templates, validator, node labeller)
/// API: ssp.kubevirt.io/v1beta1
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "ssp.kubevirt.io", version = "v1beta1", kind = "SSP", namespaced)]
#[kube(status = "SSPStatus")]
#[serde(rename_all = "camelCase")]
pub struct SSPSpec {
    pub common_templates: CommonTemplates,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_validator: Option<TemplateValidator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_labeller: Option<NodeLabeller>,
    #[serde(flatten)]
    pub extra: UnmodelledFields,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonTemplates {
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_import_cron_templates: Option<Vec<DataImportCronTemplate>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataImportCronTemplate {
    pub name: String,
    pub schedule: String,
    pub managed_data_source: String,
    pub registry_url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateValidator {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<NodePlacement>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeLabeller {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<NodePlacement>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SSPStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<OperandCondition>>,
}
