use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Guided tour shown in the OpenShift console
/// API: console.openshift.io/v1
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "console.openshift.io", version = "v1", kind = "ConsoleQuickStart")]
#[serde(rename_all = "camelCase")]
pub struct ConsoleQuickStartSpec {
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration_minutes: i32,
    #[serde(default)]
    pub introduction: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<QuickStartTask>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuickStartTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
}
