use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, ObjectReference, ResourceRequirements, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The only name the operator accepts for its HyperConverged resource
pub const HYPERCONVERGED_NAME: &str = "kubevirt-hyperconverged";

pub const HYPERCONVERGED_FINALIZER: &str = "kubevirt.io/hyperconverged";

/// Finalizer written by old operator releases, replaced on sight
pub const LEGACY_HYPERCONVERGED_FINALIZER: &str = "hyperconvergeds.hco.kubevirt.io";

/// Name of the HyperConverged CRD, used to clean up its stored versions
pub const HYPERCONVERGED_CRD_NAME: &str = "hyperconvergeds.hco.kubevirt.io";

/// Version-map key holding the operator's own version
pub const HCO_VERSION_NAME: &str = "operator";

pub const CONDITION_RECONCILE_COMPLETE: &str = "ReconcileComplete";
pub const CONDITION_AVAILABLE: &str = "Available";
pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_DEGRADED: &str = "Degraded";
pub const CONDITION_UPGRADEABLE: &str = "Upgradeable";
pub const CONDITION_TAINTED_CONFIGURATION: &str = "TaintedConfiguration";

/// HyperConverged is the single user-facing resource from which the virtualization stack is derived
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "HyperConverged",
    group = "hco.kubevirt.io",
    version = "v1beta1",
    namespaced,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#
)]
#[kube(status = "HyperConvergedStatus", shortname = "hco")]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedSpec {
    /// Placement of infrastructure components (controllers, webhooks)
    #[serde(default)]
    pub infra: HyperConvergedConfig,

    /// Placement of components that must run where virtual machines run
    #[serde(default)]
    pub workloads: HyperConvergedConfig,

    #[serde(default)]
    pub feature_gates: HyperConvergedFeatureGates,

    /// Tuning of live migrations, propagated to the KubeVirt configuration
    #[serde(default)]
    pub live_migration_config: LiveMigrationConfigurations,

    /// Storage class used for CDI scratch space
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_space_storage_class: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_requirements: Option<OperandResourceRequirements>,

    /// Namespace in which the common VM templates are deployed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_templates_namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_placement: Option<NodePlacement>,
}

/// Where a component's pods may be scheduled
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePlacement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedFeatureGates {
    /// Let virtual machines use the host CPU model verbatim
    #[serde(default, rename = "withHostPassthroughCPU")]
    pub with_host_passthrough_cpu: bool,

    /// Import the common golden images on a schedule
    #[serde(default)]
    pub enable_common_boot_image_import: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveMigrationConfigurations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_migrations_per_cluster: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_outbound_migrations_per_node: Option<u32>,
    /// Bandwidth limit of each migration, as a quantity such as `64Mi`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth_per_migration: Option<String>,
    #[serde(
        rename = "completionTimeoutPerGiB",
        skip_serializing_if = "Option::is_none"
    )]
    pub completion_timeout_per_gib: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_timeout: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperandResourceRequirements {
    /// Resource requirements of storage workloads such as importer pods
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_workloads: Option<ResourceRequirements>,
}

/// Status of the HyperConverged resource.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_objects: Option<Vec<ObjectReference>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<Version>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Cron expression shared by all data import cron templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_import_schedule: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct Version {
    pub name: String,
    pub version: String,
}

impl HyperConvergedStatus {
    pub fn version(&self, name: &str) -> Option<&str> {
        self.versions
            .as_ref()?
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.version.as_str())
    }

    pub fn set_version(&mut self, name: &str, version: &str) {
        let versions = self.versions.get_or_insert_with(Vec::new);
        match versions.iter_mut().find(|v| v.name == name) {
            Some(existing) => existing.version = version.to_string(),
            None => versions.push(Version {
                name: name.to_string(),
                version: version.to_string(),
            }),
        }
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.as_ref()?.iter().find(|c| c.type_ == type_)
    }

    /// Insert or refresh the reference to an object, matched by kind, namespace and name
    pub fn set_related_object(&mut self, reference: ObjectReference) {
        let related = self.related_objects.get_or_insert_with(Vec::new);
        match related.iter_mut().find(|r| {
            r.kind == reference.kind
                && r.namespace == reference.namespace
                && r.name == reference.name
        }) {
            Some(existing) => *existing = reference,
            None => related.push(reference),
        }
    }

    pub fn remove_related_objects(&mut self, matches: impl Fn(&ObjectReference) -> bool) {
        if let Some(related) = self.related_objects.as_mut() {
            related.retain(|r| !matches(r));
        }
    }
}

impl HyperConverged {
    /// True once the HC has any status condition, i.e. it was reconciled at least once
    pub fn is_initialized(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|c| !c.is_empty())
    }

    pub fn status_mut(&mut self) -> &mut HyperConvergedStatus {
        self.status.get_or_insert_with(HyperConvergedStatus::default)
    }

    pub fn condition_is(&self, type_: &str, status: &str) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.condition(type_))
            .is_some_and(|c| c.status == status)
    }
}
