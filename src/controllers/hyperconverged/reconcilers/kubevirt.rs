use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::controllers::OperatorEnvironment;
use crate::resources::hyperconvergeds::LiveMigrationConfigurations;
use crate::resources::keep_unmodelled;
use crate::resources::kubevirts::{
    ComponentConfig, DeveloperConfiguration, KubeVirt, KubeVirtConfiguration, KubeVirtSpec,
    MigrationConfiguration,
};

use super::super::conditions::ComponentConditions;
use super::super::request::HcoRequest;
use super::super::tainted::KUBEVIRT_JSON_PATCH_ANNOTATION;
use super::{object_meta, replace_if_changed, OperandHooks};

pub const KUBEVIRT_NAME: &str = "kubevirt-kubevirt-hyperconverged";

const UNINSTALL_STRATEGY: &str = "BlockUninstallIfWorkloadsExist";

/// Feature gates enabled on every installation
const DEFAULT_FEATURE_GATES: [&str; 12] = [
    "DataVolumes",
    "SRIOV",
    "LiveMigration",
    "CPUManager",
    "CPUNodeDiscovery",
    "Snapshot",
    "HotplugVolumes",
    "GPU",
    "HostDevices",
    "WithHostModelCPU",
    "HypervStrictCheck",
    "DownwardMetrics",
];

const WITH_HOST_PASSTHROUGH_CPU: &str = "WithHostPassthroughCPU";

pub struct KubeVirtHooks;

fn migration_configuration(config: &LiveMigrationConfigurations) -> Option<MigrationConfiguration> {
    if config == &LiveMigrationConfigurations::default() {
        return None;
    }
    Some(MigrationConfiguration {
        parallel_migrations_per_cluster: config.parallel_migrations_per_cluster,
        parallel_outbound_migrations_per_node: config.parallel_outbound_migrations_per_node,
        bandwidth_per_migration: config.bandwidth_per_migration.clone().map(Quantity),
        completion_timeout_per_gib: config.completion_timeout_per_gib,
        progress_timeout: config.progress_timeout,
        allow_post_copy: None,
    })
}

impl OperandHooks for KubeVirtHooks {
    type Object = KubeVirt;

    fn component(&self) -> &'static str {
        "KubeVirt"
    }

    fn desired(&self, req: &HcoRequest, env: &OperatorEnvironment) -> KubeVirt {
        let hc = &req.instance;
        let mut feature_gates: Vec<String> =
            DEFAULT_FEATURE_GATES.iter().map(|g| g.to_string()).collect();
        if hc.spec.feature_gates.with_host_passthrough_cpu {
            feature_gates.push(WITH_HOST_PASSTHROUGH_CPU.into());
        }

        KubeVirt {
            metadata: object_meta(hc, env, KUBEVIRT_NAME, true, "compute"),
            spec: KubeVirtSpec {
                infra: Some(ComponentConfig {
                    node_placement: hc.spec.infra.node_placement.clone(),
                }),
                workloads: Some(ComponentConfig {
                    node_placement: hc.spec.workloads.node_placement.clone(),
                }),
                configuration: KubeVirtConfiguration {
                    developer_configuration: Some(DeveloperConfiguration { feature_gates }),
                    migrations: migration_configuration(&hc.spec.live_migration_config),
                    extra: Default::default(),
                },
                uninstall_strategy: Some(UNINSTALL_STRATEGY.into()),
                extra: Default::default(),
            },
            status: None,
        }
    }

    fn json_patch_annotation(&self) -> Option<&'static str> {
        Some(KUBEVIRT_JSON_PATCH_ANNOTATION)
    }

    fn reconcile_managed(&self, desired: &KubeVirt, existing: &mut KubeVirt) -> bool {
        let mut spec = desired.spec.clone();
        keep_unmodelled(&mut spec.extra, &existing.spec.extra);
        keep_unmodelled(
            &mut spec.configuration.extra,
            &existing.spec.configuration.extra,
        );
        replace_if_changed(&mut existing.spec, spec)
    }

    fn conditions(&self, obj: &KubeVirt) -> ComponentConditions {
        ComponentConditions::from_status(obj.status.as_ref().and_then(|s| s.conditions.as_ref()))
    }

    fn observed_version(&self, obj: &KubeVirt) -> Option<String> {
        obj.status.as_ref()?.observed_kube_virt_version.clone()
    }

    fn target_version<'a>(&self, env: &'a OperatorEnvironment) -> Option<&'a str> {
        Some(&env.kubevirt_version)
    }
}
