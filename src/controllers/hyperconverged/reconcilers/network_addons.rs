use crate::controllers::OperatorEnvironment;
use crate::resources::keep_unmodelled;
use crate::resources::networkaddonsconfigs::{
    KubeMacPool, LinuxBridge, Multus, NetworkAddonsConfig, NetworkAddonsConfigSpec,
    PlacementConfiguration,
};

use super::super::conditions::ComponentConditions;
use super::super::request::HcoRequest;
use super::super::tainted::NETWORK_ADDONS_JSON_PATCH_ANNOTATION;
use super::{object_meta, replace_if_changed, OperandHooks};

/// CNAO only reconciles a config with this name
pub const NETWORK_ADDONS_NAME: &str = "cluster";

pub struct NetworkAddonsHooks;

impl OperandHooks for NetworkAddonsHooks {
    type Object = NetworkAddonsConfig;

    fn component(&self) -> &'static str {
        "NetworkAddonsConfig"
    }

    fn desired(&self, req: &HcoRequest, env: &OperatorEnvironment) -> NetworkAddonsConfig {
        let hc = &req.instance;
        NetworkAddonsConfig {
            metadata: object_meta(hc, env, NETWORK_ADDONS_NAME, false, "network"),
            spec: NetworkAddonsConfigSpec {
                multus: Some(Multus {}),
                linux_bridge: Some(LinuxBridge {}),
                kube_mac_pool: Some(KubeMacPool::default()),
                image_pull_policy: Some("IfNotPresent".into()),
                placement_configuration: Some(PlacementConfiguration {
                    infra: hc.spec.infra.node_placement.clone(),
                    workloads: hc.spec.workloads.node_placement.clone(),
                }),
                extra: Default::default(),
            },
            status: None,
        }
    }

    fn json_patch_annotation(&self) -> Option<&'static str> {
        Some(NETWORK_ADDONS_JSON_PATCH_ANNOTATION)
    }

    fn reconcile_managed(
        &self,
        desired: &NetworkAddonsConfig,
        existing: &mut NetworkAddonsConfig,
    ) -> bool {
        let mut spec = desired.spec.clone();
        keep_unmodelled(&mut spec.extra, &existing.spec.extra);
        replace_if_changed(&mut existing.spec, spec)
    }

    fn conditions(&self, obj: &NetworkAddonsConfig) -> ComponentConditions {
        ComponentConditions::from_status(obj.status.as_ref().and_then(|s| s.conditions.as_ref()))
    }

    fn observed_version(&self, obj: &NetworkAddonsConfig) -> Option<String> {
        obj.status.as_ref()?.observed_version.clone()
    }

    fn target_version<'a>(&self, env: &'a OperatorEnvironment) -> Option<&'a str> {
        Some(&env.network_addons_version)
    }
}
