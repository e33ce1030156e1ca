use crate::controllers::OperatorEnvironment;
use crate::resources::cdis::{CDIConfigSpec, CDISpec, CDI};
use crate::resources::keep_unmodelled;

use super::super::conditions::ComponentConditions;
use super::super::request::HcoRequest;
use super::super::tainted::CDI_JSON_PATCH_ANNOTATION;
use super::{object_meta, replace_if_changed, OperandHooks};

pub const CDI_NAME: &str = "cdi-kubevirt-hyperconverged";

const HONOR_WAIT_FOR_FIRST_CONSUMER: &str = "HonorWaitForFirstConsumer";
const UNINSTALL_STRATEGY: &str = "BlockUninstallIfWorkloadsExist";

pub struct CdiHooks;

impl OperandHooks for CdiHooks {
    type Object = CDI;

    fn component(&self) -> &'static str {
        "CDI"
    }

    fn desired(&self, req: &HcoRequest, env: &OperatorEnvironment) -> CDI {
        let hc = &req.instance;
        CDI {
            metadata: object_meta(hc, env, CDI_NAME, false, "storage"),
            spec: CDISpec {
                config: Some(CDIConfigSpec {
                    feature_gates: Some(vec![HONOR_WAIT_FOR_FIRST_CONSUMER.into()]),
                    scratch_space_storage_class: hc.spec.scratch_space_storage_class.clone(),
                    pod_resource_requirements: hc
                        .spec
                        .resource_requirements
                        .as_ref()
                        .and_then(|r| r.storage_workloads.clone()),
                    filesystem_overhead: None,
                    extra: Default::default(),
                }),
                infra: hc.spec.infra.node_placement.clone(),
                workloads: hc.spec.workloads.node_placement.clone(),
                uninstall_strategy: Some(UNINSTALL_STRATEGY.into()),
                extra: Default::default(),
            },
            status: None,
        }
    }

    fn json_patch_annotation(&self) -> Option<&'static str> {
        Some(CDI_JSON_PATCH_ANNOTATION)
    }

    fn reconcile_managed(&self, desired: &CDI, existing: &mut CDI) -> bool {
        let mut spec = desired.spec.clone();
        keep_unmodelled(&mut spec.extra, &existing.spec.extra);
        if let (Some(config), Some(current)) =
            (spec.config.as_mut(), existing.spec.config.as_ref())
        {
            keep_unmodelled(&mut config.extra, &current.extra);
        }
        replace_if_changed(&mut existing.spec, spec)
    }

    fn conditions(&self, obj: &CDI) -> ComponentConditions {
        ComponentConditions::from_status(obj.status.as_ref().and_then(|s| s.conditions.as_ref()))
    }

    fn observed_version(&self, obj: &CDI) -> Option<String> {
        obj.status.as_ref()?.observed_version.clone()
    }

    fn target_version<'a>(&self, env: &'a OperatorEnvironment) -> Option<&'a str> {
        Some(&env.cdi_version)
    }
}
