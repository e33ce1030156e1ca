use crate::controllers::OperatorEnvironment;
use crate::resources::keep_unmodelled;
use crate::resources::ssps::{
    CommonTemplates, DataImportCronTemplate, NodeLabeller, SSPSpec, TemplateValidator, SSP,
};

use super::super::conditions::ComponentConditions;
use super::super::request::HcoRequest;
use super::{object_meta, replace_if_changed, OperandHooks};

pub const SSP_NAME: &str = "ssp-kubevirt-hyperconverged";

const DEFAULT_COMMON_TEMPLATES_NAMESPACE: &str = "openshift";
const TEMPLATE_VALIDATOR_REPLICAS: i32 = 2;

/// Golden images imported when common boot image import is enabled
const GOLDEN_IMAGES: [(&str, &str, &str); 4] = [
    (
        "centos8-image-cron",
        "centos8",
        "docker://quay.io/kubevirt/centos8-container-disk-images",
    ),
    (
        "fedora-image-cron",
        "fedora",
        "docker://quay.io/kubevirt/fedora-container-disk-images",
    ),
    (
        "centos-stream8-image-cron",
        "centos-stream8",
        "docker://quay.io/containerdisks/centos-stream:8",
    ),
    (
        "centos-stream9-image-cron",
        "centos-stream9",
        "docker://quay.io/containerdisks/centos-stream:9",
    ),
];

pub struct SspHooks;

impl SspHooks {
    fn data_import_cron_templates(req: &HcoRequest) -> Option<Vec<DataImportCronTemplate>> {
        if !req.instance.spec.feature_gates.enable_common_boot_image_import {
            return None;
        }
        Some(
            GOLDEN_IMAGES
                .iter()
                .map(|(name, source, url)| DataImportCronTemplate {
                    name: name.to_string(),
                    schedule: req.data_import_schedule.clone(),
                    managed_data_source: source.to_string(),
                    registry_url: url.to_string(),
                })
                .collect(),
        )
    }
}

impl OperandHooks for SspHooks {
    type Object = SSP;

    fn component(&self) -> &'static str {
        "SSP"
    }

    fn desired(&self, req: &HcoRequest, env: &OperatorEnvironment) -> SSP {
        let hc = &req.instance;
        SSP {
            metadata: object_meta(hc, env, SSP_NAME, true, "schedule"),
            spec: SSPSpec {
                common_templates: CommonTemplates {
                    namespace: hc
                        .spec
                        .common_templates_namespace
                        .clone()
                        .unwrap_or_else(|| DEFAULT_COMMON_TEMPLATES_NAMESPACE.into()),
                    data_import_cron_templates: Self::data_import_cron_templates(req),
                },
                template_validator: Some(TemplateValidator {
                    replicas: Some(TEMPLATE_VALIDATOR_REPLICAS),
                    placement: hc.spec.infra.node_placement.clone(),
                }),
                node_labeller: Some(NodeLabeller {
                    placement: hc.spec.workloads.node_placement.clone(),
                }),
                extra: Default::default(),
            },
            status: None,
        }
    }

    fn reconcile_managed(&self, desired: &SSP, existing: &mut SSP) -> bool {
        let mut spec = desired.spec.clone();
        keep_unmodelled(&mut spec.extra, &existing.spec.extra);
        replace_if_changed(&mut existing.spec, spec)
    }

    fn conditions(&self, obj: &SSP) -> ComponentConditions {
        ComponentConditions::from_status(obj.status.as_ref().and_then(|s| s.conditions.as_ref()))
    }

    fn observed_version(&self, obj: &SSP) -> Option<String> {
        obj.status.as_ref()?.observed_version.clone()
    }

    fn target_version<'a>(&self, env: &'a OperatorEnvironment) -> Option<&'a str> {
        Some(&env.ssp_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::hyperconverged::request::TriggerSource;
    use crate::testing::hco;

    #[test]
    fn defaults_without_boot_image_import() {
        let req = HcoRequest::new(hco(), TriggerSource::Primary);
        let ssp = SspHooks.desired(&req, &OperatorEnvironment::default());

        assert_eq!(ssp.spec.common_templates.namespace, "openshift");
        assert!(ssp.spec.common_templates.data_import_cron_templates.is_none());
        assert_eq!(
            ssp.spec.template_validator.and_then(|v| v.replicas),
            Some(TEMPLATE_VALIDATOR_REPLICAS)
        );
    }

    #[test]
    fn cron_templates_share_the_schedule() {
        let mut hc = hco();
        hc.spec.feature_gates.enable_common_boot_image_import = true;
        hc.spec.common_templates_namespace = Some("templates".into());
        let mut req = HcoRequest::new(hc, TriggerSource::Primary);
        req.data_import_schedule = "17 */12 * * *".into();

        let ssp = SspHooks.desired(&req, &OperatorEnvironment::default());

        assert_eq!(ssp.spec.common_templates.namespace, "templates");
        let templates = ssp.spec.common_templates.data_import_cron_templates.unwrap();
        assert_eq!(templates.len(), GOLDEN_IMAGES.len());
        assert!(templates.iter().all(|t| t.schedule == "17 */12 * * *"));
    }
}
