//! Plain Kubernetes objects deployed next to the operands.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::controllers::OperatorEnvironment;

use super::super::request::HcoRequest;
use super::{object_meta, OperandHooks};

pub const STORAGE_CLASS_DEFAULTS_NAME: &str = "kubevirt-storage-class-defaults";
pub const METRICS_SERVICE_NAME: &str = "kubevirt-hyperconverged-operator-metrics";

const OPERATOR_POD_SELECTOR: (&str, &str) = ("name", "hyperconverged-cluster-operator");
const METRICS_PORT_NAME: &str = "http-metrics";
const METRICS_PORT: i32 = 8383;

/// Access and volume modes CDI falls back to for storage classes without their own entry
pub struct StorageClassDefaultsHooks;

impl OperandHooks for StorageClassDefaultsHooks {
    type Object = ConfigMap;

    fn component(&self) -> &'static str {
        "StorageClassDefaults"
    }

    fn desired(&self, req: &HcoRequest, env: &OperatorEnvironment) -> ConfigMap {
        ConfigMap {
            metadata: object_meta(
                &req.instance,
                env,
                STORAGE_CLASS_DEFAULTS_NAME,
                true,
                "storage",
            ),
            data: Some(BTreeMap::from([
                ("accessMode".to_string(), "ReadWriteOnce".to_string()),
                ("volumeMode".to_string(), "Filesystem".to_string()),
            ])),
            ..Default::default()
        }
    }

    fn reconcile_managed(&self, desired: &ConfigMap, existing: &mut ConfigMap) -> bool {
        if existing.data == desired.data {
            return false;
        }
        existing.data = desired.data.clone();
        true
    }
}

/// Service in front of the operator's own metrics endpoint
pub struct MetricsServiceHooks;

impl OperandHooks for MetricsServiceHooks {
    type Object = Service;

    fn component(&self) -> &'static str {
        "MetricsService"
    }

    fn desired(&self, req: &HcoRequest, env: &OperatorEnvironment) -> Service {
        let (key, value) = OPERATOR_POD_SELECTOR;
        Service {
            metadata: object_meta(&req.instance, env, METRICS_SERVICE_NAME, true, "monitoring"),
            spec: Some(ServiceSpec {
                selector: Some(BTreeMap::from([(key.to_string(), value.to_string())])),
                ports: Some(vec![ServicePort {
                    name: Some(METRICS_PORT_NAME.into()),
                    port: METRICS_PORT,
                    protocol: Some("TCP".into()),
                    target_port: Some(IntOrString::Int(METRICS_PORT)),
                    ..Default::default()
                }]),
                type_: Some("ClusterIP".into()),
                ..Default::default()
            }),
            status: None,
        }
    }

    // the API server fills in cluster IPs and other defaults, so only selector and ports are owned
    fn reconcile_managed(&self, desired: &Service, existing: &mut Service) -> bool {
        let desired = desired.spec.clone().unwrap_or_default();
        let spec = existing.spec.get_or_insert_with(ServiceSpec::default);
        let mut changed = false;
        if spec.selector != desired.selector {
            spec.selector = desired.selector;
            changed = true;
        }
        if spec.ports != desired.ports {
            spec.ports = desired.ports;
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::hyperconverged::request::TriggerSource;
    use crate::testing::hco;

    #[test]
    fn storage_defaults_data_is_restored() {
        let req = HcoRequest::new(hco(), TriggerSource::Primary);
        let desired = StorageClassDefaultsHooks.desired(&req, &OperatorEnvironment::default());
        let mut existing = desired.clone();
        existing
            .data
            .get_or_insert_with(Default::default)
            .insert("accessMode".into(), "ReadWriteMany".into());

        assert!(StorageClassDefaultsHooks.reconcile_managed(&desired, &mut existing));
        assert_eq!(existing.data, desired.data);
        assert!(!StorageClassDefaultsHooks.reconcile_managed(&desired, &mut existing));
    }

    #[test]
    fn metrics_service_keeps_server_fields() {
        let req = HcoRequest::new(hco(), TriggerSource::Primary);
        let desired = MetricsServiceHooks.desired(&req, &OperatorEnvironment::default());
        let mut existing = desired.clone();
        if let Some(spec) = existing.spec.as_mut() {
            spec.cluster_ip = Some("10.0.0.12".into());
        }

        assert!(!MetricsServiceHooks.reconcile_managed(&desired, &mut existing));

        if let Some(spec) = existing.spec.as_mut() {
            spec.selector = Some(BTreeMap::from([("name".to_string(), "other".to_string())]));
        }
        assert!(MetricsServiceHooks.reconcile_managed(&desired, &mut existing));
        let spec = existing.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("10.0.0.12"));
        assert_eq!(spec.selector, desired.spec.unwrap().selector);
    }
}
