use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::*;

use crate::controllers::OperatorEnvironment;
use crate::resources::consolequickstarts::ConsoleQuickStart;
use crate::resources::hyperconvergeds::HyperConverged;
use crate::Metrics;

use super::client::{ApiObject, ClusterApi};
use super::conditions::ComponentConditions;
use super::request::{HcoRequest, TriggerSource};

pub mod auxiliary;
pub mod cdi;
pub mod kubevirt;
pub mod network_addons;
pub mod quickstarts;
pub mod ssp;

pub const APP_LABEL: &str = "app";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "hco-operator";
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
pub const PART_OF_VALUE: &str = "hyperconverged-cluster";
pub const VERSION_LABEL: &str = "app.kubernetes.io/version";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

// labels applied to everything the operator creates; the app label also selects
// objects for the secondary watches
pub fn mandatory_labels(
    hc: &HyperConverged,
    env: &OperatorEnvironment,
    component: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from_iter([
        (APP_LABEL.into(), hc.name_any()),
        (MANAGED_BY_LABEL.into(), MANAGED_BY_VALUE.into()),
        (PART_OF_LABEL.into(), PART_OF_VALUE.into()),
        (VERSION_LABEL.into(), env.hco_version.clone()),
        (COMPONENT_LABEL.into(), component.into()),
    ])
}

/// Label selector matching every object labelled by `mandatory_labels` for this HC
pub fn managed_selector(hc: &HyperConverged) -> String {
    format!(
        "{APP_LABEL}={},{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}",
        hc.name_any()
    )
}

/// Metadata for an operator-managed object. Namespaced objects live in the operator namespace
/// and are owned by the HC; cluster scoped ones can only be tied to it through labels.
pub fn object_meta(
    hc: &HyperConverged,
    env: &OperatorEnvironment,
    name: impl Into<String>,
    namespaced: bool,
    component: &str,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: namespaced.then(|| env.operator_namespace.clone()),
        labels: Some(mandatory_labels(hc, env, component)),
        owner_references: if namespaced {
            hc.controller_owner_ref(&()).map(|oref| vec![oref])
        } else {
            None
        },
        ..Default::default()
    }
}

/// Bring labels and owner references of `existing` in line with `desired`.
/// Labels and owners added by others are kept.
pub fn reconcile_metadata(desired: &ObjectMeta, existing: &mut ObjectMeta) -> bool {
    let mut changed = false;
    if let Some(labels) = &desired.labels {
        let current = existing.labels.get_or_insert_with(Default::default);
        for (key, value) in labels {
            if current.get(key) != Some(value) {
                current.insert(key.clone(), value.clone());
                changed = true;
            }
        }
    }
    if let Some(owners) = &desired.owner_references {
        let current = existing.owner_references.get_or_insert_with(Default::default);
        for owner in owners {
            if !current.iter().any(|o| o.uid == owner.uid) {
                current.push(owner.clone());
                changed = true;
            }
        }
    }
    changed
}

/// Overwrite `current` with `desired` unless they are already equal; true if it was overwritten
pub fn replace_if_changed<T: PartialEq>(current: &mut T, desired: T) -> bool {
    if *current == desired {
        return false;
    }
    *current = desired;
    true
}

pub fn object_reference<K: ApiObject>(obj: &K) -> ObjectReference {
    ObjectReference {
        api_version: Some(K::api_version(&()).into_owned()),
        kind: Some(K::kind(&()).into_owned()),
        name: Some(obj.name_any()),
        namespace: obj.namespace(),
        resource_version: obj.resource_version(),
        uid: obj.uid(),
        ..Default::default()
    }
}

/// Why an operand could not be converged
#[derive(Debug)]
pub enum OperandError {
    /// The object could not be read or created; nothing about it is known
    Fatal(kube::Error),
    /// The object exists but could not be updated; its last known state is still used
    Transient(kube::Error),
}

impl fmt::Display for OperandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandError::Fatal(err) | OperandError::Transient(err) => err.fmt(f),
        }
    }
}

/// Outcome of converging one operand
#[derive(Debug)]
pub struct OperandResult {
    pub component: &'static str,
    pub kind: String,
    pub name: String,
    pub created: bool,
    pub updated: bool,
    /// An update reverted a change made by someone else
    pub overwritten: bool,
    /// Observed version equals the target and the operand is ready
    pub upgrade_done: bool,
    pub conditions: ComponentConditions,
    pub related_object: Option<ObjectReference>,
    /// The object is known not to exist at the end of the pass
    pub missing: bool,
    pub error: Option<OperandError>,
}

impl OperandResult {
    pub fn error_message(&self) -> Option<String> {
        self.error
            .as_ref()
            .map(|err| format!("failed to reconcile {} {}: {err}", self.kind, self.name))
    }
}

/// Everything a handler needs besides the request
pub struct OperandContext<'a, C> {
    pub client: &'a C,
    pub metrics: &'a Metrics,
    pub env: &'a OperatorEnvironment,
}

#[async_trait]
pub trait Operand<C: ClusterApi>: Send + Sync {
    fn component(&self) -> &'static str;

    /// Create or update the operand so that it matches the HC
    async fn ensure(&self, req: &mut HcoRequest, ctx: &OperandContext<'_, C>) -> OperandResult;

    /// Delete the operand; returns true once it is gone
    async fn ensure_deleted(
        &self,
        req: &HcoRequest,
        ctx: &OperandContext<'_, C>,
    ) -> Result<bool, kube::Error>;
}

/// Per-kind knowledge plugged into the generic `OperandHandler`
pub trait OperandHooks: Send + Sync + 'static {
    type Object: ApiObject;

    /// Name used in condition reasons, e.g. `KubeVirt`
    fn component(&self) -> &'static str;

    /// Desired object, derived from the HC and the environment only
    fn desired(&self, req: &HcoRequest, env: &OperatorEnvironment) -> Self::Object;

    fn json_patch_annotation(&self) -> Option<&'static str> {
        None
    }

    /// Copy the managed fields of `desired` into `existing`; true if anything changed
    fn reconcile_managed(&self, desired: &Self::Object, existing: &mut Self::Object) -> bool;

    fn conditions(&self, _obj: &Self::Object) -> ComponentConditions {
        ComponentConditions::NotTracked
    }

    fn observed_version(&self, _obj: &Self::Object) -> Option<String> {
        None
    }

    fn target_version<'a>(&self, _env: &'a OperatorEnvironment) -> Option<&'a str> {
        None
    }
}

pub struct OperandHandler<H> {
    hooks: H,
}

impl<H: OperandHooks> OperandHandler<H> {
    pub fn new(hooks: H) -> Self {
        Self { hooks }
    }

    fn desired(&self, req: &mut HcoRequest, env: &OperatorEnvironment) -> H::Object {
        let desired = self.hooks.desired(req, env);
        match self.hooks.json_patch_annotation() {
            Some(annotation) => req.json_patches.apply(annotation, desired),
            None => desired,
        }
    }

    fn upgrade_done(
        &self,
        obj: &H::Object,
        conditions: &ComponentConditions,
        env: &OperatorEnvironment,
    ) -> bool {
        match self.hooks.target_version(env) {
            Some(target) => {
                self.hooks.observed_version(obj).as_deref() == Some(target)
                    && conditions.is_ready()
            }
            None => true,
        }
    }
}

#[async_trait]
impl<C: ClusterApi, H: OperandHooks> Operand<C> for OperandHandler<H> {
    fn component(&self) -> &'static str {
        self.hooks.component()
    }

    async fn ensure(&self, req: &mut HcoRequest, ctx: &OperandContext<'_, C>) -> OperandResult {
        let desired = self.desired(req, ctx.env);
        let kind = H::Object::kind(&()).into_owned();
        let name = desired.name_any();
        let namespace = desired.namespace();

        let mut result = OperandResult {
            component: self.hooks.component(),
            kind: kind.clone(),
            name: name.clone(),
            created: false,
            updated: false,
            overwritten: false,
            upgrade_done: false,
            conditions: self.hooks.conditions(&desired),
            related_object: None,
            missing: false,
            error: None,
        };

        let existing = match ctx
            .client
            .get::<H::Object>(namespace.as_deref(), &name)
            .await
        {
            Ok(existing) => existing,
            Err(err) => {
                warn!("failed to read {kind} {name}: {err}");
                result.error = Some(OperandError::Fatal(err));
                return result;
            }
        };

        let Some(mut existing) = existing else {
            info!("creating {kind} {name}");
            match ctx.client.create(&desired).await {
                Ok(created) => {
                    result.created = true;
                    result.conditions = self.hooks.conditions(&created);
                    result.upgrade_done = self.upgrade_done(&created, &result.conditions, ctx.env);
                    result.related_object = Some(object_reference(&created));
                }
                Err(err) => {
                    warn!("failed to create {kind} {name}: {err}");
                    result.missing = true;
                    result.error = Some(OperandError::Fatal(err));
                }
            }
            return result;
        };

        let metadata_changed = reconcile_metadata(desired.meta(), existing.meta_mut());
        let spec_changed = self.hooks.reconcile_managed(&desired, &mut existing);
        if metadata_changed || spec_changed {
            info!("updating {kind} {name} to its desired state");
            match ctx.client.update(&existing).await {
                Ok(updated) => {
                    result.updated = true;
                    if req.trigger == TriggerSource::Secondary {
                        info!("reverted an out-of-band modification of {kind} {name}");
                        result.overwritten = true;
                        ctx.metrics.inc_overwritten_modifications(&kind, &name);
                    }
                    existing = updated;
                }
                Err(err) => {
                    warn!("failed to update {kind} {name}: {err}");
                    result.error = Some(OperandError::Transient(err));
                }
            }
        }

        result.conditions = self.hooks.conditions(&existing);
        result.upgrade_done = self.upgrade_done(&existing, &result.conditions, ctx.env);
        result.related_object = Some(object_reference(&existing));
        result
    }

    async fn ensure_deleted(
        &self,
        req: &HcoRequest,
        ctx: &OperandContext<'_, C>,
    ) -> Result<bool, kube::Error> {
        let desired = self.hooks.desired(req, ctx.env);
        let name = desired.name_any();
        let namespace = desired.namespace();
        if ctx
            .client
            .delete::<H::Object>(namespace.as_deref(), &name)
            .await?
        {
            debug!("deleted {} {name}", H::Object::kind(&()));
        }
        Ok(ctx
            .client
            .get::<H::Object>(namespace.as_deref(), &name)
            .await?
            .is_none())
    }
}

/// Operands in the order they are converged; the aggregator relies on this order
pub struct OperandRegistry<C> {
    operands: Vec<Box<dyn Operand<C>>>,
    quickstart_names: Vec<String>,
}

impl<C: ClusterApi> OperandRegistry<C> {
    pub fn new(quick_starts: Vec<ConsoleQuickStart>) -> Self {
        let quickstart_names = quick_starts.iter().map(|q| q.name_any()).collect();
        let mut operands: Vec<Box<dyn Operand<C>>> = vec![
            Box::new(OperandHandler::new(kubevirt::KubeVirtHooks)),
            Box::new(OperandHandler::new(cdi::CdiHooks)),
            Box::new(OperandHandler::new(network_addons::NetworkAddonsHooks)),
            Box::new(OperandHandler::new(ssp::SspHooks)),
            Box::new(OperandHandler::new(auxiliary::StorageClassDefaultsHooks)),
            Box::new(OperandHandler::new(auxiliary::MetricsServiceHooks)),
        ];
        operands.extend(quick_starts.into_iter().map(|template| {
            Box::new(OperandHandler::new(quickstarts::QuickStartHooks::new(template)))
                as Box<dyn Operand<C>>
        }));
        Self {
            operands,
            quickstart_names,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Operand<C>> {
        self.operands.iter().map(|operand| operand.as_ref())
    }

    /// Names of the ConsoleQuickStarts this operator release deploys
    pub fn quickstart_names(&self) -> &[String] {
        &self.quickstart_names
    }
}
