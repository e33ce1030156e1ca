use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use rand::distributions::{Alphanumeric, DistString};
use tracing::*;

use crate::controllers::OperatorEnvironment;
use crate::resources::consolequickstarts::ConsoleQuickStart;
use crate::resources::hyperconvergeds::{
    HyperConverged, CONDITION_AVAILABLE, CONDITION_DEGRADED, CONDITION_PROGRESSING,
    CONDITION_RECONCILE_COMPLETE, HCO_VERSION_NAME, HYPERCONVERGED_FINALIZER,
    HYPERCONVERGED_NAME, LEGACY_HYPERCONVERGED_FINALIZER,
};
use crate::{Metrics, Result};

use super::client::ClusterApi;
use super::conditions::{
    aggregate, init_conditions, to_status_conditions, ConditionSet, REASON_INVALID_REQUEST,
    STATUS_FALSE, STATUS_TRUE,
};
use super::events::EventEmitter;
use super::reconcilers::{OperandContext, OperandRegistry, OperandResult, APP_LABEL};
use super::request::{HcoRequest, ReconcileRequest, TriggerSource};
use super::schedule::DataImportSchedule;
use super::{migration, upgrade};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Run another pass soon, independently of watch events
    pub requeue: bool,
}

impl ReconcileResult {
    fn requeue(requeue: bool) -> Self {
        Self { requeue }
    }
}

/// Converges the cluster towards the HyperConverged singleton.
///
/// One instance serves the whole process; passes must not run concurrently.
pub struct HyperConvergedReconciler<C> {
    client: C,
    events: Arc<dyn EventEmitter>,
    metrics: Metrics,
    env: OperatorEnvironment,
    registry: OperandRegistry<C>,
    data_import_schedule: DataImportSchedule,
    secondary_placeholder: ReconcileRequest,
}

impl<C: ClusterApi> HyperConvergedReconciler<C> {
    pub fn new(
        client: C,
        events: Arc<dyn EventEmitter>,
        metrics: Metrics,
        env: OperatorEnvironment,
        quick_starts: Vec<ConsoleQuickStart>,
    ) -> Self {
        let suffix = Alphanumeric
            .sample_string(&mut rand::thread_rng(), 8)
            .to_lowercase();
        let secondary_placeholder = ReconcileRequest::new(
            format!("hco-controlled-cr-{suffix}"),
            env.operator_namespace.clone(),
        );
        Self {
            client,
            events,
            metrics,
            registry: OperandRegistry::new(quick_starts),
            data_import_schedule: DataImportSchedule::default(),
            secondary_placeholder,
            env,
        }
    }

    /// Key used for every change of an operand or auxiliary object
    pub fn secondary_placeholder(&self) -> &ReconcileRequest {
        &self.secondary_placeholder
    }

    /// Key of the only HyperConverged resource that is reconciled
    pub fn singleton(&self) -> ReconcileRequest {
        ReconcileRequest::new(HYPERCONVERGED_NAME, self.env.operator_namespace.clone())
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn environment(&self) -> &OperatorEnvironment {
        &self.env
    }

    pub async fn reconcile(&self, request: &ReconcileRequest) -> Result<ReconcileResult> {
        let trigger = if *request == self.secondary_placeholder {
            TriggerSource::Secondary
        } else if *request == self.singleton() {
            TriggerSource::Primary
        } else {
            return self.reject(request).await;
        };

        let Some(hc) = self
            .client
            .get::<HyperConverged>(Some(&self.env.operator_namespace), HYPERCONVERGED_NAME)
            .await?
        else {
            info!("HyperConverged {HYPERCONVERGED_NAME} not found, nothing to do");
            return Ok(ReconcileResult::default());
        };

        let mut req = HcoRequest::new(hc, trigger);
        if req.instance.metadata.deletion_timestamp.is_some() {
            return self.ensure_deleted(req).await;
        }
        let replaced_finalizer = ensure_metadata(&mut req);
        self.ensure_hco(req, replaced_finalizer).await
    }

    /// Record on a foreign HyperConverged that it is ignored
    async fn reject(&self, request: &ReconcileRequest) -> Result<ReconcileResult> {
        let Some(mut hc) = self
            .client
            .get::<HyperConverged>(Some(&request.namespace), &request.name)
            .await?
        else {
            return Ok(ReconcileResult::default());
        };

        warn!("ignoring HyperConverged {request}: only {} is reconciled", self.singleton());
        let mut conditions = ConditionSet::default();
        conditions.set(
            CONDITION_RECONCILE_COMPLETE,
            STATUS_FALSE,
            REASON_INVALID_REQUEST,
            format!(
                "Request does not match expected name ({HYPERCONVERGED_NAME}) and namespace ({})",
                self.env.operator_namespace
            ),
        );
        let existing = hc
            .status
            .as_ref()
            .and_then(|s| s.conditions.clone())
            .unwrap_or_default();
        let mut updated = to_status_conditions(&existing, &conditions, hc.metadata.generation, &now());
        updated.extend(
            existing
                .into_iter()
                .filter(|c| c.type_ != CONDITION_RECONCILE_COMPLETE),
        );
        hc.status_mut().conditions = Some(updated);
        self.client.update_status(&hc).await?;
        Ok(ReconcileResult::default())
    }

    async fn ensure_deleted(&self, mut req: HcoRequest) -> Result<ReconcileResult> {
        info!("HyperConverged is being deleted, removing operands");
        let ctx = self.operand_context();
        let mut all_gone = true;
        for operand in self.registry.iter() {
            if !operand.ensure_deleted(&req, &ctx).await? {
                debug!("waiting for {} to be removed", operand.component());
                all_gone = false;
            }
        }
        if !all_gone {
            return Ok(ReconcileResult::requeue(true));
        }

        let finalizers = req.instance.finalizers_mut();
        let before = finalizers.len();
        finalizers
            .retain(|f| f != HYPERCONVERGED_FINALIZER && f != LEGACY_HYPERCONVERGED_FINALIZER);
        if finalizers.len() != before {
            info!("all operands removed, releasing the HyperConverged");
            self.client.update(&req.instance).await?;
        }
        Ok(ReconcileResult::default())
    }

    async fn ensure_hco(
        &self,
        mut req: HcoRequest,
        replaced_finalizer: bool,
    ) -> Result<ReconcileResult> {
        let persisted = req.instance.clone();

        req.data_import_schedule = self.data_import_schedule.apply(&mut req.instance);

        if req.init {
            info!("initializing HyperConverged at version {}", self.env.hco_version);
            req.instance
                .status_mut()
                .set_version(HCO_VERSION_NAME, &self.env.hco_version);
        } else {
            req.upgrade_mode = upgrade::is_upgrading(&req.instance, &self.env);
        }

        if req.upgrade_mode {
            info!("upgrading HyperConverged to version {}", self.env.hco_version);
            let mut modified = upgrade::amend_bad_defaults(&mut req.instance);
            modified |= migration::migrate_before_upgrade(
                &mut req,
                &self.client,
                self.events.as_ref(),
                &self.env,
            )
            .await?;
            if modified {
                // operands must be derived from the persisted spec
                self.client.update(&req.instance).await?;
                return Ok(ReconcileResult::requeue(true));
            }
            upgrade::remove_obsolete_resources(
                &mut req.instance,
                &self.client,
                self.registry.quickstart_names(),
            )
            .await?;
        } else {
            migration::remove_legacy_config_map(&mut req, &self.client, self.events.as_ref())
                .await?;
        }

        let ctx = self.operand_context();
        let mut results = Vec::new();
        for operand in self.registry.iter() {
            results.push(operand.ensure(&mut req, &ctx).await);
        }

        track_related_objects(
            &mut req.instance,
            &results,
            self.registry.quickstart_names(),
        );
        let errors: Vec<String> = results
            .iter()
            .filter_map(OperandResult::error_message)
            .collect();
        for error in &errors {
            warn!("{error}");
        }

        req.conditions = if req.init {
            init_conditions(&errors)
        } else {
            aggregate(
                results.iter().map(|r| (r.component, &r.conditions)),
                &errors,
            )
        };
        if req.upgrade_mode {
            upgrade::complete_upgrade(
                &mut req,
                &results,
                &errors,
                self.events.as_ref(),
                &self.env,
            )
            .await;
        }
        req.json_patches.publish(&self.metrics, &mut req.conditions);
        self.emit_readiness_events(&persisted, &req).await;

        let requeue = req.init
            || req.upgrade_mode
            || replaced_finalizer
            || !errors.is_empty()
            || results.iter().any(|r| r.created || r.updated);

        self.write(req, &persisted).await?;
        Ok(ReconcileResult::requeue(requeue))
    }

    async fn emit_readiness_events(&self, persisted: &HyperConverged, req: &HcoRequest) {
        let was_ready = persisted.condition_is(CONDITION_AVAILABLE, STATUS_TRUE)
            && persisted.condition_is(CONDITION_PROGRESSING, STATUS_FALSE)
            && persisted.condition_is(CONDITION_DEGRADED, STATUS_FALSE);
        let is_ready = req.conditions.is_ready();

        if is_ready && !was_ready {
            self.events
                .emit(
                    &req.instance,
                    EventType::Normal,
                    "ReconcileHCO",
                    "HCO Reconcile completed successfully",
                )
                .await;
        } else if was_ready && !is_ready && !req.upgrade_mode {
            self.events
                .emit(
                    &req.instance,
                    EventType::Warning,
                    "ReconcileHCO",
                    "Not all the operators are ready",
                )
                .await;
        }
    }

    /// Persist metadata and spec when they changed, then the status
    async fn write(&self, mut req: HcoRequest, persisted: &HyperConverged) -> Result<()> {
        let generation = req.instance.metadata.generation;
        let existing = persisted
            .status
            .as_ref()
            .and_then(|s| s.conditions.clone())
            .unwrap_or_default();
        let conditions = to_status_conditions(&existing, &req.conditions, generation, &now());
        let status = req.instance.status_mut();
        status.conditions = Some(conditions);
        status.observed_generation = generation;

        if req.dirty {
            let status = req.instance.status.take();
            req.instance = self.client.update(&req.instance).await?;
            req.instance.status = status;
        }
        if req.instance.status != persisted.status {
            self.client.update_status(&req.instance).await?;
        }
        Ok(())
    }

    fn operand_context(&self) -> OperandContext<'_, C> {
        OperandContext {
            client: &self.client,
            metrics: &self.metrics,
            env: &self.env,
        }
    }
}

/// Make the finalizers exactly ours and restore the app label.
///
/// Returns true when a finalizer of an older release was replaced.
fn ensure_metadata(req: &mut HcoRequest) -> bool {
    let finalizers = req.instance.finalizers_mut();
    let replaced = finalizers
        .iter()
        .any(|f| f == LEGACY_HYPERCONVERGED_FINALIZER);
    if finalizers.as_slice() != [HYPERCONVERGED_FINALIZER] {
        debug!("setting finalizers to [{HYPERCONVERGED_FINALIZER}]");
        *finalizers = vec![HYPERCONVERGED_FINALIZER.to_string()];
        req.dirty = true;
    }

    let name = req.instance.name_any();
    let labels: &mut BTreeMap<String, String> = req.instance.labels_mut();
    if labels.get(APP_LABEL) != Some(&name) {
        labels.insert(APP_LABEL.to_string(), name);
        req.dirty = true;
    }
    replaced
}

/// Point the related objects at the operands as they are after this pass. Operands that are
/// missing and quickstarts that are no longer deployed are dropped.
fn track_related_objects(
    hc: &mut HyperConverged,
    results: &[OperandResult],
    quickstart_names: &[String],
) {
    let quickstart_kind = ConsoleQuickStart::kind(&());
    let status = hc.status_mut();
    status.remove_related_objects(|r| {
        r.kind.as_deref() == Some(&*quickstart_kind)
            && !r.name.as_ref().is_some_and(|name| quickstart_names.contains(name))
    });
    for result in results {
        if let Some(reference) = &result.related_object {
            status.set_related_object(reference.clone());
        } else if result.missing {
            status.remove_related_objects(|r| {
                r.kind.as_deref() == Some(result.kind.as_str())
                    && r.name.as_deref() == Some(result.name.as_str())
            });
        }
    }
}

fn now() -> Time {
    Time(Utc::now())
}
