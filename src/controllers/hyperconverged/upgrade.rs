//! Upgrade state machine of the HyperConverged singleton.
//!
//! The installation is upgrading while the operator version persisted in the HC status differs
//! from the version this process drives to. Obsolete API surface is only removed in that window,
//! and the persisted version is bumped once every operand reports the new version and is ready.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::error::ErrorResponse;
use kube::runtime::events::EventType;
use tracing::*;

use crate::controllers::OperatorEnvironment;
use crate::resources::consolequickstarts::ConsoleQuickStart;
use crate::resources::hyperconvergeds::{
    HyperConverged, CONDITION_PROGRESSING, CONDITION_UPGRADEABLE, HCO_VERSION_NAME,
    HYPERCONVERGED_CRD_NAME,
};
use crate::Result;

use super::client::ClusterApi;
use super::conditions::{
    MESSAGE_UPGRADEABLE_UPGRADING, REASON_UPGRADEABLE_UPGRADING, REASON_UPGRADING, STATUS_FALSE,
    STATUS_TRUE,
};
use super::events::EventEmitter;
use super::reconcilers::{managed_selector, OperandResult};
use super::request::HcoRequest;

/// Default written by old releases that turned out to throttle migrations
const BAD_BANDWIDTH_PER_MIGRATION: &str = "64Mi";

const DEPRECATED_STORED_VERSIONS: [&str; 1] = ["v1alpha1"];
const SERVED_VERSION: &str = "v1beta1";

const DEPRECATED_CRDS: [&str; 11] = [
    "vmimportconfigs.v2v.kubevirt.io",
    "v2vvmwares.v2v.kubevirt.io",
    "ovirtproviders.v2v.kubevirt.io",
    "kubevirtcommontemplatesbundles.ssp.kubevirt.io",
    "kubevirtmetricsaggregations.ssp.kubevirt.io",
    "kubevirtnodelabellerbundles.ssp.kubevirt.io",
    "kubevirttemplatevalidators.ssp.kubevirt.io",
    "kubevirtcommontemplatesbundles.kubevirt.io",
    "kubevirtmetricsaggregations.kubevirt.io",
    "kubevirtnodelabellerbundles.kubevirt.io",
    "kubevirttemplatevalidators.kubevirt.io",
];

const DEPRECATED_RELATED_KINDS: [&str; 5] = [
    "VMImportConfig",
    "KubevirtCommonTemplatesBundle",
    "KubevirtNodeLabellerBundle",
    "KubevirtTemplateValidator",
    "KubevirtMetricsAggregation",
];

/// True while the persisted operator version differs from the target version
pub fn is_upgrading(hc: &HyperConverged, env: &OperatorEnvironment) -> bool {
    hc.status
        .as_ref()
        .and_then(|s| s.version(HCO_VERSION_NAME))
        != Some(env.hco_version.as_str())
}

/// Drop spec values that were defaults of older releases; true if the spec changed
pub fn amend_bad_defaults(hc: &mut HyperConverged) -> bool {
    let bandwidth = &mut hc.spec.live_migration_config.bandwidth_per_migration;
    if bandwidth.as_deref() == Some(BAD_BANDWIDTH_PER_MIGRATION) {
        info!("dropping obsolete default bandwidthPerMigration {BAD_BANDWIDTH_PER_MIGRATION}");
        *bandwidth = None;
        return true;
    }
    false
}

/// Remove API surface older releases installed and this one no longer serves
pub async fn remove_obsolete_resources<C: ClusterApi>(
    hc: &mut HyperConverged,
    client: &C,
    quickstart_names: &[String],
) -> Result<()> {
    remove_deprecated_stored_versions(client).await?;
    remove_deprecated_crds(hc, client).await?;
    remove_deprecated_quickstarts(hc, client, quickstart_names).await
}

async fn remove_deprecated_stored_versions<C: ClusterApi>(client: &C) -> Result<()> {
    let Some(mut crd) = client
        .get::<CustomResourceDefinition>(None, HYPERCONVERGED_CRD_NAME)
        .await?
    else {
        return Ok(());
    };
    let Some(stored) = crd
        .status
        .as_mut()
        .and_then(|s| s.stored_versions.as_mut())
    else {
        return Ok(());
    };
    if !stored
        .iter()
        .any(|v| DEPRECATED_STORED_VERSIONS.contains(&v.as_str()))
    {
        return Ok(());
    }

    stored.retain(|v| !DEPRECATED_STORED_VERSIONS.contains(&v.as_str()));
    if !stored.iter().any(|v| v == SERVED_VERSION) {
        stored.push(SERVED_VERSION.to_string());
    }
    info!("removing deprecated stored versions from CRD {HYPERCONVERGED_CRD_NAME}");
    client.update_status(&crd).await?;
    Ok(())
}

async fn remove_deprecated_crds<C: ClusterApi>(hc: &mut HyperConverged, client: &C) -> Result<()> {
    for name in DEPRECATED_CRDS {
        if client
            .delete::<CustomResourceDefinition>(None, name)
            .await?
        {
            info!("removed deprecated CRD {name}");
        }
    }
    if let Some(status) = hc.status.as_mut() {
        status.remove_related_objects(|r| {
            r.kind
                .as_deref()
                .is_some_and(|kind| DEPRECATED_RELATED_KINDS.contains(&kind))
        });
    }
    Ok(())
}

async fn remove_deprecated_quickstarts<C: ClusterApi>(
    hc: &mut HyperConverged,
    client: &C,
    quickstart_names: &[String],
) -> Result<()> {
    let installed = match client
        .list::<ConsoleQuickStart>(None, &managed_selector(hc))
        .await
    {
        Ok(installed) => installed,
        // not an OpenShift cluster
        Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    for quickstart in installed {
        let Some(name) = quickstart.metadata.name else {
            continue;
        };
        if quickstart_names.contains(&name) {
            continue;
        }
        if client.delete::<ConsoleQuickStart>(None, &name).await? {
            info!("removed deprecated ConsoleQuickStart {name}");
        }
        if let Some(status) = hc.status.as_mut() {
            status.remove_related_objects(|r| {
                r.kind.as_deref() == Some("ConsoleQuickStart") && r.name.as_ref() == Some(&name)
            });
        }
    }
    Ok(())
}

/// Bump the persisted version once every operand runs the target version and is ready,
/// otherwise report the upgrade as in progress.
pub async fn complete_upgrade(
    req: &mut HcoRequest,
    results: &[OperandResult],
    errors: &[String],
    events: &dyn EventEmitter,
    env: &OperatorEnvironment,
) {
    let target = env.hco_version.as_str();
    let done = errors.is_empty()
        && req.conditions.is_ready()
        && results.iter().all(|r| r.upgrade_done);

    if done {
        info!("upgrade to version {target} completed");
        req.instance
            .status_mut()
            .set_version(HCO_VERSION_NAME, target);
        req.upgrade_mode = false;
        events
            .emit(
                &req.instance,
                EventType::Normal,
                "UpgradeHCO",
                &format!("Successfully upgraded to version {target}"),
            )
            .await;
        return;
    }

    if let Some(pending) = results.iter().find(|r| !r.upgrade_done) {
        debug!("upgrade to {target} waits for {} {}", pending.kind, pending.name);
    }
    req.conditions.set(
        CONDITION_PROGRESSING,
        STATUS_TRUE,
        REASON_UPGRADING,
        format!("HCO is now upgrading to version {target}"),
    );
    req.conditions.set(
        CONDITION_UPGRADEABLE,
        STATUS_FALSE,
        REASON_UPGRADEABLE_UPGRADING,
        MESSAGE_UPGRADEABLE_UPGRADING,
    );
}
