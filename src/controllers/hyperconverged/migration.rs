//! One-shot adoption of configuration that predates the HyperConverged spec.
//!
//! Old releases configured live migration through the `kubevirt-config` ConfigMap. On upgrade
//! its `migrations` tunables are copied into the HC spec, the map is backed up as
//! `kubevirt-config-backup` and then removed. CDI settings made directly on the CDI resource are
//! adopted the same way.

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::events::EventType;
use serde::Deserialize;
use tracing::*;

use crate::controllers::OperatorEnvironment;
use crate::resources::cdis::CDI;
use crate::resources::hyperconvergeds::{HyperConvergedSpec, OperandResourceRequirements};
use crate::Result;

use super::client::ClusterApi;
use super::events::EventEmitter;
use super::reconcilers::cdi::CDI_NAME;
use super::reconcilers::mandatory_labels;
use super::request::HcoRequest;

pub const LEGACY_CONFIG_MAP: &str = "kubevirt-config";
pub const LEGACY_CONFIG_MAP_BACKUP: &str = "kubevirt-config-backup";
pub const MIGRATIONS_KEY: &str = "migrations";

/// Live migration tunables as stored in the legacy ConfigMap
#[derive(Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
struct LegacyMigrations {
    parallel_migrations_per_cluster: Option<u32>,
    parallel_outbound_migrations_per_node: Option<u32>,
    bandwidth_per_migration: Option<String>,
    #[serde(rename = "completionTimeoutPerGiB")]
    completion_timeout_per_gib: Option<i64>,
    progress_timeout: Option<i64>,
}

fn adopt<T: PartialEq>(target: &mut Option<T>, legacy: Option<T>) -> bool {
    match legacy {
        Some(value) if target.as_ref() != Some(&value) => {
            *target = Some(value);
            true
        }
        _ => false,
    }
}

/// Copy legacy values into the spec; a legacy value replaces a different spec value
fn adopt_legacy_migrations(spec: &mut HyperConvergedSpec, legacy: LegacyMigrations) -> bool {
    let config = &mut spec.live_migration_config;
    let mut modified = adopt(
        &mut config.parallel_migrations_per_cluster,
        legacy.parallel_migrations_per_cluster,
    );
    modified |= adopt(
        &mut config.parallel_outbound_migrations_per_node,
        legacy.parallel_outbound_migrations_per_node,
    );
    modified |= adopt(
        &mut config.bandwidth_per_migration,
        legacy.bandwidth_per_migration,
    );
    modified |= adopt(
        &mut config.completion_timeout_per_gib,
        legacy.completion_timeout_per_gib,
    );
    modified |= adopt(&mut config.progress_timeout, legacy.progress_timeout);
    modified
}

/// Run every migration that must happen before operands are upgraded.
///
/// Returns true when the HC spec was modified and must be written before going on.
pub async fn migrate_before_upgrade<C: ClusterApi>(
    req: &mut HcoRequest,
    client: &C,
    events: &dyn EventEmitter,
    env: &OperatorEnvironment,
) -> Result<bool> {
    let mut modified = adopt_cdi_config(req, client).await?;
    modified |= migrate_legacy_config_map(req, client, events, env).await?;
    Ok(modified)
}

/// Copy storage settings made on the CDI resource into fields the HC leaves unset
async fn adopt_cdi_config<C: ClusterApi>(req: &mut HcoRequest, client: &C) -> Result<bool> {
    let Some(cdi) = client.get::<CDI>(None, CDI_NAME).await? else {
        return Ok(false);
    };
    let Some(config) = cdi.spec.config else {
        return Ok(false);
    };

    let spec = &mut req.instance.spec;
    let mut modified = false;
    if spec.scratch_space_storage_class.is_none() && config.scratch_space_storage_class.is_some() {
        spec.scratch_space_storage_class = config.scratch_space_storage_class;
        modified = true;
    }
    let storage_workloads = spec
        .resource_requirements
        .as_ref()
        .and_then(|r| r.storage_workloads.as_ref());
    if storage_workloads.is_none() && config.pod_resource_requirements.is_some() {
        spec.resource_requirements
            .get_or_insert_with(OperandResourceRequirements::default)
            .storage_workloads = config.pod_resource_requirements;
        modified = true;
    }
    if modified {
        info!("adopted CDI storage configuration into the HyperConverged spec");
    }
    Ok(modified)
}

async fn migrate_legacy_config_map<C: ClusterApi>(
    req: &mut HcoRequest,
    client: &C,
    events: &dyn EventEmitter,
    env: &OperatorEnvironment,
) -> Result<bool> {
    let namespace = req.namespace().to_string();
    let Some(legacy) = client
        .get::<ConfigMap>(Some(&namespace), LEGACY_CONFIG_MAP)
        .await?
    else {
        return Ok(false);
    };

    if client
        .get::<ConfigMap>(Some(&namespace), LEGACY_CONFIG_MAP_BACKUP)
        .await?
        .is_none()
    {
        let backup = ConfigMap {
            metadata: ObjectMeta {
                name: Some(LEGACY_CONFIG_MAP_BACKUP.into()),
                namespace: Some(namespace.clone()),
                labels: Some(mandatory_labels(&req.instance, env, "compute")),
                ..Default::default()
            },
            data: legacy.data.clone(),
            binary_data: legacy.binary_data.clone(),
            ..Default::default()
        };
        client.create(&backup).await?;
        events
            .emit(
                &req.instance,
                EventType::Normal,
                "Created",
                &format!("Created ConfigMap {LEGACY_CONFIG_MAP_BACKUP}"),
            )
            .await;
    }

    let raw = legacy
        .data
        .as_ref()
        .and_then(|data| data.get(MIGRATIONS_KEY));
    let modified = match raw.map(|raw| serde_yaml::from_str::<LegacyMigrations>(raw)) {
        Some(Ok(migrations)) => adopt_legacy_migrations(&mut req.instance.spec, migrations),
        Some(Err(err)) => {
            warn!("failed to parse {MIGRATIONS_KEY} of ConfigMap {LEGACY_CONFIG_MAP}: {err}");
            events
                .emit(
                    &req.instance,
                    EventType::Warning,
                    "InvalidConfiguration",
                    &format!("Failed to parse ConfigMap {LEGACY_CONFIG_MAP}: {err}"),
                )
                .await;
            false
        }
        None => false,
    };

    if modified {
        info!("adopted live migration configuration from ConfigMap {LEGACY_CONFIG_MAP}");
        // removed on the next pass, once the adopted spec is persisted
        return Ok(true);
    }

    remove_legacy_config_map(req, client, events).await?;
    Ok(false)
}

/// Delete the legacy ConfigMap, if any, and forget its reference.
///
/// Outside of an upgrade the HC spec is authoritative, so a leftover map is removed without backup.
pub async fn remove_legacy_config_map<C: ClusterApi>(
    req: &mut HcoRequest,
    client: &C,
    events: &dyn EventEmitter,
) -> Result<()> {
    let namespace = req.namespace().to_string();
    if client
        .delete::<ConfigMap>(Some(&namespace), LEGACY_CONFIG_MAP)
        .await?
    {
        info!("removed ConfigMap {LEGACY_CONFIG_MAP}");
        events
            .emit(
                &req.instance,
                EventType::Normal,
                "Killing",
                &format!("Removed ConfigMap {LEGACY_CONFIG_MAP}"),
            )
            .await;
    }
    if let Some(status) = req.instance.status.as_mut() {
        status.remove_related_objects(|r| {
            r.kind.as_deref() == Some("ConfigMap") && r.name.as_deref() == Some(LEGACY_CONFIG_MAP)
        });
    }
    Ok(())
}
