//! Unsupported operand overrides requested through JSON patch annotations on the HyperConverged.
//!
//! A patch is applied to the desired operand object built by the operator, never to the live
//! object, so every field the patch does not touch stays under operator control.

use std::collections::BTreeMap;

use json_patch::Patch;
use kube::ResourceExt;
use serde::{de::DeserializeOwned, Serialize};
use tracing::*;

use crate::resources::hyperconvergeds::{HyperConverged, CONDITION_TAINTED_CONFIGURATION};
use crate::Metrics;

use super::conditions::{
    ConditionSet, MESSAGE_TAINTED_CONFIGURATION, REASON_TAINTED_CONFIGURATION, STATUS_TRUE,
};

pub const KUBEVIRT_JSON_PATCH_ANNOTATION: &str = "kubevirt.kubevirt.io/jsonpatch";
pub const CDI_JSON_PATCH_ANNOTATION: &str = "cdi.kubevirt.io/jsonpatch";
pub const NETWORK_ADDONS_JSON_PATCH_ANNOTATION: &str = "networkaddonsconfig.kubevirt.io/jsonpatch";

pub const JSON_PATCH_ANNOTATIONS: [&str; 3] = [
    KUBEVIRT_JSON_PATCH_ANNOTATION,
    CDI_JSON_PATCH_ANNOTATION,
    NETWORK_ADDONS_JSON_PATCH_ANNOTATION,
];

#[derive(Clone, Debug)]
enum PatchState {
    /// Not valid JSON patch
    Invalid,
    Valid {
        patch: Patch,
        /// Could not be applied to the desired object in this pass
        failed: bool,
    },
}

/// Per-annotation patches of one reconcile pass
#[derive(Clone, Debug, Default)]
pub struct JsonPatchAnnotations {
    patches: BTreeMap<&'static str, PatchState>,
}

impl JsonPatchAnnotations {
    pub fn from_annotations(hc: &HyperConverged) -> Self {
        let annotations = hc.annotations();
        let patches = JSON_PATCH_ANNOTATIONS
            .iter()
            .filter_map(|name| {
                let raw = annotations.get(*name)?;
                let state = match serde_json::from_str::<Patch>(raw) {
                    Ok(patch) => PatchState::Valid {
                        patch,
                        failed: false,
                    },
                    Err(err) => {
                        warn!("ignoring annotation {name}: invalid JSON patch: {err}");
                        PatchState::Invalid
                    }
                };
                Some((*name, state))
            })
            .collect();
        Self { patches }
    }

    /// Apply the patch requested by `annotation` to `desired`.
    ///
    /// Returns `desired` untouched when there is no usable patch.
    pub fn apply<K>(&mut self, annotation: &'static str, desired: K) -> K
    where
        K: Serialize + DeserializeOwned,
    {
        let Some(PatchState::Valid { patch, failed }) = self.patches.get_mut(annotation) else {
            return desired;
        };
        if *failed {
            return desired;
        }
        match apply_patch(&desired, patch) {
            Ok(patched) => patched,
            Err(err) => {
                warn!("ignoring annotation {annotation}: {err}");
                *failed = true;
                desired
            }
        }
    }

    /// Number of patch operations in effect for `annotation`
    pub fn operation_count(&self, annotation: &str) -> usize {
        match self.patches.get(annotation) {
            Some(PatchState::Valid {
                patch,
                failed: false,
            }) => patch.0.len(),
            _ => 0,
        }
    }

    pub fn is_tainted(&self) -> bool {
        JSON_PATCH_ANNOTATIONS
            .iter()
            .any(|annotation| self.operation_count(annotation) > 0)
    }

    /// Publish the per-annotation counters and the TaintedConfiguration condition
    pub fn publish(&self, metrics: &Metrics, conditions: &mut ConditionSet) {
        for annotation in JSON_PATCH_ANNOTATIONS {
            metrics.set_unsafe_modification_count(annotation, self.operation_count(annotation));
        }
        if self.is_tainted() {
            conditions.set(
                CONDITION_TAINTED_CONFIGURATION,
                STATUS_TRUE,
                REASON_TAINTED_CONFIGURATION,
                MESSAGE_TAINTED_CONFIGURATION,
            );
        } else {
            conditions.remove(CONDITION_TAINTED_CONFIGURATION);
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ApplyError {
    #[error("failed to serialize the object: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to apply the patch: {0}")]
    Patch(#[from] json_patch::PatchError),
    #[error("the patched object is invalid: {0}")]
    Deserialize(#[source] serde_json::Error),
}

fn apply_patch<K>(desired: &K, patch: &Patch) -> Result<K, ApplyError>
where
    K: Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(desired).map_err(ApplyError::Serialize)?;
    json_patch::patch(&mut value, &patch.0)?;
    serde_json::from_value(value).map_err(ApplyError::Deserialize)
}
