use std::fmt;

use crate::resources::hyperconvergeds::HyperConverged;

use super::conditions::ConditionSet;
use super::tainted::JsonPatchAnnotations;

/// Key of a reconcile request as produced by the watches
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReconcileRequest {
    pub name: String,
    pub namespace: String,
}

impl ReconcileRequest {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What caused a reconcile of the singleton
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerSource {
    /// The HyperConverged resource itself changed
    Primary,
    /// An operand or auxiliary object changed
    Secondary,
}

/// Working state of a single reconcile pass
pub struct HcoRequest {
    /// Copy of the singleton that is mutated during the pass and written back at the end
    pub instance: HyperConverged,
    pub trigger: TriggerSource,
    /// The singleton had no conditions yet when this pass started
    pub init: bool,
    /// The persisted operator version differs from the target version
    pub upgrade_mode: bool,
    /// Spec or metadata of `instance` must be written back
    pub dirty: bool,
    /// Top-level conditions computed by this pass
    pub conditions: ConditionSet,
    /// Unsupported-feature patches requested through annotations
    pub json_patches: JsonPatchAnnotations,
    /// Cron expression used by the data import cron templates
    pub data_import_schedule: String,
}

impl HcoRequest {
    pub fn new(instance: HyperConverged, trigger: TriggerSource) -> Self {
        let json_patches = JsonPatchAnnotations::from_annotations(&instance);
        Self {
            init: !instance.is_initialized(),
            instance,
            trigger,
            upgrade_mode: false,
            dirty: false,
            conditions: ConditionSet::default(),
            json_patches,
            data_import_schedule: String::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        self.instance
            .metadata
            .namespace
            .as_deref()
            .unwrap_or_default()
    }
}
