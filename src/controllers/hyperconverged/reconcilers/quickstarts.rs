use std::fs;
use std::path::Path;

use kube::ResourceExt;
use tracing::*;

use crate::controllers::OperatorEnvironment;
use crate::resources::consolequickstarts::ConsoleQuickStart;
use crate::{Error, Result};

use super::super::request::HcoRequest;
use super::{object_meta, OperandHooks};

/// Read every ConsoleQuickStart manifest (`*.yaml`, `*.yml`) in `dir`, sorted by file name
pub fn load_quickstarts(dir: &Path) -> Result<Vec<ConsoleQuickStart>> {
    let entries = fs::read_dir(dir).map_err(|source| Error::QuickStartDirectory {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| Error::QuickStartDirectory {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if path.is_file() && is_yaml {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let raw = fs::read_to_string(&path).map_err(|source| Error::QuickStartDirectory {
                path: path.clone(),
                source,
            })?;
            let quickstart: ConsoleQuickStart = serde_yaml::from_str(&raw)
                .map_err(|source| Error::InvalidQuickStart { path: path.clone(), source })?;
            debug!("loaded ConsoleQuickStart {} from {path:?}", quickstart.name_any());
            Ok(quickstart)
        })
        .collect()
}

/// Deploys one ConsoleQuickStart loaded from disk
pub struct QuickStartHooks {
    template: ConsoleQuickStart,
}

impl QuickStartHooks {
    pub fn new(template: ConsoleQuickStart) -> Self {
        Self { template }
    }
}

impl OperandHooks for QuickStartHooks {
    type Object = ConsoleQuickStart;

    fn component(&self) -> &'static str {
        "ConsoleQuickStart"
    }

    fn desired(&self, req: &HcoRequest, env: &OperatorEnvironment) -> ConsoleQuickStart {
        let mut metadata = object_meta(
            &req.instance,
            env,
            self.template.name_any(),
            false,
            "compute",
        );
        if let (Some(labels), Some(own)) = (
            self.template.metadata.labels.as_ref(),
            metadata.labels.as_mut(),
        ) {
            for (key, value) in labels {
                own.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        metadata.annotations = self.template.metadata.annotations.clone();

        ConsoleQuickStart {
            metadata,
            spec: self.template.spec.clone(),
        }
    }

    fn reconcile_managed(
        &self,
        desired: &ConsoleQuickStart,
        existing: &mut ConsoleQuickStart,
    ) -> bool {
        if existing.spec == desired.spec {
            return false;
        }
        existing.spec = desired.spec.clone();
        true
    }
}
